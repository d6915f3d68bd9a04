//! Persistence seam for services and payment batches.
//!
//! Two backends implement [`SettlementStore`]: the Mongo-backed store used in
//! deployments and an in-memory store for tests and local development. Both
//! must resolve identifiers across their two historical storage shapes; the
//! engine above this layer only ever sees canonical strings.

use crate::models::{
    BatchStatus, NoteLogEntry, PaymentBatch, RecordId, Scope, Service, ServiceStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Sortable fields for service listings. Unknown inputs fall back to the
/// service date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceSort {
    #[default]
    ServiceDate,
    CreatedAt,
    FinalValue,
    FirstName,
}

impl ServiceSort {
    pub fn parse(s: &str) -> Self {
        match s {
            "created_at" => ServiceSort::CreatedAt,
            "final_value" => ServiceSort::FinalValue,
            // "client" is the column name the back-office grid uses.
            "first_name" | "client" => ServiceSort::FirstName,
            _ => ServiceSort::ServiceDate,
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            ServiceSort::ServiceDate => "service_date",
            ServiceSort::CreatedAt => "created_at",
            ServiceSort::FinalValue => "final_value",
            ServiceSort::FirstName => "first_name",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

impl SortDir {
    pub fn parse(s: &str) -> Self {
        match s {
            "asc" | "1" => SortDir::Asc,
            _ => SortDir::Desc,
        }
    }
}

/// Filters and paging for service listings. `page_size` of zero means
/// unpaged; handlers always pass a clamped positive value, the eligibility
/// resolver passes zero.
#[derive(Debug, Clone, Default)]
pub struct ServiceQuery {
    pub partner: Option<String>,
    pub service_type: Option<String>,
    pub team: Option<String>,
    pub status: Option<ServiceStatus>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub sort: ServiceSort,
    pub dir: SortDir,
    pub page: u64,
    pub page_size: u64,
}

/// Filters and paging for batch listings, sorted newest first.
#[derive(Debug, Clone, Default)]
pub struct BatchQuery {
    pub partner: Option<String>,
    pub status: Option<BatchStatus>,
    pub page: u64,
    pub page_size: u64,
}

/// Field updates for a service; `None` leaves a field untouched.
/// `updated_at` is bumped by the store on every write.
#[derive(Debug, Clone, Default)]
pub struct ServiceUpdate {
    pub partner_id: Option<String>,
    pub service_date: Option<DateTime<Utc>>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub client_name: Option<String>,
    pub park: Option<String>,
    pub location: Option<String>,
    pub guests: Option<i64>,
    pub hopper: Option<bool>,
    pub team: Option<String>,
    pub service_type_id: Option<String>,
    pub service_time: Option<f64>,
    pub observations: Option<String>,
    pub final_value: Option<f64>,
    pub override_value: Option<f64>,
    pub status: Option<ServiceStatus>,
}

/// Field updates for a payment batch; same conventions as [`ServiceUpdate`].
#[derive(Debug, Clone, Default)]
pub struct BatchUpdate {
    pub partner_id: Option<String>,
    pub partner_name: Option<String>,
    pub period_from: Option<mongodb::bson::DateTime>,
    pub period_to: Option<mongodb::bson::DateTime>,
    pub week_key: Option<String>,
    pub week_start: Option<mongodb::bson::DateTime>,
    pub week_end: Option<mongodb::bson::DateTime>,
    pub service_ids: Option<Vec<RecordId>>,
    pub total: Option<f64>,
    pub status: Option<BatchStatus>,
    pub notes: Option<String>,
}

#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn ping(&self) -> Result<(), AppError>;

    // Services
    async fn insert_service(&self, service: &Service) -> Result<(), AppError>;
    async fn insert_services(&self, services: &[Service]) -> Result<(), AppError>;
    async fn find_service(&self, scope: &Scope, id: &str) -> Result<Option<Service>, AppError>;
    async fn list_services(
        &self,
        scope: &Scope,
        query: &ServiceQuery,
    ) -> Result<(Vec<Service>, u64), AppError>;
    /// Fetch services by id, matching either storage shape. Ids with no
    /// backing document are silently absent from the result.
    async fn services_by_ids(&self, ids: &[String]) -> Result<Vec<Service>, AppError>;
    async fn update_service(
        &self,
        id: &str,
        update: &ServiceUpdate,
    ) -> Result<Option<Service>, AppError>;
    async fn delete_service(&self, id: &str) -> Result<bool, AppError>;

    // Payment batches
    async fn insert_batch(&self, batch: &PaymentBatch) -> Result<(), AppError>;
    async fn find_batch(&self, scope: &Scope, id: &str) -> Result<Option<PaymentBatch>, AppError>;
    async fn list_batches(
        &self,
        scope: &Scope,
        query: &BatchQuery,
    ) -> Result<(Vec<PaymentBatch>, u64), AppError>;
    /// Every batch belonging to the partner, unpaged. Feeds the eligibility
    /// resolver's used-set.
    async fn partner_batches(&self, partner_id: &str) -> Result<Vec<PaymentBatch>, AppError>;
    /// Every batch whose link set contains any of the given services, in one
    /// round trip. The bulk lock resolver fans results back out per id.
    async fn batches_linking(&self, service_ids: &[String])
        -> Result<Vec<PaymentBatch>, AppError>;
    async fn update_batch(
        &self,
        id: &str,
        update: &BatchUpdate,
    ) -> Result<Option<PaymentBatch>, AppError>;
    async fn push_note(
        &self,
        id: &str,
        entry: &NoteLogEntry,
    ) -> Result<Option<PaymentBatch>, AppError>;
    async fn delete_batch(&self, id: &str) -> Result<bool, AppError>;
}

/// Effective partner restriction for a listing: a partner scope always wins,
/// an unrestricted scope defers to the caller's filter.
pub(crate) fn scoped_partner<'a>(scope: &'a Scope, requested: Option<&'a str>) -> Option<&'a str> {
    match scope {
        Scope::Partner(id) => Some(id.as_str()),
        Scope::All => requested,
    }
}
