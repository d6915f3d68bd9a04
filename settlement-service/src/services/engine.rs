//! Payment-settlement reconciliation engine.
//!
//! Owns the business rules around partner services and payment batches:
//! which services are still eligible for a new batch, which batch currently
//! holds the lock over a service, how batch totals are derived, and which
//! mutations each caller role may perform. All identifier comparisons happen
//! on canonical form; the store layer resolves the on-disk shapes.

use crate::dtos::payments::{CreateBatchRequest, UpdateBatchRequest};
use crate::dtos::services::{CreateServiceRequest, UpdateServiceRequest};
use crate::middleware::auth::AuthContext;
use crate::models::{
    BatchStatus, DisplayStatus, LockState, NoteLogEntry, PaymentBatch, RecordId, Role, Scope,
    Service, ServiceLock,
};
use crate::services::ids;
use crate::services::store::{
    BatchQuery, BatchUpdate, ServiceQuery, ServiceSort, ServiceUpdate, SettlementStore, SortDir,
};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use mongodb::bson::DateTime as BsonDateTime;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Tunables for the reconciliation engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Reject linking a service that another batch already holds. An add
    /// with `force` set overrides the rejection.
    pub exclusive_links: bool,
    /// Emit debug logs describing eligibility filter resolution.
    pub log_filters: bool,
    /// Service type assumed by the eligibility resolver when none is given.
    pub default_service_type: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            exclusive_links: true,
            log_filters: false,
            default_service_type: "REIMBURSEMENT".to_string(),
        }
    }
}

/// One page of a listing.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl<T> Page<T> {
    /// Never reports zero pages, even for an empty result.
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 1;
        }
        self.total.div_ceil(self.page_size).max(1)
    }
}

/// Parameters for the eligibility resolver. A window end is extended to the
/// last instant of its day; an absent window must be acknowledged through
/// `any_date`.
#[derive(Debug, Clone)]
pub struct EligibleRequest {
    pub partner: String,
    pub service_type: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub any_date: bool,
}

/// Row returned by the eligibility resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleService {
    pub id: String,
    pub service_date: DateTime<Utc>,
    pub first_name: String,
    pub last_name: String,
    pub service_type_id: String,
    pub final_value: f64,
    pub observations: String,
}

#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<dyn SettlementStore>,
    settings: EngineSettings,
}

/// Pick the winning lock among the batches linking one service: highest
/// display-status rank first, most recently updated batch on ties.
fn lock_winner(links: &[&PaymentBatch]) -> Option<ServiceLock> {
    links
        .iter()
        .max_by(|a, b| {
            DisplayStatus::from(a.status)
                .rank()
                .cmp(&DisplayStatus::from(b.status).rank())
                .then_with(|| a.updated_at.cmp(&b.updated_at))
        })
        .map(|batch| ServiceLock {
            payment_id: batch.id.canonical(),
            status: batch.status.into(),
        })
}

/// Resolve one service's lock against a prefetched batch set.
fn resolve_lock(batches: &[PaymentBatch], canonical_id: &str) -> Option<ServiceLock> {
    let links: Vec<&PaymentBatch> = batches
        .iter()
        .filter(|b| b.links_service(canonical_id))
        .collect();
    if links.len() > 1 {
        tracing::warn!(
            service_id = %canonical_id,
            batches = links.len(),
            "service linked by multiple payment batches"
        );
    }
    lock_winner(&links)
}

/// Extend a window end to the last representable instant of its day.
pub(crate) fn end_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    let start = Utc.from_utc_datetime(&t.date_naive().and_time(NaiveTime::MIN));
    start + Duration::days(1) - Duration::milliseconds(1)
}

impl SettlementEngine {
    pub fn new(store: Arc<dyn SettlementStore>, settings: EngineSettings) -> Self {
        Self { store, settings }
    }

    fn require_back_office(&self, auth: &AuthContext) -> Result<(), AppError> {
        if auth.role.sees_all() {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "only admin or finance may perform this operation"
            )))
        }
    }

    /// Partner filter a listing is allowed to use: back-office callers pick
    /// freely, partners are pinned to themselves.
    fn resolve_partner(
        &self,
        auth: &AuthContext,
        requested: Option<String>,
    ) -> Result<Option<String>, AppError> {
        if auth.role.sees_all() {
            return Ok(requested);
        }
        match requested {
            None => Ok(Some(auth.actor_id.clone())),
            Some(partner) if ids::forms_match(&partner, &auth.actor_id) => Ok(Some(partner)),
            Some(_) => Err(AppError::Forbidden(anyhow::anyhow!(
                "partners may only query their own records"
            ))),
        }
    }

    async fn fetch_batch(&self, id: &str) -> Result<PaymentBatch, AppError> {
        self.store
            .find_batch(&Scope::All, id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment batch not found")))
    }

    // ---- Payment batches ----

    pub async fn list_batches(
        &self,
        auth: &AuthContext,
        mut query: BatchQuery,
    ) -> Result<Page<PaymentBatch>, AppError> {
        query.partner = self.resolve_partner(auth, query.partner)?;
        let (items, total) = self.store.list_batches(&auth.scope(), &query).await?;
        Ok(Page {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    pub async fn create_batch(
        &self,
        auth: &AuthContext,
        req: CreateBatchRequest,
    ) -> Result<PaymentBatch, AppError> {
        if !auth.role.sees_all() && !ids::forms_match(&req.partner_id, &auth.actor_id) {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "partners may only create batches for themselves"
            )));
        }

        let mapped: Vec<RecordId> = req.service_ids.iter().map(|s| RecordId::plain(s)).collect();
        let service_ids = ids::dedup_ids(&mapped);

        let now = Utc::now();
        let batch = PaymentBatch {
            id: RecordId::new(),
            partner_id: RecordId::plain(&req.partner_id),
            partner_name: req.partner_name,
            period_from: req.period_from.map(BsonDateTime::from_chrono),
            period_to: req.period_to.map(BsonDateTime::from_chrono),
            week_key: req.week_key,
            week_start: req.week_start.map(BsonDateTime::from_chrono),
            week_end: req.week_end.map(BsonDateTime::from_chrono),
            service_ids,
            total: 0.0,
            status: req.status.unwrap_or_default(),
            notes: req.notes,
            notes_log: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_batch(&batch).await?;

        let id = batch.id.canonical();
        self.recompute_total(&id).await?;
        tracing::info!(batch_id = %id, partner_id = %batch.partner_id, "payment batch created");
        self.fetch_batch(&id).await
    }

    pub async fn get_batch(&self, auth: &AuthContext, id: &str) -> Result<PaymentBatch, AppError> {
        self.store
            .find_batch(&auth.scope(), id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment batch not found")))
    }

    /// Patch a batch. Back-office callers may change anything except the
    /// derived total; a partner may only act on a batch that was shared with
    /// them, and the only field that takes effect is the approval decision.
    pub async fn update_batch(
        &self,
        auth: &AuthContext,
        id: &str,
        req: UpdateBatchRequest,
    ) -> Result<PaymentBatch, AppError> {
        let current = self.get_batch(auth, id).await?;

        if auth.role == Role::Partner {
            let Some(next) = req.status else {
                return Err(AppError::StateTransition(
                    "a partner update must set the batch status".to_string(),
                ));
            };
            if current.status != BatchStatus::Shared {
                return Err(AppError::StateTransition(format!(
                    "batch in status {} is not awaiting partner review",
                    current.status
                )));
            }
            if !matches!(next, BatchStatus::Approved | BatchStatus::Declined) {
                return Err(AppError::StateTransition(format!(
                    "partners may only move a shared batch to APPROVED or DECLINED, not {}",
                    next
                )));
            }
            // Anything else in the payload, including service_ids, is ignored.
            let update = BatchUpdate {
                status: Some(next),
                ..Default::default()
            };
            return self
                .store
                .update_batch(id, &update)
                .await?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment batch not found")));
        }

        let mut update = BatchUpdate {
            partner_id: req.partner_id,
            partner_name: req.partner_name,
            period_from: req.period_from.map(BsonDateTime::from_chrono),
            period_to: req.period_to.map(BsonDateTime::from_chrono),
            week_key: req.week_key,
            week_start: req.week_start.map(BsonDateTime::from_chrono),
            week_end: req.week_end.map(BsonDateTime::from_chrono),
            status: req.status,
            notes: req.notes,
            ..Default::default()
        };
        let recompute = req.service_ids.is_some();
        if let Some(raw_ids) = req.service_ids {
            let mapped: Vec<RecordId> = raw_ids.iter().map(|s| RecordId::plain(s)).collect();
            update.service_ids = Some(ids::dedup_ids(&mapped));
        }

        let updated = self
            .store
            .update_batch(id, &update)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment batch not found")))?;

        if recompute {
            self.recompute_total(id).await?;
            return self.fetch_batch(id).await;
        }
        Ok(updated)
    }

    pub async fn delete_batch(&self, auth: &AuthContext, id: &str) -> Result<(), AppError> {
        self.require_back_office(auth)?;
        if !self.store.delete_batch(id).await? {
            return Err(AppError::NotFound(anyhow::anyhow!("Payment batch not found")));
        }
        // Locks derive from live batches only, so the linked services are
        // free again from this point on.
        tracing::info!(batch_id = %id, "payment batch deleted");
        Ok(())
    }

    pub async fn append_note(
        &self,
        auth: &AuthContext,
        id: &str,
        text: &str,
    ) -> Result<PaymentBatch, AppError> {
        // Note writers must be able to see the batch.
        self.get_batch(auth, id).await?;
        let entry = NoteLogEntry {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            at: Utc::now(),
        };
        self.store
            .push_note(id, &entry)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment batch not found")))
    }

    /// Link a service into a batch. Re-adding a service the batch already
    /// holds is a no-op; a service held by a different batch is rejected
    /// unless `force` is set.
    pub async fn add_service(
        &self,
        auth: &AuthContext,
        batch_id: &str,
        service_id: &str,
        force: bool,
    ) -> Result<PaymentBatch, AppError> {
        self.require_back_office(auth)?;

        let batch = self.fetch_batch(batch_id).await?;
        let service = self
            .store
            .find_service(&Scope::All, service_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Service not found")))?;

        if service.partner_id != batch.partner_id {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Service partner mismatch"
            )));
        }

        let canonical = RecordId::canonicalize(service_id);
        if batch.links_service(&canonical) {
            return Ok(batch);
        }

        if self.settings.exclusive_links && !force {
            if let Some(lock) = self.lock_status(service_id).await? {
                return Err(AppError::ServiceLocked {
                    payment_id: lock.payment_id,
                    status: lock.status.as_str().to_string(),
                });
            }
        }

        let mut service_ids = batch.service_ids.clone();
        service_ids.push(RecordId::Plain(canonical));
        let update = BatchUpdate {
            service_ids: Some(ids::dedup_ids(&service_ids)),
            ..Default::default()
        };
        self.store
            .update_batch(batch_id, &update)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment batch not found")))?;

        self.recompute_total(batch_id).await?;
        self.fetch_batch(batch_id).await
    }

    /// Unlink a service from a batch. Removing an id the batch does not
    /// hold is a no-op.
    pub async fn remove_service(
        &self,
        auth: &AuthContext,
        batch_id: &str,
        service_id: &str,
    ) -> Result<PaymentBatch, AppError> {
        self.require_back_office(auth)?;

        let batch = self.fetch_batch(batch_id).await?;
        let canonical = RecordId::canonicalize(service_id);
        if !batch.links_service(&canonical) {
            return Ok(batch);
        }

        let service_ids: Vec<RecordId> = batch
            .service_ids
            .iter()
            .filter(|sid| sid.canonical() != canonical)
            .cloned()
            .collect();
        let update = BatchUpdate {
            service_ids: Some(service_ids),
            ..Default::default()
        };
        self.store
            .update_batch(batch_id, &update)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment batch not found")))?;

        self.recompute_total(batch_id).await?;
        self.fetch_batch(batch_id).await
    }

    /// Re-derive a batch total from the live final values of its linked
    /// services. Ids whose service no longer exists contribute nothing.
    pub async fn recompute_total(&self, batch_id: &str) -> Result<f64, AppError> {
        let batch = self.fetch_batch(batch_id).await?;
        let linked: Vec<String> = batch.service_ids.iter().map(RecordId::canonical).collect();
        let services = if linked.is_empty() {
            Vec::new()
        } else {
            self.store.services_by_ids(&linked).await?
        };
        let total: f64 = services.iter().map(|s| s.final_value).sum();

        self.store
            .update_batch(
                batch_id,
                &BatchUpdate {
                    total: Some(total),
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment batch not found")))?;

        metrics::counter!("batch_total_recomputed").increment(1);
        tracing::debug!(
            batch_id = %batch_id,
            total,
            linked = linked.len(),
            "recomputed batch total"
        );
        Ok(total)
    }

    /// On-demand recompute. Callers must be able to see the batch.
    pub async fn recalc_batch(&self, auth: &AuthContext, id: &str) -> Result<f64, AppError> {
        self.get_batch(auth, id).await?;
        self.recompute_total(id).await
    }

    // ---- Eligibility ----

    /// Services of a partner that no batch of that partner has claimed yet.
    pub async fn eligible_services(
        &self,
        auth: &AuthContext,
        req: EligibleRequest,
    ) -> Result<Vec<EligibleService>, AppError> {
        if req.date_from.is_none() && req.date_to.is_none() && !req.any_date {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "date_from/date_to or any_date=true is required"
            )));
        }
        if !auth.role.sees_all() && !ids::forms_match(&req.partner, &auth.actor_id) {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "partners may only query their own services"
            )));
        }

        let service_type = req
            .service_type
            .unwrap_or_else(|| self.settings.default_service_type.clone());
        let type_filter = (service_type != "ALL").then_some(service_type);

        // Union of every link set the partner's batches hold, canonicalized.
        let used: HashSet<String> = self
            .store
            .partner_batches(&req.partner)
            .await?
            .iter()
            .flat_map(|b| b.service_ids.iter().map(RecordId::canonical))
            .collect();

        let query = ServiceQuery {
            partner: Some(req.partner.clone()),
            service_type: type_filter.clone(),
            date_from: req.date_from,
            date_to: req.date_to.map(end_of_day),
            sort: ServiceSort::ServiceDate,
            dir: SortDir::Desc,
            page: 1,
            page_size: 0,
            ..Default::default()
        };

        if self.settings.log_filters {
            tracing::debug!(
                partner = %req.partner,
                service_type = ?type_filter,
                date_from = ?query.date_from,
                date_to = ?query.date_to,
                used = used.len(),
                "resolving eligible services"
            );
        }

        let (services, _) = self.store.list_services(&Scope::All, &query).await?;
        Ok(services
            .into_iter()
            .filter(|s| !used.contains(&s.id.canonical()))
            .map(|s| EligibleService {
                id: s.id.canonical(),
                service_date: s.service_date,
                first_name: s.first_name,
                last_name: s.last_name,
                service_type_id: s.service_type_id,
                final_value: s.final_value,
                observations: s.observations,
            })
            .collect())
    }

    // ---- Lock resolution ----

    /// The lock currently held over one service, if any.
    pub async fn lock_status(&self, service_id: &str) -> Result<Option<ServiceLock>, AppError> {
        let canonical = RecordId::canonicalize(service_id);
        let batches = self
            .store
            .batches_linking(std::slice::from_ref(&canonical))
            .await?;
        Ok(resolve_lock(&batches, &canonical))
    }

    /// Lock state for many services in one store round trip. Returns one
    /// entry per requested id, in request order.
    pub async fn bulk_lock_status(
        &self,
        service_ids: &[String],
    ) -> Result<Vec<(String, Option<ServiceLock>)>, AppError> {
        if service_ids.is_empty() {
            return Ok(Vec::new());
        }
        let canonicals: Vec<String> = service_ids
            .iter()
            .map(|id| RecordId::canonicalize(id))
            .collect();
        let mut query_set = canonicals.clone();
        query_set.sort();
        query_set.dedup();

        let batches = self.store.batches_linking(&query_set).await?;
        Ok(service_ids
            .iter()
            .zip(canonicals)
            .map(|(raw, canonical)| (raw.clone(), resolve_lock(&batches, &canonical)))
            .collect())
    }

    /// Mutation guard: a service held by any batch may not be modified or
    /// deleted. Fails closed when the lock lookup itself fails.
    pub async fn guard_unlinked(&self, service_id: &str) -> Result<(), AppError> {
        if let Some(lock) = self.lock_status(service_id).await? {
            return Err(AppError::ServiceLocked {
                payment_id: lock.payment_id,
                status: lock.status.as_str().to_string(),
            });
        }
        Ok(())
    }

    // ---- Services ----

    fn build_service(
        &self,
        auth: &AuthContext,
        req: CreateServiceRequest,
    ) -> Result<Service, AppError> {
        let partner_id = match req.partner_id {
            Some(partner) => {
                if !auth.role.sees_all() && !ids::forms_match(&partner, &auth.actor_id) {
                    return Err(AppError::Forbidden(anyhow::anyhow!(
                        "partners may only create their own services"
                    )));
                }
                partner
            }
            None if auth.role.sees_all() => {
                return Err(AppError::BadRequest(anyhow::anyhow!("Missing partner_id")));
            }
            None => auth.actor_id.clone(),
        };

        let now = Utc::now();
        Ok(Service {
            id: RecordId::new(),
            partner_id: RecordId::plain(&partner_id),
            service_date: req.service_date.unwrap_or(now),
            first_name: req.first_name,
            last_name: req.last_name,
            client_name: req.client_name,
            park: req.park,
            location: req.location,
            guests: req.guests,
            hopper: req.hopper,
            team: req.team,
            service_type_id: req.service_type_id,
            service_time: req.service_time,
            observations: req.observations,
            final_value: req.final_value,
            override_value: req.override_value,
            status: req.status.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn create_service(
        &self,
        auth: &AuthContext,
        req: CreateServiceRequest,
    ) -> Result<Service, AppError> {
        let service = self.build_service(auth, req)?;
        self.store.insert_service(&service).await?;
        Ok(service)
    }

    pub async fn create_services(
        &self,
        auth: &AuthContext,
        reqs: Vec<CreateServiceRequest>,
    ) -> Result<Vec<Service>, AppError> {
        if reqs.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("items cannot be empty")));
        }
        let mut services = Vec::with_capacity(reqs.len());
        for req in reqs {
            services.push(self.build_service(auth, req)?);
        }
        self.store.insert_services(&services).await?;
        Ok(services)
    }

    pub async fn get_service(
        &self,
        auth: &AuthContext,
        id: &str,
        with_lock: bool,
    ) -> Result<(Service, LockState), AppError> {
        let service = self
            .store
            .find_service(&auth.scope(), id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Service not found")))?;

        let lock = if with_lock {
            match self.lock_status(id).await {
                Ok(Some(lock)) => LockState::Locked(lock),
                Ok(None) => LockState::Free,
                Err(e) => {
                    // Annotation is enrichment; the read itself must survive.
                    tracing::warn!(service_id = %id, error = %e, "lock annotation failed");
                    LockState::Unknown
                }
            }
        } else {
            LockState::Unknown
        };
        Ok((service, lock))
    }

    pub async fn list_services(
        &self,
        auth: &AuthContext,
        mut query: ServiceQuery,
        with_lock: bool,
    ) -> Result<Page<(Service, LockState)>, AppError> {
        query.partner = self.resolve_partner(auth, query.partner)?;
        let (services, total) = self.store.list_services(&auth.scope(), &query).await?;

        let locks: Vec<LockState> = if with_lock && !services.is_empty() {
            let page_ids: Vec<String> = services.iter().map(|s| s.id.canonical()).collect();
            match self.bulk_lock_status(&page_ids).await {
                Ok(entries) => entries
                    .into_iter()
                    .map(|(_, lock)| lock.map_or(LockState::Free, LockState::Locked))
                    .collect(),
                Err(e) => {
                    // Annotation is enrichment; the listing itself must survive.
                    tracing::warn!(error = %e, "bulk lock annotation failed");
                    vec![LockState::Unknown; services.len()]
                }
            }
        } else {
            vec![LockState::Unknown; services.len()]
        };

        let items = services.into_iter().zip(locks).collect();
        Ok(Page {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    pub async fn update_service(
        &self,
        auth: &AuthContext,
        id: &str,
        req: UpdateServiceRequest,
    ) -> Result<Service, AppError> {
        self.store
            .find_service(&auth.scope(), id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Service not found")))?;
        self.guard_unlinked(id).await?;

        if let Some(partner) = &req.partner_id {
            if !auth.role.sees_all() && !ids::forms_match(partner, &auth.actor_id) {
                return Err(AppError::Forbidden(anyhow::anyhow!(
                    "partners may not reassign a service to another partner"
                )));
            }
        }

        let update = ServiceUpdate {
            partner_id: req.partner_id,
            service_date: req.service_date,
            first_name: req.first_name,
            last_name: req.last_name,
            client_name: req.client_name,
            park: req.park,
            location: req.location,
            guests: req.guests,
            hopper: req.hopper,
            team: req.team,
            service_type_id: req.service_type_id,
            service_time: req.service_time,
            observations: req.observations,
            final_value: req.final_value,
            override_value: req.override_value,
            status: req.status,
        };
        self.store
            .update_service(id, &update)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Service not found")))
    }

    pub async fn delete_service(&self, auth: &AuthContext, id: &str) -> Result<(), AppError> {
        self.store
            .find_service(&auth.scope(), id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Service not found")))?;
        self.guard_unlinked(id).await?;

        if !self.store.delete_service(id).await? {
            return Err(AppError::NotFound(anyhow::anyhow!("Service not found")));
        }
        Ok(())
    }

    pub async fn ping_store(&self) -> Result<(), AppError> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;
    use mongodb::bson::oid::ObjectId;

    fn admin() -> AuthContext {
        AuthContext::new("admin-1", Role::Admin)
    }

    fn partner_ctx(id: &str) -> AuthContext {
        AuthContext::new(id, Role::Partner)
    }

    fn test_engine(store: &Arc<MemoryStore>) -> SettlementEngine {
        SettlementEngine::new(store.clone(), EngineSettings::default())
    }

    fn sample_service(id: RecordId, partner: &str, final_value: f64) -> Service {
        let now = Utc::now();
        Service {
            id,
            partner_id: RecordId::plain(partner),
            service_date: now,
            first_name: "Ana".to_string(),
            last_name: "Silva".to_string(),
            client_name: String::new(),
            park: String::new(),
            location: String::new(),
            guests: None,
            hopper: false,
            team: String::new(),
            service_type_id: "REIMBURSEMENT".to_string(),
            service_time: None,
            observations: String::new(),
            final_value,
            override_value: None,
            status: crate::models::ServiceStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_batch(
        partner: &str,
        service_ids: Vec<RecordId>,
        status: BatchStatus,
        updated_at: DateTime<Utc>,
    ) -> PaymentBatch {
        PaymentBatch {
            id: RecordId::new(),
            partner_id: RecordId::plain(partner),
            partner_name: String::new(),
            period_from: None,
            period_to: None,
            week_key: None,
            week_start: None,
            week_end: None,
            service_ids,
            total: 0.0,
            status,
            notes: String::new(),
            notes_log: Vec::new(),
            created_at: updated_at,
            updated_at,
        }
    }

    fn create_request(partner: &str, service_ids: Vec<String>) -> CreateBatchRequest {
        CreateBatchRequest {
            partner_id: partner.to_string(),
            partner_name: String::new(),
            period_from: None,
            period_to: None,
            week_key: None,
            week_start: None,
            week_end: None,
            service_ids,
            status: None,
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn recompute_sums_across_id_forms() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let oid_a = ObjectId::new();
        let oid_b = ObjectId::new();
        store
            .seed_service(sample_service(RecordId::Oid(oid_a), "partner-1", 100.5))
            .await;
        store
            .seed_service(sample_service(RecordId::Oid(oid_b), "partner-1", 49.5))
            .await;

        // Link one service by hex string, the other natively, plus one id
        // with no backing service.
        let batch = sample_batch(
            "partner-1",
            vec![
                RecordId::Plain(oid_a.to_hex()),
                RecordId::Oid(oid_b),
                RecordId::Plain("gone-1".to_string()),
            ],
            BatchStatus::Pending,
            Utc::now(),
        );
        let batch_id = batch.id.canonical();
        store.seed_batch(batch).await;

        let total = engine.recompute_total(&batch_id).await.unwrap();
        assert_eq!(total, 150.0);
    }

    #[tokio::test]
    async fn eligibility_excludes_claimed_and_readmits_freed() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let claimed = ObjectId::new();
        let free = ObjectId::new();
        store
            .seed_service(sample_service(RecordId::Oid(claimed), "partner-1", 10.0))
            .await;
        store
            .seed_service(sample_service(RecordId::Oid(free), "partner-1", 20.0))
            .await;

        // The claiming batch stores the string form; eligibility must still
        // subtract the natively-identified service.
        let batch = engine
            .create_batch(&admin(), create_request("partner-1", vec![claimed.to_hex()]))
            .await
            .unwrap();

        let req = EligibleRequest {
            partner: "partner-1".to_string(),
            service_type: None,
            date_from: None,
            date_to: None,
            any_date: true,
        };
        let eligible = engine.eligible_services(&admin(), req.clone()).await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, free.to_hex());

        engine
            .remove_service(&admin(), &batch.id.canonical(), &claimed.to_hex())
            .await
            .unwrap();
        let eligible = engine.eligible_services(&admin(), req).await.unwrap();
        assert_eq!(eligible.len(), 2);
    }

    #[tokio::test]
    async fn eligibility_requires_window_or_flag() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let req = EligibleRequest {
            partner: "partner-1".to_string(),
            service_type: None,
            date_from: None,
            date_to: None,
            any_date: false,
        };
        let err = engine.eligible_services(&admin(), req).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn eligibility_defaults_to_reimbursement_type() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let mut other = sample_service(RecordId::new(), "partner-1", 5.0);
        other.service_type_id = "LIGHTNING_LANE".to_string();
        store.seed_service(other).await;
        store
            .seed_service(sample_service(RecordId::new(), "partner-1", 10.0))
            .await;

        let mut req = EligibleRequest {
            partner: "partner-1".to_string(),
            service_type: None,
            date_from: None,
            date_to: None,
            any_date: true,
        };
        let eligible = engine.eligible_services(&admin(), req.clone()).await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].service_type_id, "REIMBURSEMENT");

        req.service_type = Some("ALL".to_string());
        let eligible = engine.eligible_services(&admin(), req).await.unwrap();
        assert_eq!(eligible.len(), 2);
    }

    #[tokio::test]
    async fn partner_cannot_resolve_another_partners_eligibility() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let req = EligibleRequest {
            partner: "partner-2".to_string(),
            service_type: None,
            date_from: None,
            date_to: None,
            any_date: true,
        };
        let err = engine
            .eligible_services(&partner_ctx("partner-1"), req)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn lock_winner_ranks_paid_over_pending_over_declined() {
        let old = Utc::now() - Duration::days(2);
        let newer = Utc::now();

        let paid = sample_batch("p", vec![], BatchStatus::Paid, old);
        let pending = sample_batch("p", vec![], BatchStatus::Shared, newer);
        let declined = sample_batch("p", vec![], BatchStatus::Declined, newer);

        let winner = lock_winner(&[&declined, &pending, &paid]).unwrap();
        assert_eq!(winner.payment_id, paid.id.canonical());
        assert_eq!(winner.status, DisplayStatus::Paid);

        let winner = lock_winner(&[&declined, &pending]).unwrap();
        assert_eq!(winner.status, DisplayStatus::Pending);
    }

    #[test]
    fn lock_winner_breaks_rank_ties_by_recency() {
        let older = Utc::now() - Duration::hours(3);
        let newer = Utc::now();

        // SHARED and ON_HOLD both display as pending.
        let a = sample_batch("p", vec![], BatchStatus::Shared, older);
        let b = sample_batch("p", vec![], BatchStatus::OnHold, newer);

        let winner = lock_winner(&[&a, &b]).unwrap();
        assert_eq!(winner.payment_id, b.id.canonical());
        assert_eq!(winner.status, DisplayStatus::Pending);
    }

    #[tokio::test]
    async fn add_service_is_idempotent_per_batch() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let sid = ObjectId::new();
        store
            .seed_service(sample_service(RecordId::Oid(sid), "partner-1", 30.0))
            .await;
        let batch = engine
            .create_batch(&admin(), create_request("partner-1", vec![]))
            .await
            .unwrap();
        let batch_id = batch.id.canonical();

        let after_first = engine
            .add_service(&admin(), &batch_id, &sid.to_hex(), false)
            .await
            .unwrap();
        assert_eq!(after_first.service_ids.len(), 1);
        assert_eq!(after_first.total, 30.0);

        // Second add by the other id form: still one link, same total.
        let after_second = engine
            .add_service(&admin(), &batch_id, &sid.to_hex().to_uppercase(), false)
            .await
            .unwrap();
        assert_eq!(after_second.service_ids.len(), 1);
        assert_eq!(after_second.total, 30.0);
    }

    #[tokio::test]
    async fn add_service_rejects_cross_batch_links_unless_forced() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let sid = ObjectId::new();
        store
            .seed_service(sample_service(RecordId::Oid(sid), "partner-1", 30.0))
            .await;
        let first = engine
            .create_batch(&admin(), create_request("partner-1", vec![sid.to_hex()]))
            .await
            .unwrap();
        let second = engine
            .create_batch(&admin(), create_request("partner-1", vec![]))
            .await
            .unwrap();

        let err = engine
            .add_service(&admin(), &second.id.canonical(), &sid.to_hex(), false)
            .await
            .unwrap_err();
        match err {
            AppError::ServiceLocked { payment_id, .. } => {
                assert_eq!(payment_id, first.id.canonical());
            }
            other => panic!("expected ServiceLocked, got {other:?}"),
        }

        let forced = engine
            .add_service(&admin(), &second.id.canonical(), &sid.to_hex(), true)
            .await
            .unwrap();
        assert_eq!(forced.service_ids.len(), 1);
    }

    #[tokio::test]
    async fn remove_service_tolerates_unlinked_ids() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let batch = engine
            .create_batch(&admin(), create_request("partner-1", vec![]))
            .await
            .unwrap();
        let result = engine
            .remove_service(&admin(), &batch.id.canonical(), "never-linked")
            .await
            .unwrap();
        assert!(result.service_ids.is_empty());
    }

    #[tokio::test]
    async fn partner_approves_only_shared_batches() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let shared = sample_batch("partner-1", vec![], BatchStatus::Shared, Utc::now());
        let shared_id = shared.id.canonical();
        store.seed_batch(shared).await;

        let pending = sample_batch("partner-1", vec![], BatchStatus::Pending, Utc::now());
        let pending_id = pending.id.canonical();
        store.seed_batch(pending).await;

        let patch = UpdateBatchRequest {
            status: Some(BatchStatus::Approved),
            ..Default::default()
        };
        let approved = engine
            .update_batch(&partner_ctx("partner-1"), &shared_id, patch.clone())
            .await
            .unwrap();
        assert_eq!(approved.status, BatchStatus::Approved);

        let err = engine
            .update_batch(&partner_ctx("partner-1"), &pending_id, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateTransition(_)));
    }

    #[tokio::test]
    async fn partner_decision_cannot_touch_link_set() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let sid = RecordId::new();
        let shared = sample_batch("partner-1", vec![sid.clone()], BatchStatus::Shared, Utc::now());
        let shared_id = shared.id.canonical();
        store.seed_batch(shared).await;

        let patch = UpdateBatchRequest {
            status: Some(BatchStatus::Declined),
            service_ids: Some(vec![]),
            notes: Some("wiped".to_string()),
            ..Default::default()
        };
        let declined = engine
            .update_batch(&partner_ctx("partner-1"), &shared_id, patch)
            .await
            .unwrap();
        assert_eq!(declined.status, BatchStatus::Declined);
        assert_eq!(declined.service_ids.len(), 1);
        assert!(declined.notes.is_empty());
    }

    #[tokio::test]
    async fn guard_blocks_mutation_of_linked_services() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let sid = ObjectId::new();
        store
            .seed_service(sample_service(RecordId::Oid(sid), "partner-1", 30.0))
            .await;
        let batch = engine
            .create_batch(&admin(), create_request("partner-1", vec![sid.to_hex()]))
            .await
            .unwrap();

        let patch = UpdateServiceRequest {
            final_value: Some(99.0),
            ..Default::default()
        };
        let err = engine
            .update_service(&admin(), &sid.to_hex(), patch)
            .await
            .unwrap_err();
        match err {
            AppError::ServiceLocked { payment_id, status } => {
                assert_eq!(payment_id, batch.id.canonical());
                assert_eq!(status, "pending");
            }
            other => panic!("expected ServiceLocked, got {other:?}"),
        }

        let err = engine.delete_service(&admin(), &sid.to_hex()).await.unwrap_err();
        assert!(matches!(err, AppError::ServiceLocked { .. }));
    }

    #[tokio::test]
    async fn deleting_a_batch_frees_its_services() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let sid = ObjectId::new();
        store
            .seed_service(sample_service(RecordId::Oid(sid), "partner-1", 30.0))
            .await;
        let batch = engine
            .create_batch(&admin(), create_request("partner-1", vec![sid.to_hex()]))
            .await
            .unwrap();

        engine
            .delete_batch(&admin(), &batch.id.canonical())
            .await
            .unwrap();
        assert!(engine.lock_status(&sid.to_hex()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bulk_lock_status_answers_every_requested_id() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let linked = ObjectId::new();
        let free = ObjectId::new();
        store
            .seed_service(sample_service(RecordId::Oid(linked), "partner-1", 30.0))
            .await;
        store
            .seed_service(sample_service(RecordId::Oid(free), "partner-1", 10.0))
            .await;
        engine
            .create_batch(&admin(), create_request("partner-1", vec![linked.to_hex()]))
            .await
            .unwrap();

        let entries = engine
            .bulk_lock_status(&[linked.to_hex(), free.to_hex(), "missing-1".to_string()])
            .await
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].1.is_some());
        assert!(entries[1].1.is_none());
        assert!(entries[2].1.is_none());
    }

    #[tokio::test]
    async fn partner_cannot_create_batch_for_another_partner() {
        let store = Arc::new(MemoryStore::new());
        let engine = test_engine(&store);

        let err = engine
            .create_batch(&partner_ctx("partner-1"), create_request("partner-2", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn end_of_day_reaches_last_millisecond() {
        let t = Utc.with_ymd_and_hms(2026, 1, 15, 9, 30, 0).unwrap();
        let end = end_of_day(t);
        assert_eq!(end.to_rfc3339(), "2026-01-15T23:59:59.999+00:00");
    }

    #[test]
    fn page_counting_never_reports_zero_pages() {
        let empty: Page<u8> = Page {
            items: vec![],
            total: 0,
            page: 1,
            page_size: 10,
        };
        assert_eq!(empty.total_pages(), 1);

        let page: Page<u8> = Page {
            items: vec![],
            total: 21,
            page: 1,
            page_size: 10,
        };
        assert_eq!(page.total_pages(), 3);
    }
}
