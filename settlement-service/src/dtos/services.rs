//! Wire types for the service-record surface.

use crate::models::{DisplayStatus, LockState, Service, ServiceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
pub struct ServiceListParams {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub partner: Option<String>,
    pub service_type: Option<String>,
    pub team: Option<String>,
    pub status: Option<ServiceStatus>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub date_to: Option<DateTime<Utc>>,
    /// Case-insensitive match over client name fields.
    pub q: Option<String>,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
    #[serde(default)]
    pub with_lock: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceGetParams {
    #[serde(default)]
    pub with_lock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateServiceRequest {
    /// Required for back-office callers; partners default to themselves.
    pub partner_id: Option<String>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub service_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub park: String,
    #[serde(default)]
    pub location: String,
    pub guests: Option<i64>,
    #[serde(default)]
    pub hopper: bool,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub service_type_id: String,
    pub service_time: Option<f64>,
    #[serde(default)]
    pub observations: String,
    #[validate(range(min = 0.0, message = "final_value cannot be negative"))]
    #[serde(default)]
    pub final_value: f64,
    pub override_value: Option<f64>,
    pub status: Option<ServiceStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkCreateRequest {
    #[validate(length(min = 1, message = "items cannot be empty"))]
    pub items: Vec<CreateServiceRequest>,
}

/// Patch payload. An absent field leaves the stored value untouched.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateServiceRequest {
    pub partner_id: Option<String>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
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
    #[validate(range(min = 0.0, message = "final_value cannot be negative"))]
    pub final_value: Option<f64>,
    pub override_value: Option<f64>,
    pub status: Option<ServiceStatus>,
}

#[derive(Debug, Serialize)]
pub struct LockAnnotation {
    pub linked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DisplayStatus>,
}

#[derive(Debug, Serialize)]
pub struct ServiceResponse {
    pub id: String,
    pub partner_id: String,
    pub service_date: String,
    pub first_name: String,
    pub last_name: String,
    pub client_name: String,
    pub park: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guests: Option<i64>,
    pub hopper: bool,
    pub team: String,
    pub service_type_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_time: Option<f64>,
    pub observations: String,
    pub final_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_value: Option<f64>,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockAnnotation>,
    pub created_at: String,
    pub updated_at: String,
}

impl ServiceResponse {
    /// Annotated row. An unknown lock state leaves the field off the wire
    /// entirely, which is how degraded listings are told apart from free
    /// services.
    pub fn with_lock(service: Service, lock: LockState) -> Self {
        let lock = match lock {
            LockState::Unknown => None,
            LockState::Free => Some(LockAnnotation {
                linked: false,
                payment_id: None,
                status: None,
            }),
            LockState::Locked(l) => Some(LockAnnotation {
                linked: true,
                payment_id: Some(l.payment_id),
                status: Some(l.status),
            }),
        };
        Self {
            id: service.id.canonical(),
            partner_id: service.partner_id.canonical(),
            service_date: service.service_date.to_rfc3339(),
            first_name: service.first_name,
            last_name: service.last_name,
            client_name: service.client_name,
            park: service.park,
            location: service.location,
            guests: service.guests,
            hopper: service.hopper,
            team: service.team,
            service_type_id: service.service_type_id,
            service_time: service.service_time,
            observations: service.observations,
            final_value: service.final_value,
            override_value: service.override_value,
            status: service.status,
            lock,
            created_at: service.created_at.to_rfc3339(),
            updated_at: service.updated_at.to_rfc3339(),
        }
    }
}

impl From<Service> for ServiceResponse {
    fn from(service: Service) -> Self {
        Self::with_lock(service, LockState::Unknown)
    }
}

#[derive(Debug, Serialize)]
pub struct ServiceListResponse {
    pub items: Vec<ServiceResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
pub struct BulkCreateResponse {
    pub inserted: usize,
    pub items: Vec<ServiceResponse>,
}
