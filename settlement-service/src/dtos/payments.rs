//! Wire types for the payment-batch surface.

use crate::models::{BatchStatus, DisplayStatus, PaymentBatch};
use crate::services::engine::EligibleService;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
pub struct BatchListParams {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub partner: Option<String>,
    pub status: Option<BatchStatus>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBatchRequest {
    #[validate(length(min = 1, message = "partner_id cannot be empty"))]
    pub partner_id: String,
    #[serde(default)]
    pub partner_name: String,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub period_from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub period_to: Option<DateTime<Utc>>,
    pub week_key: Option<String>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub week_start: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub week_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub service_ids: Vec<String>,
    pub status: Option<BatchStatus>,
    #[serde(default)]
    pub notes: String,
}

/// Patch payload. An absent field leaves the stored value untouched; the
/// derived total is never accepted from the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBatchRequest {
    pub partner_id: Option<String>,
    pub partner_name: Option<String>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub period_from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub period_to: Option<DateTime<Utc>>,
    pub week_key: Option<String>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub week_start: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub week_end: Option<DateTime<Utc>>,
    pub service_ids: Option<Vec<String>>,
    pub status: Option<BatchStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    #[validate(length(min = 1, message = "service_id cannot be empty"))]
    pub service_id: String,
    /// Link even if another batch already holds the service.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AppendNoteRequest {
    #[validate(length(min = 1, message = "text cannot be empty"))]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct EligibleParams {
    pub partner: Option<String>,
    pub service_type: Option<String>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "super::flexible_date::deserialize_opt")]
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub any_date: bool,
}

#[derive(Debug, Deserialize)]
pub struct ServiceStatusParams {
    /// Comma-separated service ids.
    pub ids: String,
}

#[derive(Debug, Serialize)]
pub struct NoteEntryResponse {
    pub id: String,
    pub text: String,
    pub at: String,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub id: String,
    pub partner_id: String,
    pub partner_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_end: Option<String>,
    pub service_ids: Vec<String>,
    pub total: f64,
    pub status: BatchStatus,
    pub notes: String,
    pub notes_log: Vec<NoteEntryResponse>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<PaymentBatch> for BatchResponse {
    fn from(batch: PaymentBatch) -> Self {
        Self {
            id: batch.id.canonical(),
            partner_id: batch.partner_id.canonical(),
            partner_name: batch.partner_name,
            period_from: batch.period_from.map(|t| t.to_chrono().to_rfc3339()),
            period_to: batch.period_to.map(|t| t.to_chrono().to_rfc3339()),
            week_key: batch.week_key,
            week_start: batch.week_start.map(|t| t.to_chrono().to_rfc3339()),
            week_end: batch.week_end.map(|t| t.to_chrono().to_rfc3339()),
            service_ids: batch.service_ids.iter().map(|s| s.canonical()).collect(),
            total: batch.total,
            status: batch.status,
            notes: batch.notes,
            notes_log: batch
                .notes_log
                .into_iter()
                .map(|n| NoteEntryResponse {
                    id: n.id,
                    text: n.text,
                    at: n.at.to_rfc3339(),
                })
                .collect(),
            created_at: batch.created_at.to_rfc3339(),
            updated_at: batch.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchListResponse {
    pub items: Vec<BatchResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
pub struct EligibleServiceResponse {
    pub id: String,
    pub service_date: String,
    pub first_name: String,
    pub last_name: String,
    pub service_type_id: String,
    pub final_value: f64,
    pub observations: String,
}

impl From<EligibleService> for EligibleServiceResponse {
    fn from(row: EligibleService) -> Self {
        Self {
            id: row.id,
            service_date: row.service_date.to_rfc3339(),
            first_name: row.first_name,
            last_name: row.last_name,
            service_type_id: row.service_type_id,
            final_value: row.final_value,
            observations: row.observations,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EligibleListResponse {
    pub items: Vec<EligibleServiceResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatusEntry {
    pub service_id: String,
    pub linked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DisplayStatus>,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatusResponse {
    pub items: Vec<ServiceStatusEntry>,
}

#[derive(Debug, Serialize)]
pub struct RecalcResponse {
    pub id: String,
    pub total: f64,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub ok: bool,
}
