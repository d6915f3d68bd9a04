//! HTTP surface for payment batches, eligibility, and lock queries.

use crate::dtos::payments::{
    AddItemRequest, AppendNoteRequest, BatchListParams, BatchListResponse, BatchResponse,
    CreateBatchRequest, DeleteResponse, EligibleListResponse, EligibleParams,
    EligibleServiceResponse, RecalcResponse, ServiceStatusEntry, ServiceStatusParams,
    ServiceStatusResponse, UpdateBatchRequest,
};
use crate::middleware::auth::AuthContext;
use crate::services::engine::EligibleRequest;
use crate::services::store::BatchQuery;
use crate::startup::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use service_core::error::AppError;
use validator::Validate;

const DEFAULT_PAGE_SIZE: u64 = 10;
const MAX_PAGE_SIZE: u64 = 500;

pub async fn list_batches(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<BatchListParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = BatchQuery {
        partner: params.partner,
        status: params.status,
        page: params.page.unwrap_or(1).max(1),
        page_size: params
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE),
    };
    let page = state.engine.list_batches(&auth, query).await?;
    let total_pages = page.total_pages();

    Ok(Json(BatchListResponse {
        items: page.items.into_iter().map(BatchResponse::from).collect(),
        total: page.total,
        page: page.page,
        page_size: page.page_size,
        total_pages,
    }))
}

pub async fn create_batch(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreateBatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let batch = state.engine.create_batch(&auth, request).await?;
    Ok((StatusCode::CREATED, Json(BatchResponse::from(batch))))
}

pub async fn get_batch(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let batch = state.engine.get_batch(&auth, &id).await?;
    Ok(Json(BatchResponse::from(batch)))
}

pub async fn update_batch(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(request): Json<UpdateBatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    let batch = state.engine.update_batch(&auth, &id, request).await?;
    Ok(Json(BatchResponse::from(batch)))
}

pub async fn delete_batch(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.engine.delete_batch(&auth, &id).await?;
    Ok(Json(DeleteResponse { ok: true }))
}

pub async fn append_note(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(request): Json<AppendNoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let batch = state.engine.append_note(&auth, &id, &request.text).await?;
    Ok(Json(BatchResponse::from(batch)))
}

pub async fn add_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(request): Json<AddItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let batch = state
        .engine
        .add_service(&auth, &id, &request.service_id, request.force)
        .await?;
    Ok(Json(BatchResponse::from(batch)))
}

pub async fn remove_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, service_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let batch = state.engine.remove_service(&auth, &id, &service_id).await?;
    Ok(Json(BatchResponse::from(batch)))
}

pub async fn recalc_batch(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let total = state.engine.recalc_batch(&auth, &id).await?;
    Ok(Json(RecalcResponse { id, total }))
}

pub async fn eligible_services(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<EligibleParams>,
) -> Result<impl IntoResponse, AppError> {
    let partner = params
        .partner
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing partner")))?;

    let rows = state
        .engine
        .eligible_services(
            &auth,
            EligibleRequest {
                partner,
                service_type: params.service_type,
                date_from: params.date_from,
                date_to: params.date_to,
                any_date: params.any_date,
            },
        )
        .await?;

    Ok(Json(EligibleListResponse {
        total: rows.len(),
        items: rows
            .into_iter()
            .map(EligibleServiceResponse::from)
            .collect(),
    }))
}

pub async fn service_status(
    State(state): State<AppState>,
    // Authentication only; lock facts are not partner-scoped.
    _auth: AuthContext,
    Query(params): Query<ServiceStatusParams>,
) -> Result<impl IntoResponse, AppError> {
    let ids: Vec<String> = params
        .ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("Missing ids")));
    }

    let entries = state.engine.bulk_lock_status(&ids).await?;
    let items = entries
        .into_iter()
        .map(|(service_id, lock)| match lock {
            Some(lock) => ServiceStatusEntry {
                service_id,
                linked: true,
                payment_id: Some(lock.payment_id),
                status: Some(lock.status),
            },
            None => ServiceStatusEntry {
                service_id,
                linked: false,
                payment_id: None,
                status: None,
            },
        })
        .collect();

    Ok(Json(ServiceStatusResponse { items }))
}
