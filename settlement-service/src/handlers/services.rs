//! HTTP surface for partner service records.

use crate::dtos::payments::DeleteResponse;
use crate::dtos::services::{
    BulkCreateRequest, BulkCreateResponse, CreateServiceRequest, ServiceGetParams,
    ServiceListParams, ServiceListResponse, ServiceResponse, UpdateServiceRequest,
};
use crate::middleware::auth::AuthContext;
use crate::services::engine::end_of_day;
use crate::services::store::{ServiceQuery, ServiceSort, SortDir};
use crate::startup::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use service_core::error::AppError;
use validator::Validate;

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 500;

pub async fn list_services(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ServiceListParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = ServiceQuery {
        partner: params.partner,
        service_type: params.service_type,
        team: params.team,
        status: params.status,
        date_from: params.date_from,
        date_to: params.date_to.map(end_of_day),
        text: params.q,
        sort: params
            .sort_by
            .as_deref()
            .map(ServiceSort::parse)
            .unwrap_or_default(),
        dir: params
            .sort_dir
            .as_deref()
            .map(SortDir::parse)
            .unwrap_or_default(),
        page: params.page.unwrap_or(1).max(1),
        page_size: params
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE),
    };

    let page = state
        .engine
        .list_services(&auth, query, params.with_lock)
        .await?;
    let total_pages = page.total_pages();

    Ok(Json(ServiceListResponse {
        items: page
            .items
            .into_iter()
            .map(|(service, lock)| ServiceResponse::with_lock(service, lock))
            .collect(),
        total: page.total,
        page: page.page,
        page_size: page.page_size,
        total_pages,
    }))
}

pub async fn create_service(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreateServiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let service = state.engine.create_service(&auth, request).await?;
    Ok((StatusCode::CREATED, Json(ServiceResponse::from(service))))
}

pub async fn create_services_bulk(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<BulkCreateRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    for item in &request.items {
        item.validate()?;
    }

    let services = state.engine.create_services(&auth, request.items).await?;
    Ok((
        StatusCode::CREATED,
        Json(BulkCreateResponse {
            inserted: services.len(),
            items: services.into_iter().map(ServiceResponse::from).collect(),
        }),
    ))
}

pub async fn get_service(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
    Query(params): Query<ServiceGetParams>,
) -> Result<impl IntoResponse, AppError> {
    let (service, lock) = state
        .engine
        .get_service(&auth, &id, params.with_lock)
        .await?;
    Ok(Json(ServiceResponse::with_lock(service, lock)))
}

pub async fn update_service(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(request): Json<UpdateServiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let service = state.engine.update_service(&auth, &id, request).await?;
    Ok(Json(ServiceResponse::from(service)))
}

pub async fn delete_service(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.engine.delete_service(&auth, &id).await?;
    Ok(Json(DeleteResponse { ok: true }))
}
