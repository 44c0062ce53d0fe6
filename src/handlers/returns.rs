use crate::{
    auth::AdminSession,
    errors::ServiceError,
    models::{return_request, ReturnStatus},
    services::returns::{
        page_and_limit, CreateReturnRequest, ReturnDetail, ReturnFilter, ReturnStats,
        UpdateReturnStatusRequest,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Deserialize, Default, ToSchema, IntoParams)]
pub struct ReturnListQuery {
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size (max 100)
    pub limit: Option<u64>,
    pub status: Option<ReturnStatus>,
    pub customer_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    /// Inclusive lower bound on creation time
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on creation time
    pub created_to: Option<DateTime<Utc>>,
}

#[utoipa::path(
    post,
    path = "/api/v1/returns",
    request_body = CreateReturnRequest,
    responses(
        (status = 201, description = "Return opened", body = ApiResponse<ReturnDetail>),
        (status = 400, description = "Invalid items or quantities", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Returns"
)]
pub async fn create_return(
    State(state): State<AppState>,
    Json(payload): Json<CreateReturnRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ReturnDetail>>), ServiceError> {
    let created = state.services.returns.create_return(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[utoipa::path(
    get,
    path = "/api/v1/returns",
    params(ReturnListQuery),
    responses((status = 200, description = "Returns, newest first", body = ApiResponse<PaginatedResponse<return_request::Model>>)),
    security(("bearer_auth" = [])),
    tag = "Returns"
)]
pub async fn list_returns(
    State(state): State<AppState>,
    Query(query): Query<ReturnListQuery>,
) -> ApiResult<PaginatedResponse<return_request::Model>> {
    let (page, limit) = page_and_limit(query.page, query.limit);
    let (items, total) = state
        .services
        .returns
        .list_returns(ReturnFilter {
            status: query.status,
            customer_id: query.customer_id,
            order_id: query.order_id,
            created_from: query.created_from,
            created_to: query.created_to,
            page: Some(page),
            limit: Some(limit),
        })
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, page, limit,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/returns/stats",
    responses((status = 200, description = "Counts per status and refund totals", body = ApiResponse<ReturnStats>)),
    security(("bearer_auth" = [])),
    tag = "Returns"
)]
pub async fn return_stats(State(state): State<AppState>) -> ApiResult<ReturnStats> {
    let stats = state.services.returns.stats().await?;
    Ok(Json(ApiResponse::success(stats)))
}

#[utoipa::path(
    get,
    path = "/api/v1/returns/{id}",
    params(("id" = Uuid, Path, description = "Return id")),
    responses(
        (status = 200, description = "Return with items and history", body = ApiResponse<ReturnDetail>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Returns"
)]
pub async fn get_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ReturnDetail> {
    let detail = state.services.returns.get_return(id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    put,
    path = "/api/v1/returns/{id}/status",
    params(("id" = Uuid, Path, description = "Return id")),
    request_body = UpdateReturnStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<ReturnDetail>),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Returns"
)]
pub async fn update_return_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    session: Option<Extension<AdminSession>>,
    Json(payload): Json<UpdateReturnStatusRequest>,
) -> ApiResult<ReturnDetail> {
    let actor = session.map(|Extension(s)| s.email);
    let detail = state
        .services
        .returns
        .update_status(id, payload, actor)
        .await?;
    Ok(Json(ApiResponse::success(detail)))
}
