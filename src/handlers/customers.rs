use crate::{
    errors::ServiceError,
    models::{cart, customer},
    services::{
        customers::{CreateCustomerRequest, CustomerDetail},
        returns::page_and_limit,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Deserialize, Default, ToSchema, IntoParams)]
pub struct CustomerListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    /// Matches name or email
    pub search: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/customers",
    params(CustomerListQuery),
    responses((status = 200, description = "Customers", body = ApiResponse<PaginatedResponse<customer::Model>>)),
    security(("bearer_auth" = [])),
    tag = "Customers"
)]
pub async fn list_customers(
    State(state): State<AppState>,
    Query(query): Query<CustomerListQuery>,
) -> ApiResult<PaginatedResponse<customer::Model>> {
    let (page, limit) = page_and_limit(query.page, query.limit);
    let (items, total) = state
        .services
        .customers
        .list_customers(query.search, Some(page), Some(limit))
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, page, limit,
    ))))
}

#[utoipa::path(
    post,
    path = "/api/v1/customers",
    request_body = CreateCustomerRequest,
    responses(
        (status = 201, description = "Created", body = ApiResponse<customer::Model>),
        (status = 409, description = "Email already registered", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Customers"
)]
pub async fn create_customer(
    State(state): State<AppState>,
    Json(payload): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<ApiResponse<customer::Model>>), ServiceError> {
    let created = state.services.customers.create_customer(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[utoipa::path(
    get,
    path = "/api/v1/customers/{id}",
    params(("id" = Uuid, Path, description = "Customer id")),
    responses(
        (status = 200, description = "Customer with segments", body = ApiResponse<CustomerDetail>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Customers"
)]
pub async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<CustomerDetail> {
    let detail = state.services.customers.get_customer(id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    get,
    path = "/api/v1/customers/{id}/cart",
    params(("id" = Uuid, Path, description = "Customer id")),
    responses((status = 200, description = "Latest cart snapshot", body = ApiResponse<cart::Model>)),
    security(("bearer_auth" = [])),
    tag = "Customers"
)]
pub async fn get_customer_cart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<cart::Model> {
    let cart = state.services.carts.get_cart(id).await?;
    Ok(Json(ApiResponse::success(cart)))
}
