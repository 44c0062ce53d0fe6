use crate::{
    models::{product, ProductStatus},
    services::{
        catalog::{AdjustInventoryRequest, CreateProductRequest, ProductFilter, UpdateProductRequest},
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
pub struct ProductListQuery {
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size (max 100)
    pub limit: Option<u64>,
    pub category: Option<String>,
    pub status: Option<ProductStatus>,
    /// Matches name or SKU
    pub search: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductListQuery),
    responses((status = 200, description = "Products", body = ApiResponse<PaginatedResponse<product::Model>>)),
    tag = "Products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductListQuery>,
) -> ApiResult<PaginatedResponse<product::Model>> {
    let (page, limit) = page_and_limit(query.page, query.limit);
    let (items, total) = state
        .services
        .catalog
        .list_products(ProductFilter {
            category: query.category,
            status: query.status,
            search: query.search,
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
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product", body = ApiResponse<product::Model>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<product::Model> {
    let product = state.services.catalog.get_product(id).await?;
    Ok(Json(ApiResponse::success(product)))
}

#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Created", body = ApiResponse<product::Model>),
        (status = 409, description = "Duplicate SKU", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<product::Model>>), crate::errors::ServiceError> {
    let created = state.services.catalog.create_product(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[utoipa::path(
    put,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = UpdateProductRequest,
    responses((status = 200, description = "Updated", body = ApiResponse<product::Model>)),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductRequest>,
) -> ApiResult<product::Model> {
    let updated = state.services.catalog.update_product(id, payload).await?;
    Ok(Json(ApiResponse::success(updated)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses((status = 200, description = "Archived", body = ApiResponse<product::Model>)),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn archive_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<product::Model> {
    let archived = state.services.catalog.archive_product(id).await?;
    Ok(Json(ApiResponse::success(archived)))
}

#[utoipa::path(
    post,
    path = "/api/v1/products/{id}/inventory",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = AdjustInventoryRequest,
    responses(
        (status = 200, description = "Stock adjusted", body = ApiResponse<product::Model>),
        (status = 422, description = "Would go negative", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Inventory"
)]
pub async fn adjust_inventory(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdjustInventoryRequest>,
) -> ApiResult<product::Model> {
    let product = state.services.catalog.adjust_inventory(id, payload).await?;
    Ok(Json(ApiResponse::success(product)))
}

#[utoipa::path(
    get,
    path = "/api/v1/inventory/low-stock",
    responses((status = 200, description = "Products at or below threshold", body = ApiResponse<Vec<product::Model>>)),
    security(("bearer_auth" = [])),
    tag = "Inventory"
)]
pub async fn low_stock(State(state): State<AppState>) -> ApiResult<Vec<product::Model>> {
    let products = state.services.catalog.low_stock().await?;
    Ok(Json(ApiResponse::success(products)))
}
