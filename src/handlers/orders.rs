use crate::{
    errors::ServiceError,
    integrations::shiprocket::ShipmentBooking,
    models::{order, OrderStatus},
    services::{
        orders::{CreateOrderRequest, OrderDetail, OrderFilter, UpdateOrderStatusRequest},
        returns::page_and_limit,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::coupons::{client_ip, device_id};

#[derive(Debug, Deserialize, Default, ToSchema, IntoParams)]
pub struct OrderListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<OrderStatus>,
    pub customer_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ShippedOrder {
    pub order: OrderDetail,
    pub shipment: ShipmentBooking,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<OrderDetail>),
        (status = 404, description = "Unknown customer or product", body = crate::errors::ErrorResponse),
        (status = 422, description = "Coupon rejected or insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderDetail>>), ServiceError> {
    payload.ip_address = client_ip(&headers);
    payload.device_id = device_id(&headers);
    let detail = state.services.orders.create_order(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(detail))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(OrderListQuery),
    responses((status = 200, description = "Orders", body = ApiResponse<PaginatedResponse<order::Model>>)),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<PaginatedResponse<order::Model>> {
    let (page, limit) = page_and_limit(query.page, query.limit);
    let (items, total) = state
        .services
        .orders
        .list_orders(OrderFilter {
            status: query.status,
            customer_id: query.customer_id,
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
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderDetail>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderDetail> {
    let detail = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderDetail>),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> ApiResult<OrderDetail> {
    let detail = state.services.orders.update_status(id, payload).await?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/ship",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Shipment booked", body = ApiResponse<ShippedOrder>),
        (status = 409, description = "Order cannot ship yet", body = crate::errors::ErrorResponse),
        (status = 502, description = "Shiprocket failure", body = crate::errors::ErrorResponse),
        (status = 503, description = "Shiprocket not configured", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn ship_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ShippedOrder> {
    let shiprocket = state.services.shiprocket()?;
    let (order, shipment) = state.services.orders.book_shipment(id, shiprocket).await?;
    Ok(Json(ApiResponse::success(ShippedOrder { order, shipment })))
}
