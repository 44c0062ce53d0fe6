use crate::{models::cart, services::carts::UpsertCartRequest, ApiResponse, ApiResult, AppState};
use axum::{
    extract::{Path, State},
    response::Json,
};
use uuid::Uuid;

/// Storefront cart snapshot, used for cart-abandoner segmentation.
#[utoipa::path(
    put,
    path = "/api/v1/carts/{customer_id}",
    params(("customer_id" = Uuid, Path, description = "Customer id")),
    request_body = UpsertCartRequest,
    responses(
        (status = 200, description = "Cart recorded", body = ApiResponse<cart::Model>),
        (status = 404, description = "Unknown customer", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn upsert_cart(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(payload): Json<UpsertCartRequest>,
) -> ApiResult<cart::Model> {
    let cart = state.services.carts.upsert_cart(customer_id, payload).await?;
    Ok(Json(ApiResponse::success(cart)))
}
