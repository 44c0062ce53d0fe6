use crate::{
    errors::ServiceError,
    models::{coupon, coupon_usage},
    services::{
        coupons::{
            CouponValidation, CreateCouponRequest, CustomerProfile, RecommendCouponsRequest,
            RecommendedCoupon, UpdateCouponRequest, ValidateCouponRequest,
        },
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

pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// First hop of `x-forwarded-for`, falling back to `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

pub fn device_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(DEVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Deserialize, Default, ToSchema, IntoParams)]
pub struct CouponListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub active: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Recommendations {
    pub coupons: Vec<RecommendedCoupon>,
    /// Coupon checkout would apply on its own, if any.
    pub auto_apply: Option<RecommendedCoupon>,
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    request_body = ValidateCouponRequest,
    responses((status = 200, description = "Validation outcome; rejections carry the failing rule", body = ApiResponse<CouponValidation>)),
    tag = "Coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<ValidateCouponRequest>,
) -> ApiResult<CouponValidation> {
    payload.ip_address = client_ip(&headers);
    payload.device_id = device_id(&headers);
    let outcome = state.services.coupons.validate_coupon(payload).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons/recommend",
    request_body = RecommendCouponsRequest,
    responses((status = 200, description = "Eligible coupons, best first", body = ApiResponse<Recommendations>)),
    tag = "Coupons"
)]
pub async fn recommend_coupons(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<RecommendCouponsRequest>,
) -> ApiResult<Recommendations> {
    payload.ip_address = client_ip(&headers);
    payload.device_id = device_id(&headers);
    let coupons = state
        .services
        .coupons
        .recommend_coupons(payload.clone())
        .await?;
    let auto_apply = state.services.coupons.auto_apply(payload).await?;
    Ok(Json(ApiResponse::success(Recommendations {
        coupons,
        auto_apply,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/customers/{id}/segments",
    params(("id" = Uuid, Path, description = "Customer id")),
    responses((status = 200, description = "Computed segments", body = ApiResponse<CustomerProfile>)),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn customer_segments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<CustomerProfile> {
    let profile = state.services.coupons.segment_customer(Some(id)).await?;
    Ok(Json(ApiResponse::success(profile)))
}

#[utoipa::path(
    get,
    path = "/api/v1/coupons",
    params(CouponListQuery),
    responses((status = 200, description = "Coupons", body = ApiResponse<PaginatedResponse<coupon::Model>>)),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    Query(query): Query<CouponListQuery>,
) -> ApiResult<PaginatedResponse<coupon::Model>> {
    let (page, limit) = page_and_limit(query.page, query.limit);
    let (items, total) = state
        .services
        .coupons
        .list_coupons(page, limit, query.active)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, page, limit,
    ))))
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    request_body = CreateCouponRequest,
    responses(
        (status = 201, description = "Created", body = ApiResponse<coupon::Model>),
        (status = 409, description = "Duplicate code", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    Json(payload): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<ApiResponse<coupon::Model>>), ServiceError> {
    let created = state.services.coupons.create_coupon(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[utoipa::path(
    get,
    path = "/api/v1/coupons/{id}",
    params(("id" = Uuid, Path, description = "Coupon id")),
    responses((status = 200, description = "Coupon", body = ApiResponse<coupon::Model>)),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn get_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<coupon::Model> {
    let coupon = state.services.coupons.get_coupon(id).await?;
    Ok(Json(ApiResponse::success(coupon)))
}

#[utoipa::path(
    put,
    path = "/api/v1/coupons/{id}",
    params(("id" = Uuid, Path, description = "Coupon id")),
    request_body = UpdateCouponRequest,
    responses((status = 200, description = "Updated", body = ApiResponse<coupon::Model>)),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn update_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCouponRequest>,
) -> ApiResult<coupon::Model> {
    let coupon = state.services.coupons.update_coupon(id, payload).await?;
    Ok(Json(ApiResponse::success(coupon)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/coupons/{id}",
    params(("id" = Uuid, Path, description = "Coupon id")),
    responses((status = 200, description = "Deactivated", body = ApiResponse<coupon::Model>)),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn deactivate_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<coupon::Model> {
    let coupon = state.services.coupons.deactivate_coupon(id).await?;
    Ok(Json(ApiResponse::success(coupon)))
}

#[utoipa::path(
    get,
    path = "/api/v1/coupons/{id}/usages",
    params(("id" = Uuid, Path, description = "Coupon id")),
    responses((status = 200, description = "Redemptions, newest first", body = ApiResponse<Vec<coupon_usage::Model>>)),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn list_usages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<coupon_usage::Model>> {
    let usages = state.services.coupons.list_usages(id).await?;
    Ok(Json(ApiResponse::success(usages)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.9"));

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }
}
