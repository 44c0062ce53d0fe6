use crate::{integrations::shiprocket::TrackingInfo, ApiResponse, ApiResult, AppState};
use axum::{
    extract::{Path, State},
    response::Json,
};

#[utoipa::path(
    get,
    path = "/api/v1/shipping/track/{awb}",
    params(("awb" = String, Path, description = "Air waybill number")),
    responses(
        (status = 200, description = "Current status and scan history", body = ApiResponse<TrackingInfo>),
        (status = 502, description = "Shiprocket failure", body = crate::errors::ErrorResponse),
        (status = 503, description = "Shiprocket not configured", body = crate::errors::ErrorResponse)
    ),
    tag = "Shipping"
)]
pub async fn track_shipment(
    State(state): State<AppState>,
    Path(awb): Path<String>,
) -> ApiResult<TrackingInfo> {
    let tracking = state.services.shiprocket()?.track(&awb).await?;
    Ok(Json(ApiResponse::success(tracking)))
}
