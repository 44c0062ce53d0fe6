use crate::{
    errors::ServiceError,
    integrations::cloudinary::{SignatureRequest, SignedUpload, UploadRequest, UploadedAsset},
    ApiResponse, ApiResult, AppState,
};
use axum::{extract::State, http::StatusCode, response::Json};
use chrono::Utc;
use validator::Validate;

#[utoipa::path(
    post,
    path = "/api/v1/uploads/signature",
    request_body = SignatureRequest,
    responses(
        (status = 200, description = "Parameters for a direct browser upload", body = ApiResponse<SignedUpload>),
        (status = 503, description = "Cloudinary not configured", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Uploads"
)]
pub async fn sign_upload(
    State(state): State<AppState>,
    Json(payload): Json<SignatureRequest>,
) -> ApiResult<SignedUpload> {
    payload.validate()?;
    let signed = state
        .services
        .cloudinary()?
        .signed_params(payload, Utc::now());
    Ok(Json(ApiResponse::success(signed)))
}

#[utoipa::path(
    post,
    path = "/api/v1/uploads",
    request_body = UploadRequest,
    responses(
        (status = 201, description = "Uploaded", body = ApiResponse<UploadedAsset>),
        (status = 400, description = "Bad file payload", body = crate::errors::ErrorResponse),
        (status = 503, description = "Cloudinary not configured", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Uploads"
)]
pub async fn upload_media(
    State(state): State<AppState>,
    Json(payload): Json<UploadRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UploadedAsset>>), ServiceError> {
    let asset = state.services.cloudinary()?.upload(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(asset))))
}
