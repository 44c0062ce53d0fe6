//! Cloudinary media uploads.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, time::Duration};
use tracing::{info, instrument};
use utoipa::ToSchema;
use validator::Validate;

use crate::{config::CloudinaryConfig, errors::ServiceError};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Parameters that are sent with an upload but never signed.
const UNSIGNED_PARAMS: [&str; 4] = ["file", "api_key", "resource_type", "cloud_name"];

/// Signs upload parameters: sorted `k=v` pairs joined by `&`, followed by the
/// API secret, hashed with SHA-256 and hex encoded.
pub fn sign_upload(params: &BTreeMap<String, String>, api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .filter(|(k, v)| !v.is_empty() && !UNSIGNED_PARAMS.contains(&k.as_str()))
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Everything a browser needs to upload straight to Cloudinary.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignedUpload {
    pub cloud_name: String,
    pub api_key: String,
    pub timestamp: i64,
    pub folder: Option<String>,
    pub signature: String,
    pub upload_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
pub struct SignatureRequest {
    #[validate(length(min = 1, max = 128))]
    pub folder: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub public_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct UploadRequest {
    /// A `data:` URI, or bare base64 when `content_type` is given.
    #[validate(length(min = 1))]
    pub file: String,
    pub content_type: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UploadedAsset {
    pub secure_url: String,
    pub public_id: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Normalizes the payload to a data URI and enforces the size limit.
pub fn to_data_uri(file: &str, content_type: Option<&str>) -> Result<String, ServiceError> {
    let (mime, encoded) = match file.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| ServiceError::InvalidInput("malformed data URI".into()))?;
            let mime = header.strip_suffix(";base64").ok_or_else(|| {
                ServiceError::InvalidInput("data URI must be base64 encoded".into())
            })?;
            (mime.to_string(), data)
        }
        None => {
            let mime = content_type.ok_or_else(|| {
                ServiceError::InvalidInput("content_type is required for bare base64".into())
            })?;
            (mime.to_string(), file)
        }
    };

    if !(mime.starts_with("image/") || mime.starts_with("video/")) {
        return Err(ServiceError::InvalidInput(format!(
            "unsupported media type {}",
            mime
        )));
    }
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| ServiceError::InvalidInput("file is not valid base64".into()))?;
    if decoded.is_empty() {
        return Err(ServiceError::InvalidInput("file is empty".into()));
    }
    if decoded.len() > MAX_UPLOAD_BYTES {
        return Err(ServiceError::InvalidInput(format!(
            "file exceeds {} bytes",
            MAX_UPLOAD_BYTES
        )));
    }
    Ok(format!("data:{};base64,{}", mime, encoded.trim()))
}

#[derive(Debug, Clone)]
pub struct CloudinaryClient {
    http: reqwest::Client,
    config: CloudinaryConfig,
}

impl CloudinaryClient {
    pub fn new(config: CloudinaryConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("cloudinary client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn upload_url(&self) -> String {
        format!(
            "{}/{}/image/upload",
            self.config.base_url.trim_end_matches('/'),
            self.config.cloud_name
        )
    }

    fn folder_or_default(&self, folder: Option<String>) -> Option<String> {
        folder
            .filter(|f| !f.trim().is_empty())
            .or_else(|| self.config.upload_folder.clone())
    }

    pub fn signed_params(&self, request: SignatureRequest, now: DateTime<Utc>) -> SignedUpload {
        let timestamp = now.timestamp();
        let folder = self.folder_or_default(request.folder);

        let mut params = BTreeMap::new();
        params.insert("timestamp".to_string(), timestamp.to_string());
        if let Some(folder) = &folder {
            params.insert("folder".to_string(), folder.clone());
        }
        if let Some(public_id) = request.public_id {
            params.insert("public_id".to_string(), public_id);
        }

        SignedUpload {
            cloud_name: self.config.cloud_name.clone(),
            api_key: self.config.api_key.clone(),
            timestamp,
            folder,
            signature: sign_upload(&params, &self.config.api_secret),
            upload_url: self.upload_url(),
        }
    }

    #[instrument(skip(self, request), fields(folder = ?request.folder))]
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadedAsset, ServiceError> {
        request.validate()?;
        let file = to_data_uri(&request.file, request.content_type.as_deref())?;
        let folder = self.folder_or_default(request.folder);

        let mut params = BTreeMap::new();
        params.insert("timestamp".to_string(), Utc::now().timestamp().to_string());
        if let Some(folder) = folder {
            params.insert("folder".to_string(), folder);
        }
        let signature = sign_upload(&params, &self.config.api_secret);
        params.insert("signature".to_string(), signature);
        params.insert("signature_algorithm".to_string(), "sha256".to_string());
        params.insert("api_key".to_string(), self.config.api_key.clone());
        params.insert("file".to_string(), file);

        let reply = self
            .http
            .post(self.upload_url())
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("cloudinary upload: {}", e)))?;
        if !reply.status().is_success() {
            let status = reply.status();
            let detail = reply.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalServiceError(format!(
                "cloudinary returned {}: {}",
                status, detail
            )));
        }
        let asset: UploadedAsset = reply.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("cloudinary upload body: {}", e))
        })?;
        info!(public_id = %asset.public_id, "media uploaded");
        Ok(asset)
    }
}
