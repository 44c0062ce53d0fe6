//! Shiprocket shipping API client.
//!
//! The API hands out a bearer token from `/auth/login` that stays valid for
//! ten days. The client caches it and logs in again shortly before it lapses,
//! or immediately when the API answers 401.

use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    config::ShiprocketConfig,
    errors::ServiceError,
    models::{customer, order, order_item},
    services::orders::ShippingAddress,
};

const TOKEN_LIFETIME: Duration = Duration::from_secs(240 * 3600);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(3600);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

// Default parcel used when products carry no dimensions.
const PARCEL_LENGTH_CM: f64 = 20.0;
const PARCEL_BREADTH_CM: f64 = 15.0;
const PARCEL_HEIGHT_CM: f64 = 10.0;
const PARCEL_WEIGHT_KG: f64 = 0.5;

struct CachedToken {
    token: String,
    refresh_after: Instant,
}

/// Result of booking a shipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShipmentBooking {
    pub provider_order_id: String,
    pub shipment_id: String,
    pub awb_code: Option<String>,
    pub courier_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackingActivity {
    pub date: Option<String>,
    pub status: Option<String>,
    pub activity: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackingInfo {
    pub awb_code: String,
    pub current_status: Option<String>,
    pub activities: Vec<TrackingActivity>,
}

#[derive(Deserialize)]
struct LoginReply {
    token: String,
}

#[derive(Deserialize)]
struct AdhocOrderReply {
    order_id: serde_json::Value,
    shipment_id: serde_json::Value,
}

#[derive(Deserialize, Default)]
struct AwbData {
    awb_code: Option<String>,
    courier_name: Option<String>,
}

#[derive(Deserialize, Default)]
struct AwbResponse {
    #[serde(default)]
    data: AwbData,
}

#[derive(Deserialize)]
struct AwbReply {
    #[serde(default)]
    response: AwbResponse,
}

#[derive(Deserialize, Default)]
struct ShipmentTrack {
    current_status: Option<String>,
}

#[derive(Deserialize)]
struct RawActivity {
    date: Option<String>,
    status: Option<String>,
    activity: Option<String>,
    location: Option<String>,
}

#[derive(Deserialize, Default)]
struct TrackingData {
    #[serde(default)]
    shipment_track: Vec<ShipmentTrack>,
    #[serde(default)]
    shipment_track_activities: Option<Vec<RawActivity>>,
}

#[derive(Deserialize)]
struct TrackReply {
    #[serde(default)]
    tracking_data: TrackingData,
}

fn id_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn rupees(cents: i64) -> f64 {
    cents as f64 / 100.0
}

pub struct ShiprocketClient {
    http: reqwest::Client,
    config: ShiprocketConfig,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ShiprocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShiprocketClient")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl ShiprocketClient {
    pub fn new(config: ShiprocketConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("shiprocket client: {}", e)))?;
        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn token(&self) -> Result<String, ServiceError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_after {
                return Ok(token.token.clone());
            }
        }

        debug!("logging in to shiprocket");
        let reply = self
            .http
            .post(self.url("auth/login"))
            .json(&json!({
                "email": self.config.email,
                "password": self.config.password,
            }))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("shiprocket login: {}", e)))?;
        if !reply.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "shiprocket login returned {}",
                reply.status()
            )));
        }
        let login: LoginReply = reply.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("shiprocket login body: {}", e))
        })?;

        *cached = Some(CachedToken {
            token: login.token.clone(),
            refresh_after: Instant::now() + (TOKEN_LIFETIME - TOKEN_REFRESH_MARGIN),
        });
        Ok(login.token)
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }

    /// Authenticated JSON call; a 401 triggers one fresh login and retry.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ServiceError> {
        for attempt in 0..2 {
            let token = self.token().await?;
            let mut request = self.http.request(method.clone(), self.url(path)).bearer_auth(token);
            if let Some(body) = body {
                request = request.json(body);
            }
            let reply = request.send().await.map_err(|e| {
                ServiceError::ExternalServiceError(format!("shiprocket {}: {}", path, e))
            })?;

            let status = reply.status();
            if status == StatusCode::UNAUTHORIZED && attempt == 0 {
                warn!("shiprocket token rejected, logging in again");
                self.forget_token().await;
                continue;
            }
            if !status.is_success() {
                let detail = reply.text().await.unwrap_or_default();
                return Err(ServiceError::ExternalServiceError(format!(
                    "shiprocket {} returned {}: {}",
                    path, status, detail
                )));
            }
            return reply.json().await.map_err(|e| {
                ServiceError::ExternalServiceError(format!("shiprocket {} body: {}", path, e))
            });
        }
        Err(ServiceError::ExternalServiceError(
            "shiprocket rejected a fresh token".into(),
        ))
    }

    /// Creates the Shiprocket order and assigns an AWB.
    #[instrument(skip_all, fields(order_number = %order.order_number))]
    pub async fn create_shipment(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
        customer: &customer::Model,
    ) -> Result<ShipmentBooking, ServiceError> {
        let address: ShippingAddress = serde_json::from_value(order.shipping_address.clone())
            .map_err(|e| ServiceError::InvalidInput(format!("order has no usable address: {}", e)))?;
        let payload = self.adhoc_payload(order, items, customer, &address);

        let created: AdhocOrderReply = self
            .call(Method::POST, "orders/create/adhoc", Some(&payload))
            .await?;
        let shipment_id = id_string(&created.shipment_id);

        let awb: AwbReply = self
            .call(
                Method::POST,
                "courier/assign/awb",
                Some(&json!({ "shipment_id": shipment_id })),
            )
            .await?;

        let booking = ShipmentBooking {
            provider_order_id: id_string(&created.order_id),
            shipment_id,
            awb_code: awb.response.data.awb_code.filter(|a| !a.is_empty()),
            courier_name: awb.response.data.courier_name,
        };
        info!(shipment_id = %booking.shipment_id, awb = ?booking.awb_code, "shipment booked");
        Ok(booking)
    }

    fn adhoc_payload(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
        customer: &customer::Model,
        address: &ShippingAddress,
    ) -> serde_json::Value {
        let (first_name, last_name) = address
            .name
            .split_once(' ')
            .unwrap_or((address.name.as_str(), ""));
        let phone = address
            .phone
            .clone()
            .or_else(|| customer.phone.clone())
            .unwrap_or_default();
        let email = address.email.clone().unwrap_or_else(|| customer.email.clone());

        let order_items: Vec<serde_json::Value> = items
            .iter()
            .map(|item| {
                json!({
                    "name": item.name,
                    "sku": item.sku,
                    "units": item.quantity,
                    "selling_price": rupees(item.unit_price_cents),
                })
            })
            .collect();

        json!({
            "order_id": order.order_number,
            "order_date": order.created_at.format("%Y-%m-%d %H:%M").to_string(),
            "pickup_location": self.config.pickup_location,
            "billing_customer_name": first_name,
            "billing_last_name": last_name,
            "billing_address": address.line1,
            "billing_address_2": address.line2.clone().unwrap_or_default(),
            "billing_city": address.city,
            "billing_pincode": address.postal_code,
            "billing_state": address.state,
            "billing_country": address.country,
            "billing_email": email,
            "billing_phone": phone,
            "shipping_is_billing": true,
            "order_items": order_items,
            "payment_method": "Prepaid",
            "shipping_charges": rupees(order.shipping_cents),
            "total_discount": rupees(order.discount_cents),
            "sub_total": rupees(order.subtotal_cents),
            "length": PARCEL_LENGTH_CM,
            "breadth": PARCEL_BREADTH_CM,
            "height": PARCEL_HEIGHT_CM,
            "weight": PARCEL_WEIGHT_KG,
        })
    }

    /// Cancels a booked Shiprocket order.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, provider_order_id: &str) -> Result<(), ServiceError> {
        let id = provider_order_id
            .parse::<i64>()
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::from(provider_order_id));
        let _: serde_json::Value = self
            .call(Method::POST, "orders/cancel", Some(&json!({ "ids": [id] })))
            .await?;
        info!(provider_order_id, "shipment cancelled");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn track(&self, awb_code: &str) -> Result<TrackingInfo, ServiceError> {
        let awb = awb_code.trim();
        if awb.is_empty() || !awb.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ServiceError::InvalidInput("AWB code must be alphanumeric".into()));
        }
        let reply: TrackReply = self
            .call(Method::GET, &format!("courier/track/awb/{}", awb), None)
            .await?;

        let data = reply.tracking_data;
        Ok(TrackingInfo {
            awb_code: awb.to_string(),
            current_status: data
                .shipment_track
                .into_iter()
                .find_map(|t| t.current_status),
            activities: data
                .shipment_track_activities
                .unwrap_or_default()
                .into_iter()
                .map(|a| TrackingActivity {
                    date: a.date,
                    status: a.status,
                    activity: a.activity,
                    location: a.location,
                })
                .collect(),
        })
    }
}
