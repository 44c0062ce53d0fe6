//! Redemption-frequency fraud signals.
//!
//! Each signal counts coupon redemptions inside a sliding window. Any signal
//! over its limit raises a flag and fails the check.

use crate::config::CouponConfig;
use crate::errors::ServiceError;
use crate::models::coupon_usage;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

const IP_WEIGHT: f64 = 0.4;
const DEVICE_WEIGHT: f64 = 0.35;
const CUSTOMER_WEIGHT: f64 = 0.25;

/// Source of redemption counts.
#[async_trait]
pub trait UsageSignals: Send + Sync {
    async fn uses_by_ip(&self, ip: &str, since: DateTime<Utc>) -> Result<u64, ServiceError>;
    async fn uses_by_device(&self, device_id: &str, since: DateTime<Utc>)
        -> Result<u64, ServiceError>;
    async fn uses_by_customer(
        &self,
        customer_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;
}

/// Counts rows in `coupon_usages`.
pub struct DbUsageSignals {
    db: Arc<DatabaseConnection>,
}

impl DbUsageSignals {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UsageSignals for DbUsageSignals {
    async fn uses_by_ip(&self, ip: &str, since: DateTime<Utc>) -> Result<u64, ServiceError> {
        Ok(coupon_usage::Entity::find()
            .filter(coupon_usage::Column::IpAddress.eq(ip))
            .filter(coupon_usage::Column::CreatedAt.gte(since))
            .count(&*self.db)
            .await?)
    }

    async fn uses_by_device(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        Ok(coupon_usage::Entity::find()
            .filter(coupon_usage::Column::DeviceId.eq(device_id))
            .filter(coupon_usage::Column::CreatedAt.gte(since))
            .count(&*self.db)
            .await?)
    }

    async fn uses_by_customer(
        &self,
        customer_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        Ok(coupon_usage::Entity::find()
            .filter(coupon_usage::Column::CustomerId.eq(customer_id))
            .filter(coupon_usage::Column::CreatedAt.gte(since))
            .count(&*self.db)
            .await?)
    }
}

#[derive(Clone, Debug)]
pub struct FraudLimits {
    pub window: Duration,
    pub max_uses_per_ip: u64,
    pub max_uses_per_device: u64,
    pub max_uses_per_customer: u64,
}

impl From<&CouponConfig> for FraudLimits {
    fn from(cfg: &CouponConfig) -> Self {
        Self {
            window: Duration::hours(cfg.fraud_window_hours),
            max_uses_per_ip: cfg.max_uses_per_ip,
            max_uses_per_device: cfg.max_uses_per_device,
            max_uses_per_customer: cfg.max_uses_per_customer,
        }
    }
}

impl Default for FraudLimits {
    fn default() -> Self {
        (&CouponConfig::default()).into()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FraudFlag {
    IpVelocity,
    DeviceVelocity,
    CustomerVelocity,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FraudAssessment {
    /// In `[0, 1]`.
    pub risk_score: f64,
    pub flags: Vec<FraudFlag>,
}

impl FraudAssessment {
    pub fn passed(&self) -> bool {
        self.flags.is_empty()
    }

    fn clean() -> Self {
        Self {
            risk_score: 0.0,
            flags: Vec::new(),
        }
    }
}

/// Share of the limit already used, weighted. Reaching the limit is allowed;
/// only going past it flags.
fn score(count: u64, limit: u64, weight: f64) -> (f64, bool) {
    if count > limit {
        return (weight, true);
    }
    if limit == 0 {
        return (0.0, false);
    }
    (weight * 0.5 * count as f64 / limit as f64, false)
}

/// Evaluates every signal that has an identifier to look up.
///
/// The redemption being validated counts against each limit.
pub async fn assess(
    signals: &dyn UsageSignals,
    limits: &FraudLimits,
    customer_id: Option<Uuid>,
    ip_address: Option<&str>,
    device_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<FraudAssessment, ServiceError> {
    let since = now - limits.window;
    let mut assessment = FraudAssessment::clean();
    let mut total = 0.0;

    let mut apply = |count: u64, limit: u64, weight: f64, flag: FraudFlag| {
        let (s, flagged) = score(count + 1, limit, weight);
        total += s;
        if flagged {
            assessment.flags.push(flag);
        }
    };

    if let Some(ip) = ip_address.filter(|s| !s.trim().is_empty()) {
        let count = signals.uses_by_ip(ip, since).await?;
        apply(count, limits.max_uses_per_ip, IP_WEIGHT, FraudFlag::IpVelocity);
    }
    if let Some(device) = device_id.filter(|s| !s.trim().is_empty()) {
        let count = signals.uses_by_device(device, since).await?;
        apply(
            count,
            limits.max_uses_per_device,
            DEVICE_WEIGHT,
            FraudFlag::DeviceVelocity,
        );
    }
    if let Some(customer_id) = customer_id {
        let count = signals.uses_by_customer(customer_id, since).await?;
        apply(
            count,
            limits.max_uses_per_customer,
            CUSTOMER_WEIGHT,
            FraudFlag::CustomerVelocity,
        );
    }

    assessment.risk_score = total.clamp(0.0, 1.0);
    Ok(assessment)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Fixed counts for every lookup.
    pub(crate) struct FixedSignals {
        pub ip: u64,
        pub device: u64,
        pub customer: u64,
    }

    #[async_trait]
    impl UsageSignals for FixedSignals {
        async fn uses_by_ip(&self, _: &str, _: DateTime<Utc>) -> Result<u64, ServiceError> {
            Ok(self.ip)
        }
        async fn uses_by_device(&self, _: &str, _: DateTime<Utc>) -> Result<u64, ServiceError> {
            Ok(self.device)
        }
        async fn uses_by_customer(&self, _: Uuid, _: DateTime<Utc>) -> Result<u64, ServiceError> {
            Ok(self.customer)
        }
    }

    #[tokio::test]
    async fn quiet_history_passes_with_low_risk() {
        let signals = FixedSignals {
            ip: 0,
            device: 0,
            customer: 0,
        };
        let result = assess(
            &signals,
            &FraudLimits::default(),
            Some(Uuid::new_v4()),
            Some("10.0.0.1"),
            Some("device-1"),
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(result.passed());
        assert!(result.risk_score < 0.5);
    }

    #[tokio::test]
    async fn redemption_at_the_limit_is_allowed() {
        // 4 earlier uses + this one = 5, the ip limit.
        let signals = FixedSignals {
            ip: 4,
            device: 0,
            customer: 0,
        };
        let result = assess(
            &signals,
            &FraudLimits::default(),
            None,
            Some("10.0.0.1"),
            None,
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(result.passed());
    }

    #[tokio::test]
    async fn each_signal_over_limit_flags() {
        let signals = FixedSignals {
            ip: 5,
            device: 3,
            customer: 3,
        };
        let result = assess(
            &signals,
            &FraudLimits::default(),
            Some(Uuid::new_v4()),
            Some("10.0.0.1"),
            Some("device-1"),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(
            result.flags,
            vec![
                FraudFlag::IpVelocity,
                FraudFlag::DeviceVelocity,
                FraudFlag::CustomerVelocity
            ]
        );
        assert!(result.risk_score > 0.99 && result.risk_score <= 1.0);
    }

    #[tokio::test]
    async fn missing_identifiers_are_not_checked() {
        let signals = FixedSignals {
            ip: 100,
            device: 100,
            customer: 100,
        };
        let result = assess(
            &signals,
            &FraudLimits::default(),
            None,
            None,
            Some("   "),
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(result.passed());
        assert_eq!(result.risk_score, 0.0);
    }
}
