//! Intelligent coupon engine: segmentation, ordered eligibility rules, fraud
//! signals, recommendations and auto-apply.

pub mod fraud;
pub mod rules;
pub mod segments;

pub use fraud::{DbUsageSignals, FraudAssessment, FraudFlag, FraudLimits, UsageSignals};
pub use rules::{CartContext, CartLine, CouponRule, RuleFailure};
pub use segments::{CustomerProfile, CustomerSegment, SegmentThresholds};

use crate::{
    config::{AppConfig, ShippingConfig},
    db::DbPool,
    errors::ServiceError,
    events::{Event, EventSender},
    models::{coupon, coupon_usage, DiscountType},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Request to check one code against a cart.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub customer_id: Option<Uuid>,
    #[validate]
    pub cart: CartContext,
    /// Filled from the request headers; never read from the body.
    #[serde(skip_deserializing)]
    pub ip_address: Option<String>,
    #[serde(skip_deserializing)]
    pub device_id: Option<String>,
}

/// Request for every coupon a cart qualifies for.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct RecommendCouponsRequest {
    pub customer_id: Option<Uuid>,
    #[validate]
    pub cart: CartContext,
    /// Filled from the request headers; never read from the body.
    #[serde(skip_deserializing)]
    pub ip_address: Option<String>,
    #[serde(skip_deserializing)]
    pub device_id: Option<String>,
}

/// Outcome of a validation. Rejections are data, not errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CouponValidation {
    pub valid: bool,
    pub code: String,
    pub coupon_id: Option<Uuid>,
    pub discount_type: Option<DiscountType>,
    /// Rule that rejected the coupon.
    pub rule: Option<CouponRule>,
    pub message: String,
    pub discount_cents: i64,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub segments: Vec<CustomerSegment>,
    pub risk_score: Option<f64>,
}

impl CouponValidation {
    /// Converts a rejection into the error used by checkout.
    pub fn into_result(self) -> Result<Self, ServiceError> {
        if self.valid {
            return Ok(self);
        }
        Err(ServiceError::CouponRejected {
            rule: self
                .rule
                .map(|r| r.to_string())
                .unwrap_or_else(|| "invalid".to_string()),
            message: self.message,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecommendedCoupon {
    pub coupon_id: Uuid,
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_cents: i64,
    pub auto_apply: bool,
}

/// A redemption to record against an order.
#[derive(Clone, Debug)]
pub struct Redemption {
    pub coupon_id: Uuid,
    pub customer_id: Uuid,
    pub order_id: Option<Uuid>,
    pub discount_cents: i64,
    pub ip_address: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct CreateCouponRequest {
    #[validate(length(min = 3, max = 64))]
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub discount_value: i64,
    #[validate(range(min = 0))]
    pub max_discount_cents: Option<i64>,
    #[validate(range(min = 0))]
    pub min_cart_value_cents: Option<i64>,
    #[validate(range(min = 1))]
    pub min_quantity: Option<i32>,
    #[serde(default)]
    pub target_segments: Vec<CustomerSegment>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub valid_days: Vec<String>,
    #[validate(range(min = 0))]
    pub min_order_count: Option<i32>,
    #[validate(range(min = 0))]
    pub max_order_count: Option<i32>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
    #[validate(range(min = 1))]
    pub per_customer_limit: Option<i32>,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Partial update; absent fields are left unchanged.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema, Validate)]
pub struct UpdateCouponRequest {
    pub description: Option<String>,
    pub discount_type: Option<DiscountType>,
    #[validate(range(min = 0))]
    pub discount_value: Option<i64>,
    #[validate(range(min = 0))]
    pub max_discount_cents: Option<i64>,
    #[validate(range(min = 0))]
    pub min_cart_value_cents: Option<i64>,
    #[validate(range(min = 1))]
    pub min_quantity: Option<i32>,
    pub target_segments: Option<Vec<CustomerSegment>>,
    pub categories: Option<Vec<String>>,
    pub valid_days: Option<Vec<String>>,
    #[validate(range(min = 0))]
    pub min_order_count: Option<i32>,
    #[validate(range(min = 0))]
    pub max_order_count: Option<i32>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
    #[validate(range(min = 1))]
    pub per_customer_limit: Option<i32>,
    pub auto_apply: Option<bool>,
    pub is_active: Option<bool>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

/// Trimmed, upper-cased code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn normalize_days(days: &[String]) -> Result<Vec<String>, ServiceError> {
    days.iter()
        .map(|d| {
            rules::normalize_weekday(d)
                .map(str::to_string)
                .ok_or_else(|| ServiceError::ValidationError(format!("Unknown weekday: {}", d)))
        })
        .collect()
}

fn normalize_categories(categories: &[String]) -> Vec<String> {
    categories
        .iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Cross-field checks the derive cannot express.
fn check_coupon_shape(coupon: &coupon::Model) -> Result<(), ServiceError> {
    match coupon.discount_type {
        DiscountType::Percentage if !(1..=100).contains(&coupon.discount_value) => {
            return Err(ServiceError::ValidationError(
                "percentage discount_value must be between 1 and 100".into(),
            ));
        }
        DiscountType::FixedAmount if coupon.discount_value <= 0 => {
            return Err(ServiceError::ValidationError(
                "fixed_amount discount_value must be positive".into(),
            ));
        }
        _ => {}
    }
    if let (Some(start), Some(end)) = (coupon.starts_at, coupon.ends_at) {
        if start > end {
            return Err(ServiceError::ValidationError(
                "starts_at must not be after ends_at".into(),
            ));
        }
    }
    if let (Some(min), Some(max)) = (coupon.min_order_count, coupon.max_order_count) {
        if min > max {
            return Err(ServiceError::ValidationError(
                "min_order_count must not exceed max_order_count".into(),
            ));
        }
    }
    Ok(())
}

fn segment_names(segments: &[CustomerSegment]) -> serde_json::Value {
    json!(segments.iter().map(ToString::to_string).collect::<Vec<_>>())
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    thresholds: SegmentThresholds,
    fraud_limits: FraudLimits,
    shipping: ShippingConfig,
    auto_apply_segment: CustomerSegment,
    signals: Arc<dyn UsageSignals>,
}

impl CouponService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let auto_apply_segment = CustomerSegment::from_str(&config.coupons.auto_apply_segment)
            .unwrap_or_else(|_| {
                warn!(
                    segment = %config.coupons.auto_apply_segment,
                    "unknown auto-apply segment, using new_user"
                );
                CustomerSegment::NewUser
            });
        Self {
            signals: Arc::new(DbUsageSignals::new(db.clone())),
            db,
            event_sender,
            thresholds: (&config.coupons).into(),
            fraud_limits: (&config.coupons).into(),
            shipping: config.shipping.clone(),
            auto_apply_segment,
        }
    }

    /// Replaces the redemption-count source.
    pub fn with_signals(mut self, signals: Arc<dyn UsageSignals>) -> Self {
        self.signals = signals;
        self
    }

    pub fn shipping(&self) -> &ShippingConfig {
        &self.shipping
    }

    /// Computes the customer's aggregates and segments.
    #[instrument(skip(self))]
    pub async fn segment_customer(
        &self,
        customer_id: Option<Uuid>,
    ) -> Result<CustomerProfile, ServiceError> {
        segments::load_profile(&*self.db, customer_id, &self.thresholds, Utc::now()).await
    }

    pub async fn validate_coupon(
        &self,
        request: ValidateCouponRequest,
    ) -> Result<CouponValidation, ServiceError> {
        self.validate_coupon_at(request, Utc::now()).await
    }

    /// Runs every rule in order as of `now`.
    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn validate_coupon_at(
        &self,
        request: ValidateCouponRequest,
        now: DateTime<Utc>,
    ) -> Result<CouponValidation, ServiceError> {
        request.validate()?;
        let db = &*self.db;
        let code = normalize_code(&request.code);
        let subtotal = request.cart.subtotal_cents();
        let shipping = request
            .cart
            .shipping_cents
            .unwrap_or_else(|| self.shipping.charge_for(subtotal));
        let profile =
            segments::load_profile(db, request.customer_id, &self.thresholds, now).await?;

        let mut outcome = CouponValidation {
            valid: false,
            code: code.clone(),
            coupon_id: None,
            discount_type: None,
            rule: None,
            message: String::new(),
            discount_cents: 0,
            subtotal_cents: subtotal,
            shipping_cents: shipping,
            segments: profile.segments.clone(),
            risk_score: None,
        };

        let coupon = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code.as_str()))
            .one(db)
            .await?;
        let Some(coupon) = coupon else {
            return Ok(reject(outcome, RuleFailure::new(CouponRule::NotFound, "Coupon not found")));
        };
        outcome.coupon_id = Some(coupon.id);
        outcome.discount_type = Some(coupon.discount_type);

        let customer_uses = self.customer_uses(db, coupon.id, request.customer_id).await?;
        let ctx = rules::RuleContext {
            cart: &request.cart,
            profile: &profile,
            customer_uses,
            now,
        };
        if let Err(failure) = rules::evaluate(&coupon, &ctx) {
            return Ok(reject(outcome, failure));
        }

        let assessment = fraud::assess(
            self.signals.as_ref(),
            &self.fraud_limits,
            request.customer_id,
            request.ip_address.as_deref(),
            request.device_id.as_deref(),
            now,
        )
        .await?;
        outcome.risk_score = Some(assessment.risk_score);
        if !assessment.passed() {
            warn!(
                code = %code,
                flags = ?assessment.flags,
                risk_score = assessment.risk_score,
                "coupon blocked by fraud signals"
            );
            return Ok(reject(
                outcome,
                RuleFailure::new(
                    CouponRule::Fraud,
                    "This coupon cannot be applied right now. Please contact support.",
                ),
            ));
        }

        outcome.discount_cents = rules::compute_discount(&coupon, subtotal, shipping);
        outcome.valid = true;
        outcome.message = "Coupon applied".to_string();
        counter!("storefront_coupons.validations", 1, "result" => "valid");
        Ok(outcome)
    }

    /// Every eligible active coupon, best discount first, ties by code.
    #[instrument(skip(self, request))]
    pub async fn recommend_coupons(
        &self,
        request: RecommendCouponsRequest,
    ) -> Result<Vec<RecommendedCoupon>, ServiceError> {
        let now = Utc::now();
        request.validate()?;
        let profile =
            segments::load_profile(&*self.db, request.customer_id, &self.thresholds, now).await?;
        self.recommend_for(&request, &profile, now).await
    }

    async fn recommend_for(
        &self,
        request: &RecommendCouponsRequest,
        profile: &CustomerProfile,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecommendedCoupon>, ServiceError> {
        let db = &*self.db;
        let assessment = fraud::assess(
            self.signals.as_ref(),
            &self.fraud_limits,
            request.customer_id,
            request.ip_address.as_deref(),
            request.device_id.as_deref(),
            now,
        )
        .await?;
        if !assessment.passed() {
            warn!(flags = ?assessment.flags, "skipping recommendations for flagged shopper");
            return Ok(Vec::new());
        }

        let subtotal = request.cart.subtotal_cents();
        let shipping = request
            .cart
            .shipping_cents
            .unwrap_or_else(|| self.shipping.charge_for(subtotal));

        let candidates = coupon::Entity::find()
            .filter(coupon::Column::IsActive.eq(true))
            .all(db)
            .await?;

        let mut eligible = Vec::new();
        for coupon in candidates {
            let customer_uses = self.customer_uses(db, coupon.id, request.customer_id).await?;
            let ctx = rules::RuleContext {
                cart: &request.cart,
                profile,
                customer_uses,
                now,
            };
            if rules::evaluate(&coupon, &ctx).is_err() {
                continue;
            }
            eligible.push(RecommendedCoupon {
                coupon_id: coupon.id,
                discount_cents: rules::compute_discount(&coupon, subtotal, shipping),
                code: coupon.code,
                description: coupon.description,
                discount_type: coupon.discount_type,
                auto_apply: coupon.auto_apply,
            });
        }

        eligible.sort_by(|a, b| {
            b.discount_cents
                .cmp(&a.discount_cents)
                .then_with(|| a.code.cmp(&b.code))
        });
        Ok(eligible)
    }

    /// Best auto-apply coupon, only for customers in the auto-apply segment.
    #[instrument(skip(self, request))]
    pub async fn auto_apply(
        &self,
        request: RecommendCouponsRequest,
    ) -> Result<Option<RecommendedCoupon>, ServiceError> {
        let now = Utc::now();
        let profile =
            segments::load_profile(&*self.db, request.customer_id, &self.thresholds, now).await?;
        if !profile.is_in(self.auto_apply_segment) {
            return Ok(None);
        }
        let best = self
            .recommend_for(&request, &profile, now)
            .await?
            .into_iter()
            .find(|c| c.auto_apply);
        if let Some(best) = &best {
            info!(code = %best.code, discount_cents = best.discount_cents, "auto-applied coupon");
        }
        Ok(best)
    }

    /// Records a redemption and bumps `usage_count` on the given connection,
    /// normally the caller's transaction. Fails if the global limit was
    /// reached in the meantime.
    pub async fn redeem<C: ConnectionTrait>(
        &self,
        db: &C,
        redemption: Redemption,
    ) -> Result<coupon_usage::Model, ServiceError> {
        let now = Utc::now();
        let result = coupon::Entity::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Id.eq(redemption.coupon_id))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(coupon::Column::UsageCount)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .exec(db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::CouponRejected {
                rule: CouponRule::UsageLimit.to_string(),
                message: "This coupon has reached its usage limit".into(),
            });
        }

        let usage = coupon_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(redemption.coupon_id),
            customer_id: Set(redemption.customer_id),
            order_id: Set(redemption.order_id),
            ip_address: Set(redemption.ip_address),
            device_id: Set(redemption.device_id),
            discount_cents: Set(redemption.discount_cents),
            created_at: Set(now),
        }
        .insert(db)
        .await?;

        counter!("storefront_coupons.redemptions", 1);
        Ok(usage)
    }

    async fn customer_uses<C: ConnectionTrait>(
        &self,
        db: &C,
        coupon_id: Uuid,
        customer_id: Option<Uuid>,
    ) -> Result<u64, ServiceError> {
        let Some(customer_id) = customer_id else {
            return Ok(0);
        };
        Ok(coupon_usage::Entity::find()
            .filter(coupon_usage::Column::CouponId.eq(coupon_id))
            .filter(coupon_usage::Column::CustomerId.eq(customer_id))
            .count(db)
            .await?)
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_coupon(
        &self,
        request: CreateCouponRequest,
    ) -> Result<coupon::Model, ServiceError> {
        request.validate()?;
        let db = &*self.db;
        let code = normalize_code(&request.code);

        let existing = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code.as_str()))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let model = coupon::Model {
            id: Uuid::new_v4(),
            code,
            description: request.description,
            discount_type: request.discount_type,
            discount_value: request.discount_value,
            max_discount_cents: request.max_discount_cents,
            min_cart_value_cents: request.min_cart_value_cents,
            min_quantity: request.min_quantity,
            target_segments: segment_names(&request.target_segments),
            categories: json!(normalize_categories(&request.categories)),
            valid_days: json!(normalize_days(&request.valid_days)?),
            min_order_count: request.min_order_count,
            max_order_count: request.max_order_count,
            usage_limit: request.usage_limit,
            per_customer_limit: request.per_customer_limit,
            usage_count: 0,
            auto_apply: request.auto_apply,
            is_active: request.is_active,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            created_at: now,
            updated_at: now,
        };
        check_coupon_shape(&model)?;

        let active: coupon::ActiveModel = model.into();
        let created = active.insert(db).await.map_err(|e| {
            let err = ServiceError::from(e);
            if err.is_unique_violation() {
                ServiceError::Conflict("Coupon code already exists".into())
            } else {
                err
            }
        })?;

        info!(coupon_id = %created.id, code = %created.code, "coupon created");
        self.event_sender
            .send_or_log(Event::CouponCreated(created.id))
            .await;
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_coupon(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        coupon::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))
    }

    #[instrument(skip(self))]
    pub async fn list_coupons(
        &self,
        page: u64,
        limit: u64,
        active: Option<bool>,
    ) -> Result<(Vec<coupon::Model>, u64), ServiceError> {
        let mut query = coupon::Entity::find().order_by_desc(coupon::Column::CreatedAt);
        if let Some(active) = active {
            query = query.filter(coupon::Column::IsActive.eq(active));
        }
        let paginator = query.paginate(&*self.db, limit.max(1));
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.max(1) - 1).await?;
        Ok((items, total))
    }

    #[instrument(skip(self, request))]
    pub async fn update_coupon(
        &self,
        id: Uuid,
        request: UpdateCouponRequest,
    ) -> Result<coupon::Model, ServiceError> {
        request.validate()?;
        let mut model = self.get_coupon(id).await?;

        if let Some(v) = request.description {
            model.description = Some(v);
        }
        if let Some(v) = request.discount_type {
            model.discount_type = v;
        }
        if let Some(v) = request.discount_value {
            model.discount_value = v;
        }
        if let Some(v) = request.max_discount_cents {
            model.max_discount_cents = Some(v);
        }
        if let Some(v) = request.min_cart_value_cents {
            model.min_cart_value_cents = Some(v);
        }
        if let Some(v) = request.min_quantity {
            model.min_quantity = Some(v);
        }
        if let Some(v) = request.target_segments {
            model.target_segments = segment_names(&v);
        }
        if let Some(v) = request.categories {
            model.categories = json!(normalize_categories(&v));
        }
        if let Some(v) = request.valid_days {
            model.valid_days = json!(normalize_days(&v)?);
        }
        if let Some(v) = request.min_order_count {
            model.min_order_count = Some(v);
        }
        if let Some(v) = request.max_order_count {
            model.max_order_count = Some(v);
        }
        if let Some(v) = request.usage_limit {
            model.usage_limit = Some(v);
        }
        if let Some(v) = request.per_customer_limit {
            model.per_customer_limit = Some(v);
        }
        if let Some(v) = request.auto_apply {
            model.auto_apply = v;
        }
        if let Some(v) = request.is_active {
            model.is_active = v;
        }
        if let Some(v) = request.starts_at {
            model.starts_at = Some(v);
        }
        if let Some(v) = request.ends_at {
            model.ends_at = Some(v);
        }
        check_coupon_shape(&model)?;
        model.updated_at = Utc::now();

        let active: coupon::ActiveModel = model.into();
        let active = active.reset_all();
        Ok(active.update(&*self.db).await?)
    }

    /// Soft delete: the coupon stays for history but no longer validates.
    #[instrument(skip(self))]
    pub async fn deactivate_coupon(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        let model = self.get_coupon(id).await?;
        let mut active: coupon::ActiveModel = model.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;
        self.event_sender
            .send_or_log(Event::CouponDeactivated(updated.id))
            .await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn list_usages(
        &self,
        coupon_id: Uuid,
    ) -> Result<Vec<coupon_usage::Model>, ServiceError> {
        self.get_coupon(coupon_id).await?;
        Ok(coupon_usage::Entity::find()
            .filter(coupon_usage::Column::CouponId.eq(coupon_id))
            .order_by_desc(coupon_usage::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

fn reject(mut outcome: CouponValidation, failure: RuleFailure) -> CouponValidation {
    counter!("storefront_coupons.validations", 1, "result" => "rejected");
    info!(code = %outcome.code, rule = %failure.rule, "coupon rejected");
    outcome.valid = false;
    outcome.rule = Some(failure.rule);
    outcome.message = failure.message;
    outcome.discount_cents = 0;
    outcome
}
