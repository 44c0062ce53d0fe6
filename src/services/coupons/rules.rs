//! Ordered eligibility rules and discount maths.

use super::segments::{CustomerProfile, CustomerSegment};
use crate::models::{coupon, DiscountType};
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Machine code of the rule that rejected a coupon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CouponRule {
    NotFound,
    Inactive,
    NotStarted,
    Expired,
    UsageLimit,
    PerCustomerLimit,
    MinCartValue,
    MinQuantity,
    Segment,
    Category,
    Weekday,
    OrderCount,
    Fraud,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleFailure {
    pub rule: CouponRule,
    pub message: String,
}

impl RuleFailure {
    pub fn new(rule: CouponRule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

/// One line of the cart being priced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
pub struct CartLine {
    pub product_id: Option<Uuid>,
    #[validate(length(min = 1))]
    pub category: String,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
    #[validate(range(min = 0, max = 100000000000))]
    pub unit_price_cents: i64,
}

/// The cart a coupon is evaluated against.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "validate_cart_total"))]
pub struct CartContext {
    #[validate]
    pub items: Vec<CartLine>,
    /// Shipping charge; derived from the shipping settings when absent.
    #[serde(default)]
    #[validate(range(min = 0, max = 100000000000))]
    pub shipping_cents: Option<i64>,
}

fn validate_cart_total(cart: &CartContext) -> Result<(), ValidationError> {
    match cart.checked_subtotal_cents() {
        Some(_) => Ok(()),
        None => Err(ValidationError::new("cart_total_overflow")),
    }
}

impl CartContext {
    /// `None` when the cart total does not fit in an `i64`.
    pub fn checked_subtotal_cents(&self) -> Option<i64> {
        self.items.iter().try_fold(0i64, |total, line| {
            line.unit_price_cents
                .checked_mul(i64::from(line.quantity))
                .and_then(|amount| total.checked_add(amount))
        })
    }

    /// Saturates at `i64::MAX`; validated carts never get there.
    pub fn subtotal_cents(&self) -> i64 {
        self.checked_subtotal_cents().unwrap_or(i64::MAX)
    }

    pub fn total_quantity(&self) -> i64 {
        self.items.iter().map(|line| i64::from(line.quantity)).sum()
    }

    pub fn has_category_in(&self, categories: &[String]) -> bool {
        self.items.iter().any(|line| {
            categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(line.category.trim()))
        })
    }
}

/// Everything the non-fraud rules look at.
pub struct RuleContext<'a> {
    pub cart: &'a CartContext,
    pub profile: &'a CustomerProfile,
    /// Lifetime redemptions of this coupon by this customer.
    pub customer_uses: u64,
    pub now: DateTime<Utc>,
}

const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// Accepts `mon`, `Monday`, `MON`... and returns the three-letter form.
pub fn normalize_weekday(value: &str) -> Option<&'static str> {
    let lowered = value.trim().to_ascii_lowercase();
    if lowered.len() < 3 {
        return None;
    }
    let full = [
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
    ];
    WEEKDAYS
        .iter()
        .zip(full.iter())
        .find(|(short, long)| lowered == **short || lowered == **long)
        .map(|(short, _)| *short)
}

fn weekday_name(now: DateTime<Utc>) -> &'static str {
    WEEKDAYS[now.weekday().num_days_from_monday() as usize]
}

/// Rules 1-10, in order, stopping at the first failure.
pub fn evaluate(coupon: &coupon::Model, ctx: &RuleContext<'_>) -> Result<(), RuleFailure> {
    if !coupon.is_active {
        return Err(RuleFailure::new(
            CouponRule::Inactive,
            "This coupon is no longer active",
        ));
    }

    if let Some(starts_at) = coupon.starts_at {
        if ctx.now < starts_at {
            return Err(RuleFailure::new(
                CouponRule::NotStarted,
                "This coupon is not valid yet",
            ));
        }
    }
    if let Some(ends_at) = coupon.ends_at {
        if ctx.now > ends_at {
            return Err(RuleFailure::new(CouponRule::Expired, "This coupon has expired"));
        }
    }

    if let Some(limit) = coupon.usage_limit {
        if coupon.usage_count >= limit {
            return Err(RuleFailure::new(
                CouponRule::UsageLimit,
                "This coupon has reached its usage limit",
            ));
        }
    }

    if let Some(limit) = coupon.per_customer_limit {
        if ctx.customer_uses >= limit.max(0) as u64 {
            return Err(RuleFailure::new(
                CouponRule::PerCustomerLimit,
                "You have already used this coupon the maximum number of times",
            ));
        }
    }

    let subtotal = ctx.cart.subtotal_cents();
    if let Some(min) = coupon.min_cart_value_cents {
        if subtotal < min {
            return Err(RuleFailure::new(
                CouponRule::MinCartValue,
                format!("Cart total must be at least {} (minor units)", min),
            ));
        }
    }

    if let Some(min) = coupon.min_quantity {
        if ctx.cart.total_quantity() < i64::from(min) {
            return Err(RuleFailure::new(
                CouponRule::MinQuantity,
                format!("Cart must contain at least {} items", min),
            ));
        }
    }

    let targets: Vec<CustomerSegment> = coupon
        .target_segment_names()
        .iter()
        .filter_map(|name| CustomerSegment::from_str(name).ok())
        .collect();
    if !coupon.target_segment_names().is_empty()
        && !targets.iter().any(|segment| ctx.profile.is_in(*segment))
    {
        return Err(RuleFailure::new(
            CouponRule::Segment,
            "This coupon is not available for your account",
        ));
    }

    let categories = coupon.category_names();
    if !categories.is_empty() && !ctx.cart.has_category_in(&categories) {
        return Err(RuleFailure::new(
            CouponRule::Category,
            format!("Requires an item from: {}", categories.join(", ")),
        ));
    }

    let days = coupon.valid_day_names();
    if !days.is_empty() {
        let today = weekday_name(ctx.now);
        if !days
            .iter()
            .any(|d| normalize_weekday(d).map_or(false, |d| d == today))
        {
            return Err(RuleFailure::new(
                CouponRule::Weekday,
                format!("Only valid on: {}", days.join(", ")),
            ));
        }
    }

    let orders = ctx.profile.order_count;
    let below = coupon.min_order_count.map_or(false, |min| orders < min.max(0) as u64);
    let above = coupon.max_order_count.map_or(false, |max| orders > max.max(0) as u64);
    if below || above {
        return Err(RuleFailure::new(
            CouponRule::OrderCount,
            "Your order history does not qualify for this coupon",
        ));
    }

    Ok(())
}

/// Discount in minor units. Never negative, never more than what it applies to.
pub fn compute_discount(coupon: &coupon::Model, subtotal_cents: i64, shipping_cents: i64) -> i64 {
    let subtotal_cents = subtotal_cents.max(0);
    let raw = match coupon.discount_type {
        DiscountType::Percentage => {
            let pct = Decimal::from(coupon.discount_value.clamp(0, 100));
            let value = (Decimal::from(subtotal_cents) * pct / Decimal::from(100)).floor();
            let value = value.to_i64().unwrap_or(0);
            match coupon.max_discount_cents {
                Some(cap) => value.min(cap),
                None => value,
            }
        }
        DiscountType::FixedAmount => coupon.discount_value,
        DiscountType::FreeShipping => return shipping_cents.max(0),
    };
    raw.clamp(0, subtotal_cents)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::coupons::segments::CustomerProfile;
    use rstest::rstest;
    use serde_json::json;

    pub(crate) fn coupon(discount_type: DiscountType, value: i64) -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "TEST".into(),
            description: None,
            discount_type,
            discount_value: value,
            max_discount_cents: None,
            min_cart_value_cents: None,
            min_quantity: None,
            target_segments: json!([]),
            categories: json!([]),
            valid_days: json!([]),
            min_order_count: None,
            max_order_count: None,
            usage_limit: None,
            per_customer_limit: None,
            usage_count: 0,
            auto_apply: false,
            is_active: true,
            starts_at: None,
            ends_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn cart(lines: &[(&str, i32, i64)]) -> CartContext {
        CartContext {
            items: lines
                .iter()
                .map(|(category, quantity, price)| CartLine {
                    product_id: None,
                    category: category.to_string(),
                    quantity: *quantity,
                    unit_price_cents: *price,
                })
                .collect(),
            shipping_cents: None,
        }
    }

    #[test]
    fn oversized_cart_lines_fail_validation() {
        assert!(cart(&[("shoes", 2, 4_500)]).validate().is_ok());
        assert!(cart(&[("shoes", 2, 9_000_000_000_000_000_000)]).validate().is_err());
        assert!(cart(&[("shoes", 1_001, 100)]).validate().is_err());
    }

    #[test]
    fn subtotal_saturates_instead_of_wrapping() {
        let huge = cart(&[("shoes", 2, i64::MAX / 2 + 1), ("hats", 1, 1)]);
        assert_eq!(huge.checked_subtotal_cents(), None);
        assert_eq!(huge.subtotal_cents(), i64::MAX);
    }

    // 2026-06-15 is a Monday.
    fn monday() -> DateTime<Utc> {
        "2026-06-15T12:00:00Z".parse().unwrap()
    }

    fn check(c: &coupon::Model, cart: &CartContext, profile: &CustomerProfile) -> Result<(), RuleFailure> {
        evaluate(
            c,
            &RuleContext {
                cart,
                profile,
                customer_uses: 0,
                now: monday(),
            },
        )
    }

    #[test]
    fn plain_coupon_passes() {
        let c = coupon(DiscountType::Percentage, 10);
        let profile = CustomerProfile::anonymous(None);
        assert!(check(&c, &cart(&[("shoes", 1, 5_000)]), &profile).is_ok());
    }

    #[test]
    fn first_failing_rule_wins() {
        let mut c = coupon(DiscountType::Percentage, 10);
        c.is_active = false;
        c.min_cart_value_cents = Some(100_000);
        let profile = CustomerProfile::anonymous(None);
        let err = check(&c, &cart(&[("shoes", 1, 5_000)]), &profile).unwrap_err();
        assert_eq!(err.rule, CouponRule::Inactive);

        c.is_active = true;
        let err = check(&c, &cart(&[("shoes", 1, 5_000)]), &profile).unwrap_err();
        assert_eq!(err.rule, CouponRule::MinCartValue);
    }

    #[test]
    fn date_window_is_inclusive() {
        let mut c = coupon(DiscountType::FixedAmount, 500);
        let profile = CustomerProfile::anonymous(None);
        let basket = cart(&[("shoes", 1, 5_000)]);

        c.starts_at = Some(monday());
        c.ends_at = Some(monday());
        assert!(check(&c, &basket, &profile).is_ok());

        c.starts_at = Some(monday() + chrono::Duration::seconds(1));
        assert_eq!(check(&c, &basket, &profile).unwrap_err().rule, CouponRule::NotStarted);

        c.starts_at = None;
        c.ends_at = Some(monday() - chrono::Duration::seconds(1));
        assert_eq!(check(&c, &basket, &profile).unwrap_err().rule, CouponRule::Expired);
    }

    #[test]
    fn usage_limits() {
        let mut c = coupon(DiscountType::FixedAmount, 500);
        c.usage_limit = Some(10);
        c.usage_count = 10;
        let profile = CustomerProfile::anonymous(None);
        let basket = cart(&[("shoes", 1, 5_000)]);
        assert_eq!(check(&c, &basket, &profile).unwrap_err().rule, CouponRule::UsageLimit);

        c.usage_count = 0;
        c.per_customer_limit = Some(1);
        let err = evaluate(
            &c,
            &RuleContext {
                cart: &basket,
                profile: &profile,
                customer_uses: 1,
                now: monday(),
            },
        )
        .unwrap_err();
        assert_eq!(err.rule, CouponRule::PerCustomerLimit);
    }

    #[test]
    fn segment_category_weekday_and_history() {
        let profile = CustomerProfile::anonymous(None);
        let basket = cart(&[("Shoes", 2, 5_000), ("socks", 1, 500)]);

        let mut c = coupon(DiscountType::Percentage, 10);
        c.target_segments = json!(["loyal_customer"]);
        assert_eq!(check(&c, &basket, &profile).unwrap_err().rule, CouponRule::Segment);
        c.target_segments = json!(["loyal_customer", "new_user"]);
        assert!(check(&c, &basket, &profile).is_ok());

        c.categories = json!(["hats"]);
        assert_eq!(check(&c, &basket, &profile).unwrap_err().rule, CouponRule::Category);
        c.categories = json!(["shoes"]);
        assert!(check(&c, &basket, &profile).is_ok());

        c.valid_days = json!(["sat", "sun"]);
        assert_eq!(check(&c, &basket, &profile).unwrap_err().rule, CouponRule::Weekday);
        c.valid_days = json!(["Monday"]);
        assert!(check(&c, &basket, &profile).is_ok());

        c.min_order_count = Some(1);
        assert_eq!(check(&c, &basket, &profile).unwrap_err().rule, CouponRule::OrderCount);
    }

    #[test]
    fn min_quantity_counts_units() {
        let mut c = coupon(DiscountType::FixedAmount, 100);
        c.min_quantity = Some(3);
        let profile = CustomerProfile::anonymous(None);
        assert_eq!(
            check(&c, &cart(&[("a", 2, 100)]), &profile).unwrap_err().rule,
            CouponRule::MinQuantity
        );
        assert!(check(&c, &cart(&[("a", 2, 100), ("b", 1, 100)]), &profile).is_ok());
    }

    #[rstest]
    #[case(DiscountType::Percentage, 10, None, 10_000, 500, 1_000)]
    #[case(DiscountType::Percentage, 50, Some(2_000), 10_000, 500, 2_000)]
    #[case(DiscountType::Percentage, 15, None, 999, 500, 149)]
    #[case(DiscountType::FixedAmount, 1_500, None, 10_000, 500, 1_500)]
    #[case(DiscountType::FixedAmount, 1_500, None, 1_000, 500, 1_000)]
    #[case(DiscountType::FreeShipping, 0, None, 10_000, 4_900, 4_900)]
    #[case(DiscountType::FreeShipping, 0, None, 60_000, 0, 0)]
    fn discount_maths(
        #[case] kind: DiscountType,
        #[case] value: i64,
        #[case] cap: Option<i64>,
        #[case] subtotal: i64,
        #[case] shipping: i64,
        #[case] expected: i64,
    ) {
        let mut c = coupon(kind, value);
        c.max_discount_cents = cap;
        assert_eq!(compute_discount(&c, subtotal, shipping), expected);
    }

    #[test]
    fn weekday_names_normalise() {
        assert_eq!(normalize_weekday("Mon"), Some("mon"));
        assert_eq!(normalize_weekday("wednesday"), Some("wed"));
        assert_eq!(normalize_weekday("funday"), None);
        assert_eq!(normalize_weekday("we"), None);
    }

    proptest::proptest! {
        #[test]
        fn discount_never_exceeds_base(
            value in 0i64..200_000,
            subtotal in 0i64..10_000_000,
            shipping in 0i64..10_000,
            kind in 0u8..3,
        ) {
            let kind = match kind {
                0 => DiscountType::Percentage,
                1 => DiscountType::FixedAmount,
                _ => DiscountType::FreeShipping,
            };
            let c = coupon(kind, value);
            let discount = compute_discount(&c, subtotal, shipping);
            proptest::prop_assert!(discount >= 0);
            match kind {
                DiscountType::FreeShipping => proptest::prop_assert!(discount <= shipping),
                _ => proptest::prop_assert!(discount <= subtotal),
            }
        }
    }
}
