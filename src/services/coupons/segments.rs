//! Customer segmentation from order history and cart activity.

use crate::config::CouponConfig;
use crate::errors::ServiceError;
use crate::models::{cart, customer, order, CartStatus, OrderStatus};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Classification buckets used to gate coupons.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CustomerSegment {
    NewUser,
    ReturningUser,
    HighValueCustomer,
    LoyalCustomer,
    DormantCustomer,
    CartAbandoner,
}

/// Thresholds for segment membership.
#[derive(Clone, Debug)]
pub struct SegmentThresholds {
    pub high_value_spend_cents: i64,
    pub loyal_order_count: u64,
    pub dormant_after: Duration,
    pub cart_abandon_after: Duration,
}

impl From<&CouponConfig> for SegmentThresholds {
    fn from(cfg: &CouponConfig) -> Self {
        Self {
            high_value_spend_cents: cfg.high_value_spend_cents,
            loyal_order_count: cfg.loyal_order_count,
            dormant_after: Duration::days(cfg.dormant_after_days),
            cart_abandon_after: Duration::hours(cfg.cart_abandon_after_hours),
        }
    }
}

impl Default for SegmentThresholds {
    fn default() -> Self {
        (&CouponConfig::default()).into()
    }
}

/// Cart snapshot relevant to abandonment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartActivity {
    pub item_count: i32,
    pub subtotal_cents: i64,
    pub updated_at: DateTime<Utc>,
}

/// Aggregates and segments computed for one customer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CustomerProfile {
    pub customer_id: Option<Uuid>,
    /// False for ids with no customer record; those are treated as new users.
    pub known: bool,
    pub order_count: u64,
    pub total_spent_cents: i64,
    pub last_order_at: Option<DateTime<Utc>>,
    pub open_cart: Option<CartActivity>,
    pub segments: Vec<CustomerSegment>,
}

impl CustomerProfile {
    pub fn anonymous(customer_id: Option<Uuid>) -> Self {
        Self {
            customer_id,
            known: false,
            order_count: 0,
            total_spent_cents: 0,
            last_order_at: None,
            open_cart: None,
            segments: vec![CustomerSegment::NewUser],
        }
    }

    pub fn is_in(&self, segment: CustomerSegment) -> bool {
        self.segments.contains(&segment)
    }
}

/// Maps aggregates onto segments. A customer may fall in several at once.
pub fn classify(
    order_count: u64,
    total_spent_cents: i64,
    last_order_at: Option<DateTime<Utc>>,
    open_cart: Option<&CartActivity>,
    thresholds: &SegmentThresholds,
    now: DateTime<Utc>,
) -> Vec<CustomerSegment> {
    let mut segments = Vec::new();

    if order_count == 0 {
        segments.push(CustomerSegment::NewUser);
    } else {
        segments.push(CustomerSegment::ReturningUser);
    }
    if total_spent_cents >= thresholds.high_value_spend_cents {
        segments.push(CustomerSegment::HighValueCustomer);
    }
    if order_count >= thresholds.loyal_order_count {
        segments.push(CustomerSegment::LoyalCustomer);
    }
    if order_count >= 1 {
        if let Some(last) = last_order_at {
            if now - last > thresholds.dormant_after {
                segments.push(CustomerSegment::DormantCustomer);
            }
        }
    }
    if let Some(cart) = open_cart {
        if cart.item_count > 0 && now - cart.updated_at > thresholds.cart_abandon_after {
            segments.push(CustomerSegment::CartAbandoner);
        }
    }

    segments
}

/// Loads aggregates for `customer_id` and classifies them.
pub async fn load_profile<C: ConnectionTrait>(
    db: &C,
    customer_id: Option<Uuid>,
    thresholds: &SegmentThresholds,
    now: DateTime<Utc>,
) -> Result<CustomerProfile, ServiceError> {
    let Some(customer_id) = customer_id else {
        return Ok(CustomerProfile::anonymous(None));
    };

    if customer::Entity::find_by_id(customer_id).one(db).await?.is_none() {
        return Ok(CustomerProfile::anonymous(Some(customer_id)));
    }

    let purchases = || {
        order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::Status.ne(OrderStatus::Cancelled))
    };

    let order_count = purchases().count(db).await?;

    let total_spent_cents = purchases()
        .select_only()
        .column_as(Expr::cust("CAST(SUM(total_cents) AS BIGINT)"), "total")
        .into_tuple::<Option<i64>>()
        .one(db)
        .await?
        .flatten()
        .unwrap_or(0);

    let last_order_at = purchases()
        .order_by_desc(order::Column::CreatedAt)
        .one(db)
        .await?
        .map(|o| o.created_at);

    let open_cart = cart::Entity::find()
        .filter(cart::Column::CustomerId.eq(customer_id))
        .filter(cart::Column::Status.eq(CartStatus::Active))
        .one(db)
        .await?
        .map(|c| CartActivity {
            item_count: c.item_count,
            subtotal_cents: c.subtotal_cents,
            updated_at: c.updated_at,
        });

    let segments = classify(
        order_count,
        total_spent_cents,
        last_order_at,
        open_cart.as_ref(),
        thresholds,
        now,
    );

    Ok(CustomerProfile {
        customer_id: Some(customer_id),
        known: true,
        order_count,
        total_spent_cents,
        last_order_at,
        open_cart,
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use CustomerSegment::*;

    fn now() -> DateTime<Utc> {
        "2026-06-15T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn brand_new_customer_is_only_new_user() {
        let segs = classify(0, 0, None, None, &SegmentThresholds::default(), now());
        assert_eq!(segs, vec![NewUser]);
    }

    #[rstest]
    #[case(1, 5_000, 10, vec![ReturningUser])]
    #[case(5, 5_000, 10, vec![ReturningUser, LoyalCustomer])]
    #[case(2, 1_000_000, 10, vec![ReturningUser, HighValueCustomer])]
    #[case(1, 5_000, 91, vec![ReturningUser, DormantCustomer])]
    #[case(6, 2_000_000, 120, vec![ReturningUser, HighValueCustomer, LoyalCustomer, DormantCustomer])]
    fn order_history_segments(
        #[case] orders: u64,
        #[case] spent: i64,
        #[case] days_since_last: i64,
        #[case] expected: Vec<CustomerSegment>,
    ) {
        let last = now() - Duration::days(days_since_last);
        let segs = classify(
            orders,
            spent,
            Some(last),
            None,
            &SegmentThresholds::default(),
            now(),
        );
        assert_eq!(segs, expected);
    }

    #[test]
    fn stale_non_empty_cart_marks_abandoner() {
        let stale = CartActivity {
            item_count: 2,
            subtotal_cents: 3_000,
            updated_at: now() - Duration::hours(25),
        };
        let segs = classify(0, 0, None, Some(&stale), &SegmentThresholds::default(), now());
        assert_eq!(segs, vec![NewUser, CartAbandoner]);

        let fresh = CartActivity {
            updated_at: now() - Duration::hours(2),
            ..stale.clone()
        };
        let segs = classify(0, 0, None, Some(&fresh), &SegmentThresholds::default(), now());
        assert_eq!(segs, vec![NewUser]);

        let empty = CartActivity {
            item_count: 0,
            ..stale
        };
        let segs = classify(0, 0, None, Some(&empty), &SegmentThresholds::default(), now());
        assert_eq!(segs, vec![NewUser]);
    }

    #[test]
    fn segment_names_are_snake_case() {
        assert_eq!(HighValueCustomer.to_string(), "high_value_customer");
        assert_eq!("cart_abandoner".parse::<CustomerSegment>().unwrap(), CartAbandoner);
    }
}
