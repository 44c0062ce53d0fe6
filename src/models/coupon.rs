use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// How a coupon's `discount_value` is interpreted.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscountType {
    /// Whole percent of the subtotal.
    #[sea_orm(string_value = "percentage")]
    Percentage,
    /// Minor currency units.
    #[sea_orm(string_value = "fixed_amount")]
    FixedAmount,
    /// Waives the shipping charge; `discount_value` is ignored.
    #[sea_orm(string_value = "free_shipping")]
    FreeShipping,
}

/// The `coupons` table.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "coupons")]
#[schema(as = Coupon)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub max_discount_cents: Option<i64>,
    pub min_cart_value_cents: Option<i64>,
    pub min_quantity: Option<i32>,
    /// Segment names; empty means every customer.
    #[schema(value_type = Vec<String>)]
    pub target_segments: Json,
    /// Product categories; empty means any.
    #[schema(value_type = Vec<String>)]
    pub categories: Json,
    /// Lowercase three-letter weekday names; empty means any day.
    #[schema(value_type = Vec<String>)]
    pub valid_days: Json,
    pub min_order_count: Option<i32>,
    pub max_order_count: Option<i32>,
    pub usage_limit: Option<i32>,
    pub per_customer_limit: Option<i32>,
    pub usage_count: i32,
    pub auto_apply: bool,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn string_list(value: &Json) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

impl Model {
    pub fn target_segment_names(&self) -> Vec<String> {
        string_list(&self.target_segments)
    }

    pub fn category_names(&self) -> Vec<String> {
        string_list(&self.categories)
    }

    pub fn valid_day_names(&self) -> Vec<String> {
        string_list(&self.valid_days)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_usage::Entity")]
    Usages,
}

impl Related<super::coupon_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
