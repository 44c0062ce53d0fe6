use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Return (RMA) lifecycle.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
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
pub enum ReturnStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "received")]
    Received,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl ReturnStatus {
    pub fn can_transition_to(self, next: ReturnStatus) -> bool {
        use ReturnStatus::*;
        matches!(
            (self, next),
            (Pending, Approved | Rejected | Cancelled)
                | (Approved, Received | Cancelled)
                | (Received, Refunded)
        )
    }
}

/// The `return_requests` table.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "return_requests")]
#[schema(as = ReturnRequest)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// `RMA-YYYYMMDD-NNNN`
    #[sea_orm(unique)]
    pub rma_number: String,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub reason: String,
    pub status: ReturnStatus,
    pub refund_amount_cents: i64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::return_item::Entity")]
    Items,
    #[sea_orm(has_many = "super::return_update::Entity")]
    Updates,
}

impl Related<super::return_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::return_update::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Updates.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::ReturnStatus::{self, *};
    use std::str::FromStr;

    #[test]
    fn allowed_transitions() {
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Received));
        assert!(Received.can_transition_to(Refunded));
    }

    #[test]
    fn terminal_states_do_not_move() {
        for next in [Pending, Approved, Received, Refunded, Cancelled] {
            assert!(!Refunded.can_transition_to(next));
            assert!(!Rejected.can_transition_to(next));
        }
        assert!(!Pending.can_transition_to(Refunded));
        assert!(!Received.can_transition_to(Cancelled));
    }

    #[test]
    fn parses_snake_case() {
        assert_eq!(ReturnStatus::from_str("received").unwrap(), Received);
        assert_eq!(Refunded.to_string(), "refunded");
        assert!(ReturnStatus::from_str("shipped").is_err());
    }
}
