use crate::{
    db::DbPool,
    errors::ServiceError,
    models::{cart, customer, CartStatus},
};
use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct UpsertCartRequest {
    #[validate(range(min = 0))]
    pub item_count: i32,
    #[validate(range(min = 0))]
    pub subtotal_cents: i64,
}

/// Latest cart snapshot per customer, used for abandonment segmentation.
#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
}

impl CartService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Records the current cart contents. Touching a converted cart reopens it.
    #[instrument(skip(self, request))]
    pub async fn upsert_cart(
        &self,
        customer_id: Uuid,
        request: UpsertCartRequest,
    ) -> Result<cart::Model, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;

        if customer::Entity::find_by_id(customer_id).one(db).await?.is_none() {
            return Err(ServiceError::NotFound(format!(
                "Customer {} not found",
                customer_id
            )));
        }

        cart::Entity::insert(cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            item_count: Set(request.item_count),
            subtotal_cents: Set(request.subtotal_cents),
            status: Set(CartStatus::Active),
            updated_at: Set(Utc::now()),
        })
        .on_conflict(
            OnConflict::column(cart::Column::CustomerId)
                .update_columns([
                    cart::Column::ItemCount,
                    cart::Column::SubtotalCents,
                    cart::Column::Status,
                    cart::Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec(db)
        .await?;

        self.get_cart(customer_id).await
    }

    #[instrument(skip(self))]
    pub async fn get_cart(&self, customer_id: Uuid) -> Result<cart::Model, ServiceError> {
        cart::Entity::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No cart for customer {}", customer_id)))
    }
}

/// Marks the customer's cart converted on the given connection, normally a
/// checkout transaction.
pub async fn mark_converted<C: ConnectionTrait>(
    db: &C,
    customer_id: Uuid,
) -> Result<(), ServiceError> {
    let Some(existing) = cart::Entity::find()
        .filter(cart::Column::CustomerId.eq(customer_id))
        .one(db)
        .await?
    else {
        return Ok(());
    };
    let mut active: cart::ActiveModel = existing.into();
    active.status = Set(CartStatus::Converted);
    active.item_count = Set(0);
    active.subtotal_cents = Set(0);
    active.updated_at = Set(Utc::now());
    active.update(db).await?;
    Ok(())
}
