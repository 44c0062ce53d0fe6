use crate::{
    db::DbPool,
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        order, order_item, product, return_item, return_request, return_update, ItemCondition,
        OrderStatus, ReturnStatus,
    },
    services::numbering,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const RMA_PREFIX: &str = "RMA";
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct ReturnItemRequest {
    pub order_item_id: Uuid,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
    pub condition: ItemCondition,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct CreateReturnRequest {
    pub order_id: Uuid,
    /// When given, must own the order.
    pub customer_id: Option<Uuid>,
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
    pub notes: Option<String>,
    #[validate]
    pub items: Vec<ReturnItemRequest>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct ReturnFilter {
    pub status: Option<ReturnStatus>,
    pub customer_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct UpdateReturnStatusRequest {
    pub status: ReturnStatus,
    #[validate(length(max = 2000))]
    pub note: Option<String>,
}

/// A return with its items and audit trail (oldest first).
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ReturnDetail {
    #[serde(flatten)]
    pub request: return_request::Model,
    pub items: Vec<return_item::Model>,
    pub updates: Vec<return_update::Model>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReturnStats {
    pub total: u64,
    /// Every status, including those with no returns.
    pub by_status: BTreeMap<String, u64>,
    pub refunded_cents: i64,
    /// Refunds owed on approved and received returns.
    pub pending_refund_cents: i64,
}

/// Service for managing returns
#[derive(Clone)]
pub struct ReturnService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl ReturnService {
    /// Creates a new return service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a return request, retrying when a concurrent request took the
    /// same RMA number.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn create_return(
        &self,
        request: CreateReturnRequest,
    ) -> Result<ReturnDetail, ServiceError> {
        request.validate()?;
        if request.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "At least one item must be returned".into(),
            ));
        }

        let detail =
            numbering::retry_on_collision("return", |_| self.try_create_return(&request)).await?;

        info!(
            return_id = %detail.request.id,
            rma_number = %detail.request.rma_number,
            refund_amount_cents = detail.request.refund_amount_cents,
            "return created"
        );
        counter!("storefront_returns.created", 1);
        self.event_sender
            .send_or_log(Event::ReturnCreated {
                return_id: detail.request.id,
                rma_number: detail.request.rma_number.clone(),
                order_id: detail.request.order_id,
            })
            .await;

        Ok(detail)
    }

    async fn try_create_return(
        &self,
        request: &CreateReturnRequest,
    ) -> Result<ReturnDetail, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let order = order::Entity::find_by_id(request.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", request.order_id)))?;

        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::InvalidInput(
                "Cancelled orders cannot be returned".into(),
            ));
        }
        if let Some(customer_id) = request.customer_id {
            if customer_id != order.customer_id {
                return Err(ServiceError::InvalidInput(
                    "Order does not belong to this customer".into(),
                ));
            }
        }

        let order_items: HashMap<Uuid, order_item::Model> = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        let already_returned = returned_quantities(&txn, order.id).await?;

        let mut requested: HashMap<Uuid, i32> = HashMap::new();
        for item in &request.items {
            let total = requested.entry(item.order_item_id).or_default();
            *total = total
                .checked_add(item.quantity)
                .ok_or_else(|| ServiceError::InvalidInput("Return quantity is too large".into()))?;
        }

        let mut refund_amount_cents = 0i64;
        for (order_item_id, quantity) in &requested {
            let ordered = order_items.get(order_item_id).ok_or_else(|| {
                ServiceError::InvalidInput(format!(
                    "Item {} is not part of order {}",
                    order_item_id, order.order_number
                ))
            })?;
            let previous = already_returned.get(order_item_id).copied().unwrap_or(0);
            let total = previous
                .checked_add(*quantity)
                .ok_or_else(|| ServiceError::InvalidInput("Return quantity is too large".into()))?;
            if total > ordered.quantity {
                return Err(ServiceError::InvalidInput(format!(
                    "Cannot return {} of {}: {} ordered, {} already returned",
                    quantity, ordered.sku, ordered.quantity, previous
                )));
            }
            refund_amount_cents += ordered.unit_price_cents * i64::from(*quantity);
        }

        let now = Utc::now();
        let rma_number = next_rma_number(&txn, now).await?;
        let return_id = Uuid::new_v4();

        let created = return_request::ActiveModel {
            id: Set(return_id),
            rma_number: Set(rma_number),
            order_id: Set(order.id),
            customer_id: Set(order.customer_id),
            reason: Set(request.reason.trim().to_string()),
            status: Set(ReturnStatus::Pending),
            refund_amount_cents: Set(refund_amount_cents),
            notes: Set(request.notes.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(request.items.len());
        for item in &request.items {
            // Presence checked above.
            let product_id = order_items
                .get(&item.order_item_id)
                .map(|o| o.product_id)
                .unwrap_or_default();
            let inserted = return_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                return_id: Set(return_id),
                order_item_id: Set(item.order_item_id),
                product_id: Set(product_id),
                quantity: Set(item.quantity),
                condition: Set(item.condition),
                reason: Set(item.reason.clone()),
            }
            .insert(&txn)
            .await?;
            items.push(inserted);
        }

        let update = return_update::ActiveModel {
            id: Set(Uuid::new_v4()),
            return_id: Set(return_id),
            status: Set(ReturnStatus::Pending),
            note: Set(Some("Return request created".to_string())),
            created_by: Set(None),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        Ok(ReturnDetail {
            request: created,
            items,
            updates: vec![update],
        })
    }

    /// Gets a return with its items and update log
    #[instrument(skip(self))]
    pub async fn get_return(&self, return_id: Uuid) -> Result<ReturnDetail, ServiceError> {
        let db = &*self.db_pool;
        let request = return_request::Entity::find_by_id(return_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Return {} not found", return_id)))?;

        let items = return_item::Entity::find()
            .filter(return_item::Column::ReturnId.eq(return_id))
            .all(db)
            .await?;
        let updates = return_update::Entity::find()
            .filter(return_update::Column::ReturnId.eq(return_id))
            .order_by_asc(return_update::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(ReturnDetail {
            request,
            items,
            updates,
        })
    }

    /// Lists returns, newest first. Returns the page and the total count.
    #[instrument(skip(self))]
    pub async fn list_returns(
        &self,
        filter: ReturnFilter,
    ) -> Result<(Vec<return_request::Model>, u64), ServiceError> {
        let (page, limit) = page_and_limit(filter.page, filter.limit);

        let mut query = return_request::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(return_request::Column::Status.eq(status));
        }
        if let Some(customer_id) = filter.customer_id {
            query = query.filter(return_request::Column::CustomerId.eq(customer_id));
        }
        if let Some(order_id) = filter.order_id {
            query = query.filter(return_request::Column::OrderId.eq(order_id));
        }
        if let Some(from) = filter.created_from {
            query = query.filter(return_request::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.created_to {
            query = query.filter(return_request::Column::CreatedAt.lte(to));
        }

        let paginator = query
            .order_by_desc(return_request::Column::CreatedAt)
            .order_by_desc(return_request::Column::RmaNumber)
            .paginate(&*self.db_pool, limit);
        let total = paginator.num_items().await?;
        let returns = paginator.fetch_page(page - 1).await?;

        Ok((returns, total))
    }

    /// Moves a return along its lifecycle and records the change.
    ///
    /// Setting the current status again only appends the note. Receiving a
    /// return puts resellable units back in stock.
    #[instrument(skip(self, request), fields(status = %request.status))]
    pub async fn update_status(
        &self,
        return_id: Uuid,
        request: UpdateReturnStatusRequest,
        actor: Option<String>,
    ) -> Result<ReturnDetail, ServiceError> {
        request.validate()?;
        let txn = self.db_pool.begin().await?;

        let current = return_request::Entity::find_by_id(return_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Return {} not found", return_id)))?;
        let from = current.status;
        let to = request.status;
        let now = Utc::now();

        if from == to {
            if request.note.is_some() {
                insert_update(&txn, return_id, to, request.note.clone(), actor, now).await?;
                txn.commit().await?;
            } else {
                txn.rollback().await?;
            }
            return self.get_return(return_id).await;
        }

        if !from.can_transition_to(to) {
            return Err(ServiceError::InvalidStatusTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let result = return_request::Entity::update_many()
            .col_expr(return_request::Column::Status, Expr::value(to))
            .col_expr(return_request::Column::UpdatedAt, Expr::value(now))
            .filter(return_request::Column::Id.eq(return_id))
            .filter(return_request::Column::Status.eq(from))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Return was modified concurrently".into(),
            ));
        }

        let note = request
            .note
            .clone()
            .or_else(|| Some(format!("Status changed from {} to {}", from, to)));
        insert_update(&txn, return_id, to, note, actor, now).await?;

        let restocked = if to == ReturnStatus::Received {
            restock_items(&txn, return_id).await?
        } else {
            Vec::new()
        };

        txn.commit().await?;

        info!(%return_id, %from, %to, "return status updated");
        counter!("storefront_returns.status_changes", 1, "status" => to.to_string());
        self.event_sender
            .send_or_log(Event::ReturnStatusChanged {
                return_id,
                old_status: from.to_string(),
                new_status: to.to_string(),
            })
            .await;
        for (product_id, old_quantity, new_quantity) in restocked {
            self.event_sender
                .send_or_log(Event::InventoryAdjusted {
                    product_id,
                    old_quantity,
                    new_quantity,
                    reason: Some("return received".into()),
                })
                .await;
        }

        self.get_return(return_id).await
    }

    /// Counts and refund totals per status.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<ReturnStats, ServiceError> {
        let rows: Vec<(String, i64, Option<i64>)> = return_request::Entity::find()
            .select_only()
            .column(return_request::Column::Status)
            .column_as(Expr::cust("COUNT(*)"), "count")
            .column_as(Expr::cust("CAST(SUM(refund_amount_cents) AS BIGINT)"), "amount")
            .group_by(return_request::Column::Status)
            .into_tuple()
            .all(&*self.db_pool)
            .await?;

        let mut stats = ReturnStats {
            total: 0,
            by_status: ReturnStatus::iter().map(|s| (s.to_string(), 0)).collect(),
            refunded_cents: 0,
            pending_refund_cents: 0,
        };

        for (status, count, amount) in rows {
            let count = count.max(0) as u64;
            let amount = amount.unwrap_or(0);
            stats.total += count;
            *stats.by_status.entry(status.clone()).or_default() += count;
            match ReturnStatus::from_str(&status) {
                Ok(ReturnStatus::Refunded) => stats.refunded_cents += amount,
                Ok(ReturnStatus::Approved | ReturnStatus::Received) => {
                    stats.pending_refund_cents += amount
                }
                Ok(_) => {}
                Err(_) => warn!(%status, "unknown return status in database"),
            }
        }

        Ok(stats)
    }
}

/// Page is at least 1; limit is clamped to `1..=100`.
pub fn page_and_limit(page: Option<u64>, limit: Option<u64>) -> (u64, u64) {
    (
        page.unwrap_or(1).max(1),
        limit.unwrap_or(20).clamp(1, MAX_PAGE_SIZE),
    )
}

/// The next free RMA number for `now`'s date, as seen by `db`.
pub async fn next_rma_number<C: ConnectionTrait>(
    db: &C,
    now: DateTime<Utc>,
) -> Result<String, ServiceError> {
    let today = now.date_naive();
    let prefix = numbering::daily_prefix(RMA_PREFIX, today);
    let latest = return_request::Entity::find()
        .filter(return_request::Column::RmaNumber.starts_with(prefix.as_str()))
        .order_by_desc(Expr::cust("LENGTH(rma_number)"))
        .order_by_desc(return_request::Column::RmaNumber)
        .one(db)
        .await?;
    Ok(numbering::next_number(
        RMA_PREFIX,
        today,
        latest.as_ref().map(|r| r.rma_number.as_str()),
    ))
}

/// Units of each order item already covered by open or completed returns.
async fn returned_quantities<C: ConnectionTrait>(
    db: &C,
    order_id: Uuid,
) -> Result<HashMap<Uuid, i32>, ServiceError> {
    let live_returns: Vec<Uuid> = return_request::Entity::find()
        .filter(return_request::Column::OrderId.eq(order_id))
        .filter(
            return_request::Column::Status
                .is_not_in([ReturnStatus::Rejected, ReturnStatus::Cancelled]),
        )
        .all(db)
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect();

    let mut quantities = HashMap::new();
    if live_returns.is_empty() {
        return Ok(quantities);
    }
    let items = return_item::Entity::find()
        .filter(return_item::Column::ReturnId.is_in(live_returns))
        .all(db)
        .await?;
    for item in items {
        *quantities.entry(item.order_item_id).or_insert(0) += item.quantity;
    }
    Ok(quantities)
}

async fn insert_update<C: ConnectionTrait>(
    db: &C,
    return_id: Uuid,
    status: ReturnStatus,
    note: Option<String>,
    actor: Option<String>,
    now: DateTime<Utc>,
) -> Result<return_update::Model, ServiceError> {
    Ok(return_update::ActiveModel {
        id: Set(Uuid::new_v4()),
        return_id: Set(return_id),
        status: Set(status),
        note: Set(note),
        created_by: Set(actor),
        created_at: Set(now),
    }
    .insert(db)
    .await?)
}

/// Returns `(product_id, old, new)` for every product put back in stock.
async fn restock_items<C: ConnectionTrait>(
    db: &C,
    return_id: Uuid,
) -> Result<Vec<(Uuid, i32, i32)>, ServiceError> {
    let items = return_item::Entity::find()
        .filter(return_item::Column::ReturnId.eq(return_id))
        .filter(
            return_item::Column::Condition.is_in([ItemCondition::Unopened, ItemCondition::Opened]),
        )
        .all(db)
        .await?;

    let mut adjusted = Vec::new();
    for item in items {
        let Some(product) = product::Entity::find_by_id(item.product_id).one(db).await? else {
            warn!(product_id = %item.product_id, "returned product no longer exists");
            continue;
        };
        let old_quantity = product.inventory_quantity;
        let new_quantity = old_quantity + item.quantity;
        let mut active: product::ActiveModel = product.into();
        active.inventory_quantity = Set(new_quantity);
        active.updated_at = Set(Utc::now());
        active.update(db).await?;
        adjusted.push((item.product_id, old_quantity, new_quantity));
    }
    Ok(adjusted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_is_clamped() {
        assert_eq!(page_and_limit(None, None), (1, 20));
        assert_eq!(page_and_limit(Some(0), Some(0)), (1, 1));
        assert_eq!(page_and_limit(Some(3), Some(1000)), (3, 100));
    }
}
