use crate::{
    db::DbPool,
    errors::ServiceError,
    events::{Event, EventSender},
    integrations::shiprocket::{ShipmentBooking, ShiprocketClient},
    models::{customer, order, order_item, product, OrderStatus, ProductStatus},
    services::{
        carts,
        coupons::{
            CartContext, CartLine, CouponService, RecommendCouponsRequest, Redemption,
            ValidateCouponRequest,
        },
        numbering,
        returns::page_and_limit,
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const ORDER_PREFIX: &str = "ORD";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, ToSchema, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 3, max = 12))]
    pub postal_code: String,
    #[serde(default = "default_country")]
    #[validate(length(min = 2, max = 64))]
    pub country: String,
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
}

fn default_country() -> String {
    "India".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    #[validate]
    pub items: Vec<OrderItemRequest>,
    /// Explicit coupon; when absent an auto-apply coupon may be used.
    pub coupon_code: Option<String>,
    #[validate]
    pub shipping_address: ShippingAddress,
    /// Filled from the request headers; never read from the body.
    #[serde(skip_deserializing)]
    pub ip_address: Option<String>,
    #[serde(skip_deserializing)]
    pub device_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub customer_id: Option<Uuid>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Tracking data recorded when a shipment is booked.
#[derive(Clone, Debug, Default)]
pub struct ShipmentInfo {
    pub tracking_number: Option<String>,
    pub provider_id: Option<String>,
}

struct PricedLine {
    product: product::Model,
    quantity: i32,
}

struct AppliedCoupon {
    coupon_id: Uuid,
    code: String,
    discount_cents: i64,
}

/// Service for managing orders
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    coupons: Arc<CouponService>,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        coupons: Arc<CouponService>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            coupons,
        }
    }

    /// Places an order: prices the cart, applies the coupon, takes stock and
    /// records everything in one transaction.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderDetail, ServiceError> {
        request.validate()?;
        if request.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "An order needs at least one item".into(),
            ));
        }
        let db = &*self.db_pool;

        if customer::Entity::find_by_id(request.customer_id)
            .one(db)
            .await?
            .is_none()
        {
            return Err(ServiceError::NotFound(format!(
                "Customer {} not found",
                request.customer_id
            )));
        }

        let lines = self.price_lines(&request).await?;
        let cart = CartContext {
            items: lines
                .iter()
                .map(|line| CartLine {
                    product_id: Some(line.product.id),
                    category: line.product.category.clone(),
                    quantity: line.quantity,
                    unit_price_cents: line.product.price_cents,
                })
                .collect(),
            shipping_cents: None,
        };
        let subtotal_cents = cart.subtotal_cents();
        let shipping_cents = self.coupons.shipping().charge_for(subtotal_cents);
        let cart = CartContext {
            shipping_cents: Some(shipping_cents),
            ..cart
        };

        let applied = self.resolve_coupon(&request, cart).await?;
        let discount_cents = applied.as_ref().map_or(0, |c| c.discount_cents);
        let total_cents = (subtotal_cents - discount_cents + shipping_cents).max(0);

        let detail = numbering::retry_on_collision("order", |_| {
            self.insert_order(
                &request,
                &lines,
                applied.as_ref(),
                subtotal_cents,
                discount_cents,
                shipping_cents,
                total_cents,
            )
        })
        .await?;

        info!(
            order_id = %detail.order.id,
            order_number = %detail.order.order_number,
            total_cents,
            "order created"
        );
        counter!("storefront_orders.created", 1);
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: detail.order.id,
                customer_id: detail.order.customer_id,
                total_cents,
            })
            .await;
        if let Some(applied) = &applied {
            self.event_sender
                .send_or_log(Event::CouponRedeemed {
                    coupon_id: applied.coupon_id,
                    customer_id: detail.order.customer_id,
                    order_id: Some(detail.order.id),
                    discount_cents: applied.discount_cents,
                })
                .await;
        }

        Ok(detail)
    }

    /// Loads each product once, merging repeated lines.
    async fn price_lines(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<Vec<PricedLine>, ServiceError> {
        let mut quantities: BTreeMap<Uuid, i32> = BTreeMap::new();
        for item in &request.items {
            *quantities.entry(item.product_id).or_default() += item.quantity;
        }

        let ids: Vec<Uuid> = quantities.keys().copied().collect();
        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(ids))
            .all(&*self.db_pool)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut lines = Vec::with_capacity(quantities.len());
        for (product_id, quantity) in quantities {
            let product = products
                .get(&product_id)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
            if product.status != ProductStatus::Active {
                return Err(ServiceError::InvalidInput(format!(
                    "Product {} is not available",
                    product.sku
                )));
            }
            if product.inventory_quantity < quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "{}: requested {}, available {}",
                    product.sku, quantity, product.inventory_quantity
                )));
            }
            lines.push(PricedLine { product, quantity });
        }
        Ok(lines)
    }

    async fn resolve_coupon(
        &self,
        request: &CreateOrderRequest,
        cart: CartContext,
    ) -> Result<Option<AppliedCoupon>, ServiceError> {
        match request
            .coupon_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
        {
            Some(code) => {
                let validation = self
                    .coupons
                    .validate_coupon(ValidateCouponRequest {
                        code: code.to_string(),
                        customer_id: Some(request.customer_id),
                        cart,
                        ip_address: request.ip_address.clone(),
                        device_id: request.device_id.clone(),
                    })
                    .await?
                    .into_result()?;
                let coupon_id = validation.coupon_id.ok_or_else(|| {
                    ServiceError::InternalError("validated coupon without id".into())
                })?;
                Ok(Some(AppliedCoupon {
                    coupon_id,
                    code: validation.code,
                    discount_cents: validation.discount_cents,
                }))
            }
            None => {
                let best = self
                    .coupons
                    .auto_apply(RecommendCouponsRequest {
                        customer_id: Some(request.customer_id),
                        cart,
                        ip_address: request.ip_address.clone(),
                        device_id: request.device_id.clone(),
                    })
                    .await?;
                Ok(best.map(|c| AppliedCoupon {
                    coupon_id: c.coupon_id,
                    code: c.code,
                    discount_cents: c.discount_cents,
                }))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_order(
        &self,
        request: &CreateOrderRequest,
        lines: &[PricedLine],
        applied: Option<&AppliedCoupon>,
        subtotal_cents: i64,
        discount_cents: i64,
        shipping_cents: i64,
        total_cents: i64,
    ) -> Result<OrderDetail, ServiceError> {
        let shipping_address = serde_json::to_value(&request.shipping_address)
            .map_err(|e| ServiceError::InternalError(format!("address encoding: {}", e)))?;

        let txn = self.db_pool.begin().await?;
        let now = Utc::now();

        for line in lines {
            take_stock(&txn, &line.product, line.quantity).await?;
        }

        let order_id = Uuid::new_v4();
        let order_number = next_order_number(&txn, now).await?;
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            customer_id: Set(request.customer_id),
            status: Set(OrderStatus::Pending),
            subtotal_cents: Set(subtotal_cents),
            discount_cents: Set(discount_cents),
            shipping_cents: Set(shipping_cents),
            total_cents: Set(total_cents),
            coupon_code: Set(applied.map(|c| c.code.clone())),
            shipping_address: Set(shipping_address),
            tracking_number: Set(None),
            shipment_provider_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product.id),
                sku: Set(line.product.sku.clone()),
                name: Set(line.product.name.clone()),
                category: Set(line.product.category.clone()),
                quantity: Set(line.quantity),
                unit_price_cents: Set(line.product.price_cents),
                total_cents: Set(line.product.price_cents * i64::from(line.quantity)),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        if let Some(applied) = applied {
            self.coupons
                .redeem(
                    &txn,
                    Redemption {
                        coupon_id: applied.coupon_id,
                        customer_id: request.customer_id,
                        order_id: Some(order_id),
                        discount_cents: applied.discount_cents,
                        ip_address: request.ip_address.clone(),
                        device_id: request.device_id.clone(),
                    },
                )
                .await?;
        }

        carts::mark_converted(&txn, request.customer_id).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        Ok(OrderDetail { order, items })
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, id: Uuid) -> Result<OrderDetail, ServiceError> {
        let db = &*self.db_pool;
        let order = order::Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(id))
            .all(db)
            .await?;
        Ok(OrderDetail { order, items })
    }

    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        filter: OrderFilter,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let (page, limit) = page_and_limit(filter.page, filter.limit);
        let mut query = order::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(customer_id) = filter.customer_id {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }
        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db_pool, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;
        Ok((items, total))
    }

    /// Follows the order state machine. Cancelling puts the items back in stock.
    #[instrument(skip(self), fields(status = %request.status))]
    pub async fn update_status(
        &self,
        id: Uuid,
        request: UpdateOrderStatusRequest,
    ) -> Result<OrderDetail, ServiceError> {
        self.transition(id, request.status, ShipmentInfo::default(), &[])
            .await
    }

    /// Records booked shipment data and marks the order shipped.
    #[instrument(skip(self, shipment))]
    pub async fn mark_shipped(
        &self,
        id: Uuid,
        shipment: ShipmentInfo,
    ) -> Result<OrderDetail, ServiceError> {
        let detail = self
            .transition(
                id,
                OrderStatus::Shipped,
                shipment.clone(),
                &[OrderStatus::Confirmed],
            )
            .await?;
        self.event_sender
            .send_or_log(Event::OrderShipped {
                order_id: id,
                awb_code: shipment.tracking_number,
            })
            .await;
        Ok(detail)
    }

    /// Books the shipment with Shiprocket, then records the AWB and marks the
    /// order shipped. Only confirmed or processing orders can be booked.
    #[instrument(skip(self, shiprocket))]
    pub async fn book_shipment(
        &self,
        id: Uuid,
        shiprocket: &ShiprocketClient,
    ) -> Result<(OrderDetail, ShipmentBooking), ServiceError> {
        let detail = self.get_order(id).await?;
        let status = detail.order.status;
        if !matches!(status, OrderStatus::Confirmed | OrderStatus::Processing) {
            return Err(ServiceError::InvalidStatusTransition {
                from: status.to_string(),
                to: OrderStatus::Shipped.to_string(),
            });
        }
        let customer = customer::Entity::find_by_id(detail.order.customer_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Customer {} not found", detail.order.customer_id))
            })?;

        let booking = shiprocket
            .create_shipment(&detail.order, &detail.items, &customer)
            .await?;
        let recorded = self
            .mark_shipped(
                id,
                ShipmentInfo {
                    tracking_number: booking.awb_code.clone(),
                    provider_id: Some(booking.shipment_id.clone()),
                },
            )
            .await;
        match recorded {
            Ok(detail) => Ok((detail, booking)),
            Err(e) => Err(self.release_booking(id, shiprocket, booking, e).await),
        }
    }

    /// The order moved on while its shipment was being booked. Cancels the
    /// booking with the carrier and reports its ids for reconciliation.
    async fn release_booking(
        &self,
        order_id: Uuid,
        shiprocket: &ShiprocketClient,
        booking: ShipmentBooking,
        cause: ServiceError,
    ) -> ServiceError {
        let cancelled = match shiprocket.cancel_order(&booking.provider_order_id).await {
            Ok(()) => true,
            Err(cancel_error) => {
                error!(
                    %order_id,
                    provider_order_id = %booking.provider_order_id,
                    shipment_id = %booking.shipment_id,
                    awb = ?booking.awb_code,
                    error = %cancel_error,
                    "booked shipment could not be cancelled"
                );
                false
            }
        };
        warn!(
            %order_id,
            shipment_id = %booking.shipment_id,
            cancelled,
            error = %cause,
            "shipment booked but order not marked shipped"
        );
        counter!("storefront_orders.unrecorded_shipments", 1);
        ServiceError::ShipmentNotRecorded {
            shipment_id: booking.shipment_id,
            awb_code: booking.awb_code,
            cancelled,
            reason: cause.to_string(),
        }
    }

    /// `also_from` lists extra source states allowed for this move.
    async fn transition(
        &self,
        id: Uuid,
        to: OrderStatus,
        shipment: ShipmentInfo,
        also_from: &[OrderStatus],
    ) -> Result<OrderDetail, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let current = order::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
        let from = current.status;

        if !(from.can_transition_to(to) || also_from.contains(&from)) {
            return Err(ServiceError::InvalidStatusTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let now = Utc::now();
        let mut update = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(to))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(id))
            .filter(order::Column::Status.eq(from));
        if let Some(tracking) = shipment.tracking_number {
            update = update.col_expr(order::Column::TrackingNumber, Expr::value(tracking));
        }
        if let Some(provider_id) = shipment.provider_id {
            update = update.col_expr(order::Column::ShipmentProviderId, Expr::value(provider_id));
        }
        let result = update.exec(&txn).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Order was modified concurrently".into(),
            ));
        }

        let mut restocked = Vec::new();
        if to == OrderStatus::Cancelled {
            let items = order_item::Entity::find()
                .filter(order_item::Column::OrderId.eq(id))
                .all(&txn)
                .await?;
            for item in items {
                if let Some(change) = return_stock(&txn, item.product_id, item.quantity).await? {
                    restocked.push(change);
                }
            }
        }

        txn.commit().await?;

        info!(order_id = %id, %from, %to, "order status updated");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: id,
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
                    reason: Some("order cancelled".into()),
                })
                .await;
        }

        self.get_order(id).await
    }
}

/// Decrements stock only if enough is left at write time.
async fn take_stock<C: ConnectionTrait>(
    db: &C,
    product: &product::Model,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::InventoryQuantity,
            Expr::col(product::Column::InventoryQuantity).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product.id))
        .filter(product::Column::InventoryQuantity.gte(quantity))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "{} sold out while placing the order",
            product.sku
        )));
    }
    Ok(())
}

async fn return_stock<C: ConnectionTrait>(
    db: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<Option<(Uuid, i32, i32)>, ServiceError> {
    let Some(product) = product::Entity::find_by_id(product_id).one(db).await? else {
        warn!(%product_id, "cancelled item's product no longer exists");
        return Ok(None);
    };
    let old_quantity = product.inventory_quantity;
    let mut active: product::ActiveModel = product.into();
    active.inventory_quantity = Set(old_quantity + quantity);
    active.updated_at = Set(Utc::now());
    active.update(db).await?;
    Ok(Some((product_id, old_quantity, old_quantity + quantity)))
}

/// The next free order number for `now`'s date, as seen by `db`.
pub async fn next_order_number<C: ConnectionTrait>(
    db: &C,
    now: DateTime<Utc>,
) -> Result<String, ServiceError> {
    let today = now.date_naive();
    let prefix = numbering::daily_prefix(ORDER_PREFIX, today);
    let latest = order::Entity::find()
        .filter(order::Column::OrderNumber.starts_with(prefix.as_str()))
        .order_by_desc(Expr::cust("LENGTH(order_number)"))
        .order_by_desc(order::Column::OrderNumber)
        .one(db)
        .await?;
    Ok(numbering::next_number(
        ORDER_PREFIX,
        today,
        latest.as_ref().map(|o| o.order_number.as_str()),
    ))
}
