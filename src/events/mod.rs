use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Sends an event after the owning transaction committed. A closed channel
    /// must not fail a request whose writes are already durable.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event dropped");
        }
    }
}

/// Domain events published after successful writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        customer_id: Uuid,
        total_cents: i64,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderShipped {
        order_id: Uuid,
        awb_code: Option<String>,
    },
    ReturnCreated {
        return_id: Uuid,
        rma_number: String,
        order_id: Uuid,
    },
    ReturnStatusChanged {
        return_id: Uuid,
        old_status: String,
        new_status: String,
    },
    CouponRedeemed {
        coupon_id: Uuid,
        customer_id: Uuid,
        order_id: Option<Uuid>,
        discount_cents: i64,
    },
    CouponCreated(Uuid),
    CouponDeactivated(Uuid),
    InventoryAdjusted {
        product_id: Uuid,
        old_quantity: i32,
        new_quantity: i32,
        reason: Option<String>,
    },
    CustomerCreated(Uuid),
    AdminSessionStarted {
        session_id: String,
        email: String,
        at: DateTime<Utc>,
    },
    AdminSessionEnded {
        session_id: String,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                customer_id,
                total_cents,
            } => {
                info!(%order_id, %customer_id, total_cents, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::ReturnCreated {
                return_id,
                rma_number,
                order_id,
            } => {
                info!(%return_id, %rma_number, %order_id, "return created");
            }
            Event::ReturnStatusChanged {
                return_id,
                old_status,
                new_status,
            } => {
                info!(%return_id, %old_status, %new_status, "return status changed");
            }
            Event::CouponRedeemed {
                coupon_id,
                customer_id,
                discount_cents,
                ..
            } => {
                info!(%coupon_id, %customer_id, discount_cents, "coupon redeemed");
            }
            Event::InventoryAdjusted {
                product_id,
                old_quantity,
                new_quantity,
                ..
            } => {
                if *new_quantity == 0 {
                    warn!(%product_id, old_quantity, "product out of stock");
                } else {
                    info!(%product_id, old_quantity, new_quantity, "inventory adjusted");
                }
            }
            other => {
                info!(event = ?other, "event received");
            }
        }
    }

    info!("Event channel closed; event processing stopped");
}
