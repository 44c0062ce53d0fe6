//! Return requests: creation rules, the status workflow, restocking and stats.

mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{id_of, response_json, shipping_address, TestApp, ADMIN_EMAIL};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    errors::ServiceError,
    models::{return_request, ReturnStatus},
    services::{numbering, returns},
};
use uuid::Uuid;

struct Fixture {
    app: TestApp,
    customer_id: String,
    product_id: String,
    order: Value,
}

impl Fixture {
    /// One order of 3 units out of a stock of 5.
    async fn new() -> Self {
        let app = TestApp::new().await;
        let customer = app.seed_customer("returns@shop.test").await;
        let product = app.seed_product("KETTLE", "kitchen", 2_000, 5).await;
        let response = app
            .place_order(json!({
                "customer_id": id_of(&customer),
                "items": [{ "product_id": id_of(&product), "quantity": 3 }],
                "shipping_address": shipping_address()
            }))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let order = response_json(response).await["data"].clone();
        Self {
            app,
            customer_id: id_of(&customer),
            product_id: id_of(&product),
            order,
        }
    }

    fn order_item_id(&self) -> String {
        self.order["items"][0]["id"].as_str().unwrap().to_string()
    }

    async fn open_return(&self, quantity: i32, condition: &str) -> axum::response::Response {
        self.app
            .public(
                Method::POST,
                "/api/v1/returns",
                Some(json!({
                    "order_id": id_of(&self.order),
                    "customer_id": self.customer_id,
                    "reason": "Changed my mind",
                    "items": [{
                        "order_item_id": self.order_item_id(),
                        "quantity": quantity,
                        "condition": condition
                    }]
                })),
            )
            .await
    }

    async fn set_status(&self, return_id: &str, body: Value) -> axum::response::Response {
        self.app
            .admin(
                Method::PUT,
                &format!("/api/v1/returns/{}/status", return_id),
                Some(body),
            )
            .await
    }

    async fn stock(&self) -> i64 {
        let response = self
            .app
            .public(Method::GET, &format!("/api/v1/products/{}", self.product_id), None)
            .await;
        response_json(response).await["data"]["inventory_quantity"]
            .as_i64()
            .unwrap()
    }
}

#[tokio::test]
async fn return_is_numbered_and_priced_from_the_order() {
    let fx = Fixture::new().await;

    let response = fx.open_return(2, "unopened").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = response_json(response).await["data"].clone();

    let rma = created["rma_number"].as_str().unwrap();
    assert!(rma.starts_with("RMA-") && rma.ends_with("-0001"), "{}", rma);
    assert_eq!(created["status"], "pending");
    assert_eq!(created["refund_amount_cents"], 4_000);
    assert_eq!(created["items"].as_array().unwrap().len(), 1);
    assert_eq!(created["updates"].as_array().unwrap().len(), 1);

    let response = fx.open_return(1, "opened").await;
    let second = response_json(response).await["data"].clone();
    assert!(second["rma_number"].as_str().unwrap().ends_with("-0002"));
}

#[tokio::test]
async fn cannot_return_more_than_was_ordered() {
    let fx = Fixture::new().await;

    let response = fx.open_return(4, "unopened").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(fx.open_return(2, "unopened").await.status(), StatusCode::CREATED);
    // Two already on a live return, one left.
    assert_eq!(fx.open_return(2, "unopened").await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(fx.open_return(1, "unopened").await.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn rejected_returns_free_their_quantity() {
    let fx = Fixture::new().await;

    let first = response_json(fx.open_return(3, "unopened").await).await["data"].clone();
    let response = fx
        .set_status(&id_of(&first), json!({ "status": "rejected", "note": "Outside window" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(fx.open_return(3, "unopened").await.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn foreign_customer_is_refused() {
    let fx = Fixture::new().await;
    let response = fx
        .app
        .public(
            Method::POST,
            "/api/v1/returns",
            Some(json!({
                "order_id": id_of(&fx.order),
                "customer_id": uuid::Uuid::new_v4(),
                "reason": "Not mine",
                "items": [{ "order_item_id": fx.order_item_id(), "quantity": 1, "condition": "unopened" }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn workflow_restocks_resellable_items_and_audits_changes() {
    let fx = Fixture::new().await;
    assert_eq!(fx.stock().await, 2);

    let created = response_json(fx.open_return(2, "unopened").await).await["data"].clone();
    let return_id = id_of(&created);

    let approved = response_json(
        fx.set_status(&return_id, json!({ "status": "approved", "note": "Label emailed" }))
            .await,
    )
    .await["data"]
        .clone();
    assert_eq!(approved["status"], "approved");
    let updates = approved["updates"].as_array().unwrap();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1]["note"], "Label emailed");
    assert_eq!(updates[1]["created_by"], ADMIN_EMAIL);

    // Skipping straight to refunded is not allowed.
    let response = fx.set_status(&return_id, json!({ "status": "refunded" })).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let received = response_json(fx.set_status(&return_id, json!({ "status": "received" })).await)
        .await["data"]
        .clone();
    assert_eq!(received["status"], "received");
    assert_eq!(fx.stock().await, 4);

    let refunded = response_json(fx.set_status(&return_id, json!({ "status": "refunded" })).await)
        .await["data"]
        .clone();
    assert_eq!(refunded["status"], "refunded");
    assert_eq!(refunded["updates"].as_array().unwrap().len(), 4);

    // Terminal.
    let response = fx.set_status(&return_id, json!({ "status": "approved" })).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn defective_items_are_not_restocked() {
    let fx = Fixture::new().await;
    let created = response_json(fx.open_return(1, "defective").await).await["data"].clone();
    let return_id = id_of(&created);

    fx.set_status(&return_id, json!({ "status": "approved" })).await;
    let response = fx.set_status(&return_id, json!({ "status": "received" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(fx.stock().await, 2);
}

#[tokio::test]
async fn same_status_only_records_a_note() {
    let fx = Fixture::new().await;
    let created = response_json(fx.open_return(1, "opened").await).await["data"].clone();
    let return_id = id_of(&created);

    let unchanged = response_json(fx.set_status(&return_id, json!({ "status": "pending" })).await)
        .await["data"]
        .clone();
    assert_eq!(unchanged["updates"].as_array().unwrap().len(), 1);

    let noted = response_json(
        fx.set_status(
            &return_id,
            json!({ "status": "pending", "note": "Customer called" }),
        )
        .await,
    )
    .await["data"]
        .clone();
    assert_eq!(noted["status"], "pending");
    assert_eq!(noted["updates"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn listing_filters_and_stats() {
    let fx = Fixture::new().await;
    let first = response_json(fx.open_return(1, "unopened").await).await["data"].clone();
    fx.open_return(1, "opened").await;

    fx.set_status(&id_of(&first), json!({ "status": "approved" })).await;

    let all = fx
        .app
        .admin_data(Method::GET, "/api/v1/returns", None, StatusCode::OK)
        .await;
    assert_eq!(all["total"], 2);
    assert_eq!(all["total_pages"], 1);

    let approved = fx
        .app
        .admin_data(
            Method::GET,
            "/api/v1/returns?status=approved",
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(approved["total"], 1);
    assert_eq!(approved["items"][0]["id"], first["id"]);

    let by_order = fx
        .app
        .admin_data(
            Method::GET,
            &format!("/api/v1/returns?order_id={}", id_of(&fx.order)),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(by_order["total"], 2);

    let stats = fx
        .app
        .admin_data(Method::GET, "/api/v1/returns/stats", None, StatusCode::OK)
        .await;
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["by_status"]["pending"], 1);
    assert_eq!(stats["by_status"]["approved"], 1);
    assert_eq!(stats["by_status"]["refunded"], 0);
    assert_eq!(stats["pending_refund_cents"], 2_000);
    assert_eq!(stats["refunded_cents"], 0);

    let response = fx.app.public(Method::GET, "/api/v1/returns", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn oversized_quantities_are_rejected_without_overflow() {
    let fx = Fixture::new().await;

    let line = json!({
        "order_item_id": fx.order_item_id(),
        "quantity": 1_073_741_824,
        "condition": "unopened"
    });
    let response = fx
        .app
        .public(
            Method::POST,
            "/api/v1/returns",
            Some(json!({
                "order_id": id_of(&fx.order),
                "reason": "Changed my mind",
                "items": [line.clone(), line]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let listed = fx
        .app
        .admin_data(Method::GET, "/api/v1/returns", None, StatusCode::OK)
        .await;
    assert_eq!(listed["total"], 0);
    assert_eq!(fx.stock().await, 2);
}

#[tokio::test]
async fn cancelled_orders_cannot_be_returned() {
    let fx = Fixture::new().await;
    fx.app
        .admin_data(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", id_of(&fx.order)),
            Some(json!({ "status": "cancelled" })),
            StatusCode::OK,
        )
        .await;

    let response = fx.open_return(1, "unopened").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rma_collision_is_retried_with_a_fresh_number() {
    let fx = Fixture::new().await;
    let db = fx.app.state.db.clone();
    let order_id: Uuid = id_of(&fx.order).parse().unwrap();
    let customer_id: Uuid = fx.customer_id.parse().unwrap();

    let row = |rma_number: String| {
        let now = Utc::now();
        return_request::ActiveModel {
            id: Set(Uuid::new_v4()),
            rma_number: Set(rma_number),
            order_id: Set(order_id),
            customer_id: Set(customer_id),
            reason: Set("Damaged".to_string()),
            status: Set(ReturnStatus::Pending),
            refund_amount_cents: Set(0),
            notes: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
    };

    let mut attempts = Vec::new();
    let created = numbering::retry_on_collision("return", |attempt| {
        attempts.push(attempt);
        let db = db.clone();
        let row = &row;
        async move {
            let number = returns::next_rma_number(&*db, Utc::now()).await?;
            if attempt == 1 {
                // Another request commits the same number first.
                row(number.clone()).insert(&*db).await?;
            }
            Ok::<_, ServiceError>(row(number).insert(&*db).await?)
        }
    })
    .await
    .expect("second attempt succeeds");

    assert_eq!(attempts, vec![1, 2]);
    assert!(created.rma_number.ends_with("-0002"), "{}", created.rma_number);

    // The HTTP path keeps numbering past both rows.
    let response = fx.open_return(1, "unopened").await;
    let next = response_json(response).await["data"]["rma_number"].clone();
    assert!(next.as_str().unwrap().ends_with("-0003"), "{}", next);
}
