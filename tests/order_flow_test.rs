//! Checkout and order lifecycle through the HTTP surface.

mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{id_of, response_json, shipping_address, TestApp};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;
use storefront_api::{
    errors::ServiceError,
    models::{order, OrderStatus},
    services::{numbering, orders},
};
use uuid::Uuid;

async fn stock_of(app: &TestApp, product_id: &str) -> i64 {
    let response = app
        .public(Method::GET, &format!("/api/v1/products/{}", product_id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    response_json(response).await["data"]["inventory_quantity"]
        .as_i64()
        .expect("inventory_quantity")
}

#[tokio::test]
async fn order_takes_stock_and_gets_daily_number() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("first@shop.test").await;
    let product = app.seed_product("TEE-RED", "apparel", 25_000, 10).await;

    let response = app
        .place_order(json!({
            "customer_id": id_of(&customer),
            "items": [{ "product_id": id_of(&product), "quantity": 2 }],
            "shipping_address": shipping_address()
        }))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let first = response_json(response).await["data"].clone();

    let number = first["order_number"].as_str().unwrap();
    assert!(number.starts_with("ORD-"), "{}", number);
    assert!(number.ends_with("-0001"), "{}", number);
    assert_eq!(first["status"], "pending");
    assert_eq!(first["subtotal_cents"], 50_000);
    // At or above the free-shipping threshold.
    assert_eq!(first["shipping_cents"], 0);
    assert_eq!(first["total_cents"], 50_000);
    assert_eq!(first["items"].as_array().unwrap().len(), 1);
    assert_eq!(first["items"][0]["sku"], "TEE-RED");
    assert_eq!(first["shipping_address"]["country"], "India");

    let response = app
        .place_order(json!({
            "customer_id": id_of(&customer),
            "items": [{ "product_id": id_of(&product), "quantity": 1 }],
            "shipping_address": shipping_address()
        }))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let second = response_json(response).await["data"].clone();
    assert!(second["order_number"].as_str().unwrap().ends_with("-0002"));
    assert_eq!(second["shipping_cents"], 4_900);
    assert_eq!(second["total_cents"], 29_900);

    assert_eq!(stock_of(&app, &id_of(&product)).await, 7);
}

#[tokio::test]
async fn repeated_lines_are_merged() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("merge@shop.test").await;
    let product = app.seed_product("MUG", "home", 1_000, 5).await;

    let response = app
        .place_order(json!({
            "customer_id": id_of(&customer),
            "items": [
                { "product_id": id_of(&product), "quantity": 2 },
                { "product_id": id_of(&product), "quantity": 1 }
            ],
            "shipping_address": shipping_address()
        }))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let order = response_json(response).await["data"].clone();
    assert_eq!(order["items"].as_array().unwrap().len(), 1);
    assert_eq!(order["items"][0]["quantity"], 3);
    assert_eq!(stock_of(&app, &id_of(&product)).await, 2);
}

#[tokio::test]
async fn insufficient_stock_leaves_nothing_behind() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("short@shop.test").await;
    let product = app.seed_product("LAMP", "home", 3_000, 1).await;

    let response = app
        .place_order(json!({
            "customer_id": id_of(&customer),
            "items": [{ "product_id": id_of(&product), "quantity": 2 }],
            "shipping_address": shipping_address()
        }))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    assert_eq!(stock_of(&app, &id_of(&product)).await, 1);
    let orders = app
        .admin_data(Method::GET, "/api/v1/orders", None, StatusCode::OK)
        .await;
    assert_eq!(orders["total"], 0);
}

#[tokio::test]
async fn rejects_unknown_customer_and_empty_cart() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("empty@shop.test").await;
    let product = app.seed_product("PEN", "office", 100, 10).await;

    let response = app
        .place_order(json!({
            "customer_id": uuid::Uuid::new_v4(),
            "items": [{ "product_id": id_of(&product), "quantity": 1 }],
            "shipping_address": shipping_address()
        }))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .place_order(json!({
            "customer_id": id_of(&customer),
            "items": [],
            "shipping_address": shipping_address()
        }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn archived_products_cannot_be_ordered() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("archived@shop.test").await;
    let product = app.seed_product("OLD", "misc", 500, 10).await;

    app.admin_data(
        Method::DELETE,
        &format!("/api/v1/products/{}", id_of(&product)),
        None,
        StatusCode::OK,
    )
    .await;

    let response = app
        .place_order(json!({
            "customer_id": id_of(&customer),
            "items": [{ "product_id": id_of(&product), "quantity": 1 }],
            "shipping_address": shipping_address()
        }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancelling_returns_stock_and_blocks_further_moves() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("cancel@shop.test").await;
    let product = app.seed_product("BAG", "accessories", 2_000, 5).await;

    let response = app
        .place_order(json!({
            "customer_id": id_of(&customer),
            "items": [{ "product_id": id_of(&product), "quantity": 3 }],
            "shipping_address": shipping_address()
        }))
        .await;
    let order = response_json(response).await["data"].clone();
    let order_id = id_of(&order);
    assert_eq!(stock_of(&app, &id_of(&product)).await, 2);

    let status_uri = format!("/api/v1/orders/{}/status", order_id);
    let confirmed = app
        .admin_data(
            Method::PUT,
            &status_uri,
            Some(json!({ "status": "confirmed" })),
            StatusCode::OK,
        )
        .await;
    assert_eq!(confirmed["status"], "confirmed");

    let cancelled = app
        .admin_data(
            Method::PUT,
            &status_uri,
            Some(json!({ "status": "cancelled" })),
            StatusCode::OK,
        )
        .await;
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(stock_of(&app, &id_of(&product)).await, 5);

    let response = app
        .admin(
            Method::PUT,
            &status_uri,
            Some(json!({ "status": "shipped" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn skipping_states_is_a_conflict() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("skip@shop.test").await;
    let product = app.seed_product("CAP", "apparel", 800, 5).await;

    let order = response_json(
        app.place_order(json!({
            "customer_id": id_of(&customer),
            "items": [{ "product_id": id_of(&product), "quantity": 1 }],
            "shipping_address": shipping_address()
        }))
        .await,
    )
    .await["data"]
        .clone();

    let response = app
        .admin(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", id_of(&order)),
            Some(json!({ "status": "delivered" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn dashboard_routes_need_a_session() {
    let app = TestApp::new().await;

    let response = app.public(Method::GET, "/api/v1/orders", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some("not-a-token"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.public(Method::GET, "/api/v1/products", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn shipping_without_shiprocket_is_unavailable() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("ship@shop.test").await;
    let product = app.seed_product("BOX", "home", 1_500, 5).await;
    let order = response_json(
        app.place_order(json!({
            "customer_id": id_of(&customer),
            "items": [{ "product_id": id_of(&product), "quantity": 1 }],
            "shipping_address": shipping_address()
        }))
        .await,
    )
    .await["data"]
        .clone();

    let response = app
        .admin(
            Method::POST,
            &format!("/api/v1/orders/{}/ship", id_of(&order)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn low_stock_report_lists_scarce_products() {
    let app = TestApp::new().await;
    let scarce = app.seed_product("SCARCE", "misc", 100, 1).await;
    app.seed_product("PLENTY", "misc", 100, 50).await;

    let low = app
        .admin_data(Method::GET, "/api/v1/inventory/low-stock", None, StatusCode::OK)
        .await;
    let skus: Vec<&str> = low
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["sku"].as_str().unwrap())
        .collect();
    assert_eq!(skus, vec!["SCARCE"]);

    let adjusted = app
        .admin_data(
            Method::POST,
            &format!("/api/v1/products/{}/inventory", id_of(&scarce)),
            Some(json!({ "delta": 10, "reason": "restock" })),
            StatusCode::OK,
        )
        .await;
    assert_eq!(adjusted["inventory_quantity"], 11);

    let response = app
        .admin(
            Method::POST,
            &format!("/api/v1/products/{}/inventory", id_of(&scarce)),
            Some(json!({ "delta": -100 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn cart_snapshot_is_upserted_per_customer() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("browser@shop.test").await;
    let uri = format!("/api/v1/carts/{}", id_of(&customer));

    let response = app
        .public(
            Method::PUT,
            &uri,
            Some(json!({ "item_count": 2, "subtotal_cents": 4_000 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let first = response_json(response).await["data"].clone();
    assert_eq!(first["status"], "active");

    let response = app
        .public(
            Method::PUT,
            &uri,
            Some(json!({ "item_count": 3, "subtotal_cents": 6_500 })),
        )
        .await;
    let second = response_json(response).await["data"].clone();
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["item_count"], 3);
    assert_eq!(second["subtotal_cents"], 6_500);

    let response = app
        .public(
            Method::PUT,
            &uri,
            Some(json!({ "item_count": -1, "subtotal_cents": 0 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .public(
            Method::PUT,
            "/api/v1/carts/00000000-0000-0000-0000-000000000000",
            Some(json!({ "item_count": 1, "subtotal_cents": 100 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn product_listing_filters_and_searches() {
    let app = TestApp::new().await;
    app.seed_product("TEE-RED", "apparel", 1_500, 5).await;
    app.seed_product("TEE-BLUE", "Apparel", 1_500, 5).await;
    let mug = app.seed_product("MUG-01", "kitchen", 900, 5).await;
    let response = app
        .admin(Method::DELETE, &format!("/api/v1/products/{}", id_of(&mug)), None)
        .await;
    assert!(response.status().is_success());

    let total = |uri: &'static str| {
        let app = &app;
        async move {
            let response = app.public(Method::GET, uri, None).await;
            assert_eq!(response.status(), StatusCode::OK);
            response_json(response).await["data"]["total"].as_u64().unwrap()
        }
    };

    // Archived products stay hidden unless asked for.
    assert_eq!(total("/api/v1/products").await, 2);
    assert_eq!(total("/api/v1/products?status=archived").await, 1);
    assert_eq!(total("/api/v1/products?category=APPAREL").await, 2);
    assert_eq!(total("/api/v1/products?category=kitchen").await, 0);
    // Name and SKU matching ignores case.
    assert_eq!(total("/api/v1/products?search=tee-r").await, 1);
    assert_eq!(total("/api/v1/products?search=PRODUCT%20TEE").await, 2);
    assert_eq!(total("/api/v1/products?search=tee%25").await, 0);
}

#[tokio::test]
async fn customer_emails_are_normalized_and_unique() {
    let app = TestApp::new().await;

    let created = app
        .admin_data(
            Method::POST,
            "/api/v1/customers",
            Some(json!({ "email": "Jane.Doe@Shop.TEST", "name": "Jane Doe" })),
            StatusCode::CREATED,
        )
        .await;
    assert_eq!(created["email"], "jane.doe@shop.test");

    let response = app
        .admin(
            Method::POST,
            "/api/v1/customers",
            Some(json!({ "email": "jane.doe@shop.test", "name": "Someone Else" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let found = app
        .admin_data(Method::GET, "/api/v1/customers?search=JANE", None, StatusCode::OK)
        .await;
    assert_eq!(found["total"], 1);
}

#[tokio::test]
async fn order_number_collision_is_retried_with_a_fresh_number() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("numbers@shop.test").await;
    let customer_id: Uuid = id_of(&customer).parse().unwrap();
    let db = app.state.db.clone();

    let row = |order_number: String| {
        let now = Utc::now();
        order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number),
            customer_id: Set(customer_id),
            status: Set(OrderStatus::Pending),
            subtotal_cents: Set(0),
            discount_cents: Set(0),
            shipping_cents: Set(0),
            total_cents: Set(0),
            coupon_code: Set(None),
            shipping_address: Set(shipping_address()),
            tracking_number: Set(None),
            shipment_provider_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
    };

    let mut attempts = Vec::new();
    let created = numbering::retry_on_collision("order", |attempt| {
        attempts.push(attempt);
        let db = db.clone();
        let row = &row;
        async move {
            let number = orders::next_order_number(&*db, Utc::now()).await?;
            if attempt == 1 {
                // Another checkout commits the same number first.
                row(number.clone()).insert(&*db).await?;
            }
            Ok::<_, ServiceError>(row(number).insert(&*db).await?)
        }
    })
    .await
    .expect("second attempt succeeds");

    assert_eq!(attempts, vec![1, 2]);
    assert!(created.order_number.ends_with("-0002"), "{}", created.order_number);
}
