use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront API

Backend for an online storefront and its admin dashboard.

## Features

- **Catalog**: Products, stock levels and low-stock reporting
- **Orders**: Checkout with stock reservation, coupon redemption and daily order numbers
- **Coupons**: Rule-based validation, customer segments, fraud checks and recommendations
- **Returns**: Return requests with an audited status workflow and restocking
- **Shipping**: Shiprocket booking and AWB tracking
- **Media**: Signed Cloudinary uploads

## Authentication

Storefront endpoints are public. Dashboard endpoints require an admin session
token obtained from `POST /auth/login`:

```
Authorization: Bearer <session-token>
```

## Error Handling

Errors share one body shape:

```json
{
  "error": "Bad Request",
  "message": "Validation failed",
  "request_id": "3f0c...",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

## Pagination

List endpoints accept `page` (default 1) and `limit` (default 20, max 100).
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Admin session endpoints"),
        (name = "Products", description = "Catalog and inventory endpoints"),
        (name = "Customers", description = "Customer and cart endpoints"),
        (name = "Orders", description = "Order management endpoints"),
        (name = "Coupons", description = "Coupon engine endpoints"),
        (name = "Returns", description = "Return processing endpoints"),
        (name = "Shipping", description = "Shipment tracking endpoints"),
        (name = "Uploads", description = "Media upload endpoints")
    ),
    paths(
        // Auth
        crate::auth::login_handler,
        crate::auth::validate_handler,
        crate::auth::logout_handler,

        // Products
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::create_product,
        crate::handlers::products::update_product,
        crate::handlers::products::archive_product,
        crate::handlers::products::adjust_inventory,
        crate::handlers::products::low_stock,

        // Customers
        crate::handlers::customers::list_customers,
        crate::handlers::customers::create_customer,
        crate::handlers::customers::get_customer,
        crate::handlers::customers::get_customer_cart,
        crate::handlers::carts::upsert_cart,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::ship_order,

        // Coupons
        crate::handlers::coupons::validate_coupon,
        crate::handlers::coupons::recommend_coupons,
        crate::handlers::coupons::customer_segments,
        crate::handlers::coupons::list_coupons,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::get_coupon,
        crate::handlers::coupons::update_coupon,
        crate::handlers::coupons::deactivate_coupon,
        crate::handlers::coupons::list_usages,

        // Returns
        crate::handlers::returns::create_return,
        crate::handlers::returns::list_returns,
        crate::handlers::returns::return_stats,
        crate::handlers::returns::get_return,
        crate::handlers::returns::update_return_status,

        // Shipping & uploads
        crate::handlers::shipping::track_shipment,
        crate::handlers::uploads::sign_upload,
        crate::handlers::uploads::upload_media,
    ),
    components(
        schemas(
            crate::models::OrderStatus,
            crate::models::ReturnStatus,
            crate::models::ProductStatus,
            crate::models::DiscountType,
            crate::models::ItemCondition,
            crate::models::CartStatus,
            crate::services::coupons::rules::CouponRule,
            crate::services::coupons::fraud::FraudFlag,
            crate::auth::AdminSession,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

/// Registers the `bearer_auth` scheme referenced by admin endpoints.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("session")
                    .description(Some("Admin session token from POST /auth/login"))
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_storefront_and_admin_paths() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/orders/{id}/ship"));
        assert!(json.contains("/api/v1/coupons/validate"));
        assert!(json.contains("/auth/login"));
        assert!(json.contains("bearer_auth"));
    }
}
