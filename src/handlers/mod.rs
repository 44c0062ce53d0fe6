pub mod carts;
pub mod coupons;
pub mod customers;
pub mod orders;
pub mod products;
pub mod returns;
pub mod shipping;
pub mod uploads;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    integrations::{CloudinaryClient, ShiprocketClient},
    services::{
        carts::CartService, catalog::CatalogService, coupons::CouponService,
        customers::CustomerService, orders::OrderService, returns::ReturnService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub customers: Arc<CustomerService>,
    pub carts: Arc<CartService>,
    pub coupons: Arc<CouponService>,
    pub orders: Arc<OrderService>,
    pub returns: Arc<ReturnService>,
    pub shiprocket: Option<Arc<ShiprocketClient>>,
    pub cloudinary: Option<Arc<CloudinaryClient>>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let coupons = Arc::new(CouponService::new(
            db_pool.clone(),
            event_sender.clone(),
            config,
        ));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            event_sender.clone(),
            coupons.clone(),
        ));

        let shiprocket = config
            .shiprocket
            .clone()
            .map(ShiprocketClient::new)
            .transpose()?
            .map(Arc::new);
        let cloudinary = config
            .cloudinary
            .clone()
            .map(CloudinaryClient::new)
            .transpose()?
            .map(Arc::new);

        Ok(Self {
            catalog: Arc::new(CatalogService::new(db_pool.clone(), event_sender.clone())),
            customers: Arc::new(CustomerService::new(
                db_pool.clone(),
                event_sender.clone(),
                (&config.coupons).into(),
            )),
            carts: Arc::new(CartService::new(db_pool.clone())),
            coupons,
            orders,
            returns: Arc::new(ReturnService::new(db_pool, event_sender)),
            shiprocket,
            cloudinary,
        })
    }

    pub fn shiprocket(&self) -> Result<&ShiprocketClient, ServiceError> {
        self.shiprocket
            .as_deref()
            .ok_or_else(|| ServiceError::ServiceUnavailable("Shiprocket is not configured".into()))
    }

    pub fn cloudinary(&self) -> Result<&CloudinaryClient, ServiceError> {
        self.cloudinary
            .as_deref()
            .ok_or_else(|| ServiceError::ServiceUnavailable("Cloudinary is not configured".into()))
    }
}
