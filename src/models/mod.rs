//! SeaORM entities.

pub mod cart;
pub mod coupon;
pub mod coupon_usage;
pub mod customer;
pub mod order;
pub mod order_item;
pub mod product;
pub mod return_item;
pub mod return_request;
pub mod return_update;

pub use cart::CartStatus;
pub use coupon::DiscountType;
pub use order::OrderStatus;
pub use product::ProductStatus;
pub use return_item::ItemCondition;
pub use return_request::ReturnStatus;
