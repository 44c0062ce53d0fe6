use crate::{
    db::DbPool,
    errors::ServiceError,
    events::{Event, EventSender},
    models::{product, ProductStatus},
    services::{contains_ignore_case, returns::page_and_limit},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[validate(range(min = 0, max = 100000000000))]
    pub price_cents: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub inventory_quantity: i32,
    #[serde(default = "default_low_stock_threshold")]
    #[validate(range(min = 0))]
    pub low_stock_threshold: i32,
    #[serde(default = "default_status")]
    pub status: ProductStatus,
    #[validate(url)]
    pub image_url: Option<String>,
}

fn default_low_stock_threshold() -> i32 {
    5
}

fn default_status() -> ProductStatus {
    ProductStatus::Active
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub category: Option<String>,
    #[validate(range(min = 0, max = 100000000000))]
    pub price_cents: Option<i64>,
    #[validate(range(min = 0))]
    pub low_stock_threshold: Option<i32>,
    pub status: Option<ProductStatus>,
    #[validate(url)]
    pub image_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct AdjustInventoryRequest {
    /// Signed change in units.
    pub delta: i32,
    #[validate(length(max = 255))]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct ProductFilter {
    pub category: Option<String>,
    /// Archived products are hidden unless asked for.
    pub status: Option<ProductStatus>,
    /// Matches name or SKU.
    pub search: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

fn normalize_sku(sku: &str) -> String {
    sku.trim().to_uppercase()
}

fn normalize_category(category: &str) -> String {
    category.trim().to_lowercase()
}

/// Products and stock levels
#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        filter: ProductFilter,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let (page, limit) = page_and_limit(filter.page, filter.limit);
        let mut query = product::Entity::find();

        query = match filter.status {
            Some(status) => query.filter(product::Column::Status.eq(status)),
            None => query.filter(product::Column::Status.ne(ProductStatus::Archived)),
        };
        if let Some(category) = filter.category.filter(|c| !c.trim().is_empty()) {
            query = query.filter(product::Column::Category.eq(normalize_category(&category)));
        }
        if let Some(search) = filter.search.filter(|s| !s.trim().is_empty()) {
            let search = search.trim().to_string();
            query = query.filter(
                Condition::any()
                    .add(contains_ignore_case(product::Column::Name, &search))
                    .add(contains_ignore_case(product::Column::Sku, &search)),
            );
        }

        let paginator = query
            .order_by_asc(product::Column::Name)
            .paginate(&*self.db_pool, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;
        Ok((items, total))
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }

    #[instrument(skip(self, request), fields(sku = %request.sku))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;
        let sku = normalize_sku(&request.sku);

        if product::Entity::find()
            .filter(product::Column::Sku.eq(sku.as_str()))
            .one(db)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!("SKU {} already exists", sku)));
        }

        let now = Utc::now();
        let created = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku),
            name: Set(request.name.trim().to_string()),
            description: Set(request.description),
            category: Set(normalize_category(&request.category)),
            price_cents: Set(request.price_cents),
            inventory_quantity: Set(request.inventory_quantity),
            low_stock_threshold: Set(request.low_stock_threshold),
            status: Set(request.status),
            image_url: Set(request.image_url),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| {
            let err = ServiceError::from(e);
            if err.is_unique_violation() {
                ServiceError::Conflict("SKU already exists".into())
            } else {
                err
            }
        })?;

        info!(product_id = %created.id, sku = %created.sku, "product created");
        Ok(created)
    }

    #[instrument(skip(self, request))]
    pub async fn update_product(
        &self,
        id: Uuid,
        request: UpdateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        request.validate()?;
        let existing = self.get_product(id).await?;
        let mut active: product::ActiveModel = existing.into();

        if let Some(name) = request.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(description) = request.description {
            active.description = Set(Some(description));
        }
        if let Some(category) = request.category {
            active.category = Set(normalize_category(&category));
        }
        if let Some(price) = request.price_cents {
            active.price_cents = Set(price);
        }
        if let Some(threshold) = request.low_stock_threshold {
            active.low_stock_threshold = Set(threshold);
        }
        if let Some(status) = request.status {
            active.status = Set(status);
        }
        if let Some(url) = request.image_url {
            active.image_url = Set(Some(url));
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db_pool).await?)
    }

    /// Soft delete.
    #[instrument(skip(self))]
    pub async fn archive_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        let existing = self.get_product(id).await?;
        let mut active: product::ActiveModel = existing.into();
        active.status = Set(ProductStatus::Archived);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db_pool).await?)
    }

    /// Applies a signed stock change atomically; stock never goes below zero.
    #[instrument(skip(self, request), fields(delta = request.delta))]
    pub async fn adjust_inventory(
        &self,
        id: Uuid,
        request: AdjustInventoryRequest,
    ) -> Result<product::Model, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;
        let before = self.get_product(id).await?;

        let result = product::Entity::update_many()
            .col_expr(
                product::Column::InventoryQuantity,
                Expr::col(product::Column::InventoryQuantity).add(request.delta),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(id))
            .filter(
                Expr::expr(Expr::col(product::Column::InventoryQuantity).add(request.delta))
                    .gte(0),
            )
            .exec(db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InsufficientStock(format!(
                "Adjusting {} by {} would leave negative stock ({} on hand)",
                before.sku, request.delta, before.inventory_quantity
            )));
        }

        let after = self.get_product(id).await?;
        info!(
            product_id = %id,
            old_quantity = before.inventory_quantity,
            new_quantity = after.inventory_quantity,
            "inventory adjusted"
        );
        self.event_sender
            .send_or_log(Event::InventoryAdjusted {
                product_id: id,
                old_quantity: before.inventory_quantity,
                new_quantity: after.inventory_quantity,
                reason: request.reason,
            })
            .await;
        Ok(after)
    }

    /// Non-archived products at or under their low-stock threshold, scarcest first.
    #[instrument(skip(self))]
    pub async fn low_stock(&self) -> Result<Vec<product::Model>, ServiceError> {
        Ok(product::Entity::find()
            .filter(product::Column::Status.ne(ProductStatus::Archived))
            .filter(
                Expr::col(product::Column::InventoryQuantity)
                    .lte(Expr::col(product::Column::LowStockThreshold)),
            )
            .order_by_asc(product::Column::InventoryQuantity)
            .all(&*self.db_pool)
            .await?)
    }
}
