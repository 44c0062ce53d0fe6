use crate::{
    db::DbPool,
    errors::ServiceError,
    events::{Event, EventSender},
    models::customer,
    services::{
        contains_ignore_case,
        coupons::{segments, CustomerProfile, SegmentThresholds},
        returns::page_and_limit,
    },
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct CreateCustomerRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 5, max = 32))]
    pub phone: Option<String>,
}

/// A customer with segmentation aggregates.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CustomerDetail {
    #[serde(flatten)]
    pub customer: customer::Model,
    pub profile: CustomerProfile,
}

/// Service for managing customers
#[derive(Clone)]
pub struct CustomerService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    thresholds: SegmentThresholds,
}

impl CustomerService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        thresholds: SegmentThresholds,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            thresholds,
        }
    }

    /// Creates a customer; emails are stored lower-cased and must be unique.
    #[instrument(skip(self, request))]
    pub async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<customer::Model, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;
        let email = request.email.trim().to_lowercase();

        if customer::Entity::find()
            .filter(customer::Column::Email.eq(email.as_str()))
            .one(db)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "A customer with email {} already exists",
                email
            )));
        }

        let now = Utc::now();
        let created = customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email),
            name: Set(request.name.trim().to_string()),
            phone: Set(request.phone),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| {
            let err = ServiceError::from(e);
            if err.is_unique_violation() {
                ServiceError::Conflict("A customer with this email already exists".into())
            } else {
                err
            }
        })?;

        info!(customer_id = %created.id, "customer created");
        self.event_sender
            .send_or_log(Event::CustomerCreated(created.id))
            .await;
        Ok(created)
    }

    /// Lists customers, newest first, optionally matching name or email.
    #[instrument(skip(self))]
    pub async fn list_customers(
        &self,
        search: Option<String>,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> Result<(Vec<customer::Model>, u64), ServiceError> {
        let (page, limit) = page_and_limit(page, limit);
        let mut query = customer::Entity::find();
        if let Some(search) = search.filter(|s| !s.trim().is_empty()) {
            let search = search.trim().to_string();
            query = query.filter(
                Condition::any()
                    .add(contains_ignore_case(customer::Column::Name, &search))
                    .add(contains_ignore_case(customer::Column::Email, &search)),
            );
        }
        let paginator = query
            .order_by_desc(customer::Column::CreatedAt)
            .paginate(&*self.db_pool, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;
        Ok((items, total))
    }

    /// Gets a customer with the computed profile.
    #[instrument(skip(self))]
    pub async fn get_customer(&self, id: Uuid) -> Result<CustomerDetail, ServiceError> {
        let db = &*self.db_pool;
        let customer = customer::Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {} not found", id)))?;
        let profile = segments::load_profile(db, Some(id), &self.thresholds, Utc::now()).await?;
        Ok(CustomerDetail { customer, profile })
    }
}
