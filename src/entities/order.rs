use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-readable number, `<prefix>-<sequence>`. Immutable once assigned.
    #[sea_orm(unique)]
    #[validate(length(
        min = 1,
        max = 50,
        message = "Order number must be between 1 and 50 characters"
    ))]
    pub order_number: String,

    /// `sales` or `purchase`.
    pub order_type: String,

    /// Customer for sales orders, vendor for purchase orders.
    pub counterparty_id: Uuid,

    pub status: String,
    pub order_date: DateTime<Utc>,
    pub expected_date: Option<DateTime<Utc>>,

    /// Derived: always equals the sum of line amounts.
    pub total_amount: Decimal,

    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency guard; bumped on every committed write.
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_line::Entity")]
    OrderLine,
    #[sea_orm(has_many = "super::order_history::Entity")]
    OrderHistory,
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLine.def()
    }
}

impl Related<super::order_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderHistory.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}
