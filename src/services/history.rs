use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::order::Entity as OrderEntity,
    entities::order_history::{
        self, ActiveModel as HistoryActiveModel, Entity as HistoryEntity, Model as HistoryModel,
    },
    errors::ServiceError,
    models::history::HistoryMetadata,
};

/// Appends one history entry on the caller's connection. Callers pass
/// their open transaction so the entry commits (or rolls back) together
/// with the change it describes.
pub async fn record<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    actor: &str,
    description: &str,
    metadata: &HistoryMetadata,
) -> Result<HistoryModel, ServiceError> {
    let payload = serde_json::to_value(metadata).map_err(|e| {
        ServiceError::InternalError(format!("failed to serialize history metadata: {}", e))
    })?;

    let entry = HistoryActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        action: Set(metadata.action().to_string()),
        description: Set(description.to_string()),
        actor: Set(actor.to_string()),
        metadata: Set(payload),
        created_at: Set(Utc::now()),
    };

    Ok(entry.insert(conn).await?)
}

/// Read side of the activity log.
#[derive(Clone)]
pub struct HistoryService {
    db: Arc<DbPool>,
}

impl HistoryService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Lists all history entries for an order in creation order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<HistoryModel>, ServiceError> {
        let db = &*self.db;

        OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let entries = HistoryEntity::find()
            .filter(order_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_history::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(entries)
    }
}
