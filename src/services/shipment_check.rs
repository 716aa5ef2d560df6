use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        inventory_item::{self, Entity as InventoryEntity},
        order::Entity as OrderEntity,
        order_line::{self, Entity as OrderLineEntity},
    },
    errors::ServiceError,
};

/// Availability of one order line against live stock.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LineAvailability {
    pub item_id: Uuid,
    pub sku: String,
    pub ordered_qty: i32,
    pub current_stock: i32,
    pub available: bool,
    pub shortage: i32,
}

/// Full availability report for an order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShipmentCheckReport {
    pub order_id: Uuid,
    pub order_number: String,
    pub checked_at: DateTime<Utc>,
    pub can_ship_all: bool,
    pub total_shortage: i32,
    pub available_lines: usize,
    pub short_lines: usize,
    pub lines: Vec<LineAvailability>,
}

fn availability_for(item_id: Uuid, sku: &str, ordered_qty: i32, current_stock: i32) -> LineAvailability {
    let shortage = (ordered_qty - current_stock).max(0);
    LineAvailability {
        item_id,
        sku: sku.to_string(),
        ordered_qty,
        current_stock,
        available: shortage == 0,
        shortage,
    }
}

/// Read-only comparison of ordered quantities against live stock. Safe to
/// call repeatedly; every call reads fresh stock levels. Stock may still
/// change between a check and the shipment creation it informs; the
/// advisory-check model accepts that race and does not lock.
#[derive(Clone)]
pub struct ShipmentCheckService {
    db: Arc<DbPool>,
}

impl ShipmentCheckService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn check(&self, order_id: Uuid) -> Result<ShipmentCheckReport, ServiceError> {
        let db = &*self.db;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let lines = OrderLineEntity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .order_by_asc(order_line::Column::CreatedAt)
            .all(db)
            .await?;

        let item_ids: Vec<Uuid> = lines.iter().map(|l| l.item_id).collect();
        let items: HashMap<Uuid, inventory_item::Model> = InventoryEntity::find()
            .filter(inventory_item::Column::Id.is_in(item_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        let mut report_lines = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = items.get(&line.item_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Inventory item {} not found", line.item_id))
            })?;
            report_lines.push(availability_for(
                item.id,
                &item.sku,
                line.quantity,
                item.quantity_on_hand,
            ));
        }

        let available_lines = report_lines.iter().filter(|l| l.available).count();
        let short_lines = report_lines.len() - available_lines;
        let total_shortage = report_lines.iter().map(|l| l.shortage).sum();
        let can_ship_all = short_lines == 0;

        info!(
            order_number = %order.order_number,
            can_ship_all,
            total_shortage,
            "shipment availability checked"
        );

        Ok(ShipmentCheckReport {
            order_id,
            order_number: order.order_number,
            checked_at: Utc::now(),
            can_ship_all,
            total_shortage,
            available_lines,
            short_lines,
            lines: report_lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_stock_is_available() {
        let line = availability_for(Uuid::new_v4(), "SKU-1", 3, 5);
        assert!(line.available);
        assert_eq!(line.shortage, 0);
    }

    #[test]
    fn exact_stock_is_available() {
        let line = availability_for(Uuid::new_v4(), "SKU-1", 5, 5);
        assert!(line.available);
        assert_eq!(line.shortage, 0);
    }

    #[test]
    fn shortage_is_clamped_to_zero_floor() {
        let line = availability_for(Uuid::new_v4(), "SKU-1", 7, 2);
        assert!(!line.available);
        assert_eq!(line.shortage, 5);

        let overstocked = availability_for(Uuid::new_v4(), "SKU-2", 1, 100);
        assert_eq!(overstocked.shortage, 0);
    }
}
