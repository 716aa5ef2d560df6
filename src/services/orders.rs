use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel},
        order_line::{
            self, ActiveModel as OrderLineActiveModel, Entity as OrderLineEntity,
            Model as OrderLineModel,
        },
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::history::{HistoryMetadata, LineChange, LineSummary},
    models::status::{OrderStatus, OrderType},
    services::history,
};

/// Request/Response types for the order service
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub order_type: OrderType,
    pub counterparty_id: Uuid,
    pub expected_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    /// Acting user recorded in the history entry; defaults to "system".
    pub actor: Option<String>,
    /// Zero lines is allowed: pending orders may be saved as drafts.
    #[validate]
    pub lines: Vec<OrderLineInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderLineInput {
    pub item_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be a positive integer"))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderLinesRequest {
    pub actor: Option<String>,
    #[validate]
    pub lines: Vec<OrderLineInput>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderLineResponse {
    pub id: Uuid,
    pub item_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub order_type: OrderType,
    pub counterparty_id: Uuid,
    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
    pub expected_date: Option<DateTime<Utc>>,
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub lines: Vec<OrderLineResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Order-number prefixes, taken from configuration.
#[derive(Debug, Clone)]
pub struct OrderNumberPrefixes {
    pub sales: String,
    pub purchase: String,
}

impl OrderNumberPrefixes {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            sales: cfg.sales_order_prefix.clone(),
            purchase: cfg.purchase_order_prefix.clone(),
        }
    }

    fn for_type(&self, order_type: OrderType) -> &str {
        match order_type {
            OrderType::Sales => &self.sales,
            OrderType::Purchase => &self.purchase,
        }
    }
}

pub(crate) fn parse_status(model: &OrderModel) -> Result<OrderStatus, ServiceError> {
    OrderStatus::from_str(&model.status).map_err(|_| {
        error!(order_id = %model.id, status = %model.status, "order has unrecognized status");
        ServiceError::InternalError(format!(
            "order {} has unrecognized status '{}'",
            model.id, model.status
        ))
    })
}

pub(crate) fn to_order_response(
    model: OrderModel,
    lines: Vec<OrderLineModel>,
) -> Result<OrderResponse, ServiceError> {
    let status = parse_status(&model)?;
    let order_type = OrderType::from_str(&model.order_type).map_err(|_| {
        ServiceError::InternalError(format!(
            "order {} has unrecognized type '{}'",
            model.id, model.order_type
        ))
    })?;

    Ok(OrderResponse {
        id: model.id,
        order_number: model.order_number,
        order_type,
        counterparty_id: model.counterparty_id,
        status,
        order_date: model.order_date,
        expected_date: model.expected_date,
        total_amount: model.total_amount,
        notes: model.notes,
        created_at: model.created_at,
        updated_at: model.updated_at,
        version: model.version,
        lines: lines
            .into_iter()
            .map(|line| OrderLineResponse {
                id: line.id,
                item_id: line.item_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                amount: line.amount,
            })
            .collect(),
    })
}

/// Checks line-level constraints validator derives cannot express:
/// non-negative prices and at most one line per item.
fn validate_lines(lines: &[OrderLineInput]) -> Result<(), ServiceError> {
    let mut seen = HashMap::new();
    for (index, line) in lines.iter().enumerate() {
        if line.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "lines[{}].quantity: must be a positive integer",
                index
            )));
        }
        if line.unit_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "lines[{}].unit_price: must not be negative",
                index
            )));
        }
        if seen.insert(line.item_id, index).is_some() {
            return Err(ServiceError::ValidationError(format!(
                "lines[{}].item_id: duplicate line for item {}",
                index, line.item_id
            )));
        }
    }
    Ok(())
}

fn line_total(lines: &[OrderLineInput]) -> Decimal {
    lines
        .iter()
        .map(|l| l.unit_price * Decimal::from(l.quantity))
        .sum()
}

pub(crate) fn summarize_line(line: &OrderLineModel) -> LineSummary {
    LineSummary {
        item_id: line.item_id,
        quantity: line.quantity,
        unit_price: line.unit_price,
        amount: line.amount,
    }
}

/// Computes the added/removed/changed diff between two line sets, keyed by
/// item id.
fn diff_lines(
    before: &[LineSummary],
    after: &[LineSummary],
) -> (Vec<LineSummary>, Vec<LineSummary>, Vec<LineChange>) {
    let before_by_item: HashMap<Uuid, &LineSummary> =
        before.iter().map(|l| (l.item_id, l)).collect();
    let after_by_item: HashMap<Uuid, &LineSummary> = after.iter().map(|l| (l.item_id, l)).collect();

    let added = after
        .iter()
        .filter(|l| !before_by_item.contains_key(&l.item_id))
        .cloned()
        .collect();
    let removed = before
        .iter()
        .filter(|l| !after_by_item.contains_key(&l.item_id))
        .cloned()
        .collect();
    let changed = before
        .iter()
        .filter_map(|old| {
            let new = after_by_item.get(&old.item_id)?;
            if old.quantity == new.quantity && old.unit_price == new.unit_price {
                return None;
            }
            Some(LineChange {
                item_id: old.item_id,
                quantity_before: old.quantity,
                quantity_after: new.quantity,
                unit_price_before: old.unit_price,
                unit_price_after: new.unit_price,
                amount_before: old.amount,
                amount_after: new.amount,
            })
        })
        .collect();

    (added, removed, changed)
}

/// Service for creating and reading orders and editing their lines.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    prefixes: OrderNumberPrefixes,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        prefixes: OrderNumberPrefixes,
    ) -> Self {
        Self {
            db,
            event_sender,
            prefixes,
        }
    }

    /// Creates a new order in `pending` status, assigns its number, and
    /// records the `ORDER_CREATED` history entry in the same transaction.
    #[instrument(skip(self, request), fields(order_type = %request.order_type, counterparty_id = %request.counterparty_id))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        validate_lines(&request.lines)?;

        let db = &*self.db;
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let actor = request.actor.as_deref().unwrap_or("system").to_string();

        let txn = db.begin().await?;

        let sequence = OrderEntity::find()
            .filter(order::Column::OrderType.eq(request.order_type.to_string()))
            .count(&txn)
            .await?
            + 1;
        let order_number = format!(
            "{}-{:05}",
            self.prefixes.for_type(request.order_type),
            sequence
        );

        let total_amount = line_total(&request.lines);

        let insert_result = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            order_type: Set(request.order_type.to_string()),
            counterparty_id: Set(request.counterparty_id),
            status: Set(OrderStatus::Pending.to_string()),
            order_date: Set(now),
            expected_date: Set(request.expected_date),
            total_amount: Set(total_amount),
            notes: Set(request.notes.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&txn)
        .await;
        // A concurrent create can win the same sequence; the unique index
        // on order_number turns the loser into a retryable conflict.
        let order_model = insert_result.map_err(|err| match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                warn!(order_number = %order_number, "order number taken by a concurrent create");
                ServiceError::ConcurrencyConflict {
                    order_id,
                    expected_status: OrderStatus::Pending.to_string(),
                }
            }
            _ => err.into(),
        })?;

        let mut lines = Vec::with_capacity(request.lines.len());
        for input in &request.lines {
            let line = OrderLineActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                item_id: Set(input.item_id),
                quantity: Set(input.quantity),
                unit_price: Set(input.unit_price),
                amount: Set(input.unit_price * Decimal::from(input.quantity)),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(&txn)
            .await?;
            lines.push(line);
        }

        let metadata = HistoryMetadata::OrderCreated {
            order_number: order_number.clone(),
            line_count: lines.len(),
            total_amount,
        };
        history::record(
            &txn,
            order_id,
            &actor,
            &format!("Order {} created", order_number),
            &metadata,
        )
        .await?;

        txn.commit().await?;

        info!(order_id = %order_id, order_number = %order_number, "order created");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderCreated(order_id)).await {
                warn!(error = %e, order_id = %order_id, "failed to send order created event");
            }
        }

        to_order_response(order_model, lines)
    }

    /// Retrieves an order with its lines.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
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

        to_order_response(order, lines)
    }

    /// Lists orders with pagination and optional status/type filters.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
        status: Option<OrderStatus>,
        order_type: Option<OrderType>,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db;
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status.to_string()));
        }
        if let Some(order_type) = order_type {
            query = query.filter(order::Column::OrderType.eq(order_type.to_string()));
        }

        let paginator = query.paginate(db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut lines_by_order: HashMap<Uuid, Vec<OrderLineModel>> = HashMap::new();
        for line in OrderLineEntity::find()
            .filter(order_line::Column::OrderId.is_in(order_ids))
            .order_by_asc(order_line::Column::CreatedAt)
            .all(db)
            .await?
        {
            lines_by_order.entry(line.order_id).or_default().push(line);
        }

        let responses = orders
            .into_iter()
            .map(|order| {
                let lines = lines_by_order.remove(&order.id).unwrap_or_default();
                to_order_response(order, lines)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderListResponse {
            orders: responses,
            total,
            page,
            per_page,
        })
    }

    /// Replaces the order's lines, recomputing every line amount and the
    /// order total, and records a single `ORDER_UPDATE` entry carrying the
    /// line-level diff. Legal only while the order is `pending` or
    /// `confirmed`.
    #[instrument(skip(self, request), fields(order_id = %order_id, line_count = request.lines.len()))]
    pub async fn update_lines(
        &self,
        order_id: Uuid,
        request: UpdateOrderLinesRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        validate_lines(&request.lines)?;

        let db = &*self.db;
        let now = Utc::now();
        let actor = request.actor.as_deref().unwrap_or("system").to_string();

        let txn = db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let status = parse_status(&order)?;
        if !status.lines_editable() {
            return Err(ServiceError::ValidationError(format!(
                "order lines can only be edited while pending or confirmed (current status: {})",
                status
            )));
        }

        let existing = OrderLineEntity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .order_by_asc(order_line::Column::CreatedAt)
            .all(&txn)
            .await?;

        let before: Vec<LineSummary> = existing.iter().map(summarize_line).collect();
        let total_before = order.total_amount;
        let total_after = line_total(&request.lines);

        OrderLineEntity::delete_many()
            .filter(order_line::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;

        let mut new_lines = Vec::with_capacity(request.lines.len());
        for input in &request.lines {
            let line = OrderLineActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                item_id: Set(input.item_id),
                quantity: Set(input.quantity),
                unit_price: Set(input.unit_price),
                amount: Set(input.unit_price * Decimal::from(input.quantity)),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(&txn)
            .await?;
            new_lines.push(line);
        }

        // Conditional write: the version filter rejects the update if a
        // concurrent request committed in between our read and this write.
        let result = OrderEntity::update_many()
            .col_expr(order::Column::TotalAmount, Expr::value(total_after))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrencyConflict {
                order_id,
                expected_status: status.to_string(),
            });
        }

        let after: Vec<LineSummary> = new_lines.iter().map(summarize_line).collect();
        let (added, removed, changed) = diff_lines(&before, &after);

        let metadata = HistoryMetadata::OrderUpdate {
            order_number: order.order_number.clone(),
            total_before,
            total_after,
            added,
            removed,
            changed,
        };
        history::record(
            &txn,
            order_id,
            &actor,
            &format!("Order {} lines updated", order.order_number),
            &metadata,
        )
        .await?;

        let updated = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            total_before = %total_before,
            total_after = %total_after,
            "order lines updated"
        );

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::OrderLinesUpdated {
                    order_id,
                    total_amount: total_after,
                })
                .await
            {
                warn!(error = %e, order_id = %order_id, "failed to send lines updated event");
            }
        }

        to_order_response(updated, new_lines)
    }
}
