use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, Model as OrderModel},
        order_line::{self, Entity as OrderLineEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::history::{HistoryMetadata, NotesChange},
    models::status::{evaluate, required_status, OrderAction, OrderStatus, TransitionOutcome},
    services::history,
    services::orders::{parse_status, to_order_response, OrderResponse},
    services::shipment_check::{ShipmentCheckReport, ShipmentCheckService},
};

/// One transition request against an order.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransitionRequest {
    pub action: OrderAction,
    /// Acting user recorded in the history entry; defaults to "system".
    pub actor: Option<String>,
    /// Free-text description for the history entry; a per-action default
    /// is used when absent.
    pub description: Option<String>,
    /// Cancellation reason, recorded in `ORDER_CANCELLED` metadata.
    pub reason: Option<String>,
    /// Optional notes update, committed atomically with the status change.
    pub notes: Option<String>,
}

/// The status transition engine. Validates a requested action against the
/// order's current status, applies the resulting status with a conditional
/// write, and appends exactly one history entry in the same transaction.
#[derive(Clone)]
pub struct TransitionService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    shipment_check: Arc<ShipmentCheckService>,
    require_full_stock: bool,
}

impl TransitionService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        shipment_check: Arc<ShipmentCheckService>,
        require_full_stock: bool,
    ) -> Self {
        Self {
            db,
            event_sender,
            shipment_check,
            require_full_stock,
        }
    }

    #[instrument(skip(self, request), fields(order_id = %order_id, action = %request.action))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        request: TransitionRequest,
    ) -> Result<OrderResponse, ServiceError> {
        let action = request.action;
        let actor = request.actor.as_deref().unwrap_or("system").to_string();

        // The availability check runs outside the transaction: it reads
        // live stock and is advisory unless require_full_stock is set.
        // Stock may still move between check and commit; the advisory
        // model accepts that race.
        let availability = if action == OrderAction::CreateShipment {
            let report = self.shipment_check.check(order_id).await?;
            if self.require_full_stock && !report.can_ship_all {
                return Err(ServiceError::ValidationError(shortage_message(&report)));
            }
            Some(report)
        } else {
            None
        };

        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let current = parse_status(&order)?;

        let outcome = evaluate(current, action).ok_or_else(|| {
            warn!(
                order_id = %order_id,
                current_status = %current,
                action = %action,
                "rejected invalid transition"
            );
            ServiceError::InvalidTransition {
                action: action.to_string(),
                current: current.to_string(),
                required: required_status(action).to_string(),
            }
        })?;

        if action == OrderAction::RegisterOrder {
            let line_count = OrderLineEntity::find()
                .filter(order_line::Column::OrderId.eq(order_id))
                .count(&txn)
                .await?;
            if line_count == 0 {
                return Err(ServiceError::ValidationError(
                    "order has no lines; add at least one line before registering".to_string(),
                ));
            }
        }

        let new_status = match outcome {
            TransitionOutcome::Move { to, .. } => {
                apply_move(&txn, &order, current, to, request.notes.as_deref(), now).await?;
                Some(to)
            }
            TransitionOutcome::SideEffectOnly => None,
        };

        let metadata = build_metadata(action, &order, current, outcome, &request, &availability);
        let description = request
            .description
            .clone()
            .unwrap_or_else(|| default_description(action, &order.order_number));

        history::record(&txn, order_id, &actor, &description, &metadata).await?;

        let updated = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let lines = OrderLineEntity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .order_by_asc(order_line::Column::CreatedAt)
            .all(&txn)
            .await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            order_number = %order.order_number,
            old_status = %current,
            new_status = %new_status.unwrap_or(current),
            action = %action,
            "order transition applied"
        );

        self.publish_events(order_id, action, current, new_status)
            .await;

        to_order_response(updated, lines)
    }

    async fn publish_events(
        &self,
        order_id: Uuid,
        action: OrderAction,
        old_status: OrderStatus,
        new_status: Option<OrderStatus>,
    ) {
        let Some(event_sender) = &self.event_sender else {
            return;
        };

        let mut events = Vec::new();
        if let Some(new_status) = new_status {
            events.push(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            });
        }
        match action {
            OrderAction::Cancel => events.push(Event::OrderCancelled(order_id)),
            OrderAction::RegisterPayment => events.push(Event::PaymentRegistered(order_id)),
            OrderAction::IssueTaxInvoice => events.push(Event::TaxInvoiceIssued(order_id)),
            _ => {}
        }

        for event in events {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, order_id = %order_id, "failed to send transition event");
            }
        }
    }
}

/// Applies a status move with a conditional write on (status, version),
/// using the snapshot the caller loaded. If a concurrent request committed
/// a change to this order in between, the filters match zero rows, nothing
/// is applied, and the caller gets a `ConcurrencyConflict`.
pub(crate) async fn apply_move<C: ConnectionTrait>(
    conn: &C,
    order: &OrderModel,
    current: OrderStatus,
    to: OrderStatus,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let mut update = OrderEntity::update_many()
        .col_expr(order::Column::Status, Expr::value(to.to_string()))
        .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
        .col_expr(
            order::Column::Version,
            Expr::col(order::Column::Version).add(1),
        );
    if let Some(notes) = notes {
        update = update.col_expr(order::Column::Notes, Expr::value(Some(notes.to_string())));
    }

    let result = update
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Status.eq(current.to_string()))
        .filter(order::Column::Version.eq(order.version))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrencyConflict {
            order_id: order.id,
            expected_status: current.to_string(),
        });
    }
    Ok(())
}

fn shortage_message(report: &ShipmentCheckReport) -> String {
    let shortages: Vec<String> = report
        .lines
        .iter()
        .filter(|l| !l.available)
        .map(|l| format!("{} (short {})", l.sku, l.shortage))
        .collect();
    format!(
        "insufficient stock to ship order {}: {}",
        report.order_number,
        shortages.join(", ")
    )
}

fn default_description(action: OrderAction, order_number: &str) -> String {
    match action {
        OrderAction::RegisterOrder => format!("Order {} registered", order_number),
        OrderAction::CreateShipment => {
            format!("Shipment instruction created for order {}", order_number)
        }
        OrderAction::ProcessShipment => {
            format!("Shipment processing started for order {}", order_number)
        }
        OrderAction::CompleteShipping => format!(
            "Shipping completed for order {}; awaiting payment",
            order_number
        ),
        OrderAction::RegisterPayment => format!("Payment registered for order {}", order_number),
        OrderAction::IssueTaxInvoice => format!("Tax invoice issued for order {}", order_number),
        OrderAction::Cancel => format!("Order {} cancelled", order_number),
    }
}

fn build_metadata(
    action: OrderAction,
    order: &OrderModel,
    current: OrderStatus,
    outcome: TransitionOutcome,
    request: &TransitionRequest,
    availability: &Option<ShipmentCheckReport>,
) -> HistoryMetadata {
    let order_number = order.order_number.clone();
    let new_status = match outcome {
        TransitionOutcome::Move { to, .. } => to,
        TransitionOutcome::SideEffectOnly => current,
    };
    // A notes update is only applied (and therefore only recorded) when
    // the action actually moves the status.
    let notes = match outcome {
        TransitionOutcome::Move { .. } => request.notes.as_ref().map(|after| NotesChange {
            before: order.notes.clone(),
            after: after.clone(),
        }),
        TransitionOutcome::SideEffectOnly => None,
    };

    match action {
        OrderAction::RegisterOrder => HistoryMetadata::OrderRegistered {
            order_number,
            old_status: current,
            new_status,
            notes,
        },
        OrderAction::CreateShipment => HistoryMetadata::ShipmentCreated {
            order_number,
            old_status: current,
            new_status,
            can_ship_all: availability.as_ref().map(|r| r.can_ship_all),
            total_shortage: availability.as_ref().map(|r| r.total_shortage),
            notes,
        },
        OrderAction::ProcessShipment => HistoryMetadata::ShipmentProcessed {
            order_number,
            old_status: current,
            new_status,
            notes,
        },
        OrderAction::CompleteShipping => HistoryMetadata::ShippingCompleted {
            order_number,
            old_status: current,
            new_status,
            through: match outcome {
                TransitionOutcome::Move {
                    through: Some(through),
                    ..
                } => through,
                _ => OrderStatus::Shipped,
            },
            notes,
        },
        OrderAction::RegisterPayment => HistoryMetadata::PaymentRegistered {
            order_number,
            old_status: current,
            new_status,
            notes,
        },
        OrderAction::IssueTaxInvoice => HistoryMetadata::TaxInvoiceIssued {
            order_number,
            status: current,
        },
        OrderAction::Cancel => HistoryMetadata::OrderCancelled {
            order_number,
            old_status: current,
            reason: request.reason.clone(),
            notes,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::shipment_check::LineAvailability;
    use assert_matches::assert_matches;
    use rust_decimal::Decimal;
    use sea_orm::{
        ActiveModelTrait, ActiveValue::Set, ConnectOptions, Database, DatabaseConnection, Schema,
    };

    async fn orders_db() -> DatabaseConnection {
        let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
        options.max_connections(1).min_connections(1);
        let db = Database::connect(options).await.unwrap();
        let backend = db.get_database_backend();
        let schema = Schema::new(backend);
        db.execute(backend.build(&schema.create_table_from_entity(OrderEntity)))
            .await
            .unwrap();
        db
    }

    async fn seed_order(db: &DatabaseConnection, status: OrderStatus, version: i32) -> OrderModel {
        let now = Utc::now();
        order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set("SO-00001".to_string()),
            order_type: Set("sales".to_string()),
            counterparty_id: Set(Uuid::new_v4()),
            status: Set(status.to_string()),
            order_date: Set(now),
            expected_date: Set(None),
            total_amount: Set(Decimal::ZERO),
            notes: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(version),
        }
        .insert(db)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn apply_move_bumps_status_and_version() {
        let db = orders_db().await;
        let order = seed_order(&db, OrderStatus::Pending, 1).await;

        apply_move(
            &db,
            &order,
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            None,
            Utc::now(),
        )
        .await
        .unwrap();

        let stored = OrderEntity::find_by_id(order.id).one(&db).await.unwrap().unwrap();
        assert_eq!(stored.status, "confirmed");
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn stale_snapshot_write_is_a_conflict() {
        let db = orders_db().await;
        // Stored row is what a competing request left behind after its
        // commit: already confirmed, version bumped.
        let stored = seed_order(&db, OrderStatus::Confirmed, 2).await;

        // The losing request still holds the snapshot it loaded before
        // the competitor committed.
        let mut stale = stored.clone();
        stale.status = OrderStatus::Pending.to_string();
        stale.version = 1;

        let err = apply_move(
            &db,
            &stale,
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            None,
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert_matches!(
            err,
            ServiceError::ConcurrencyConflict { expected_status, .. } if expected_status == "pending"
        );

        // Nothing was applied.
        let after = OrderEntity::find_by_id(stored.id).one(&db).await.unwrap().unwrap();
        assert_eq!(after.status, "confirmed");
        assert_eq!(after.version, 2);
    }

    #[test]
    fn shortage_message_names_short_items_only() {
        let report = ShipmentCheckReport {
            order_id: Uuid::new_v4(),
            order_number: "SO-00007".into(),
            checked_at: Utc::now(),
            can_ship_all: false,
            total_shortage: 4,
            available_lines: 1,
            short_lines: 1,
            lines: vec![
                LineAvailability {
                    item_id: Uuid::new_v4(),
                    sku: "WIDGET".into(),
                    ordered_qty: 2,
                    current_stock: 10,
                    available: true,
                    shortage: 0,
                },
                LineAvailability {
                    item_id: Uuid::new_v4(),
                    sku: "GADGET".into(),
                    ordered_qty: 5,
                    current_stock: 1,
                    available: false,
                    shortage: 4,
                },
            ],
        };
        let message = shortage_message(&report);
        assert!(message.contains("SO-00007"));
        assert!(message.contains("GADGET (short 4)"));
        assert!(!message.contains("WIDGET"));
    }

    #[test]
    fn default_descriptions_mention_the_order_number() {
        use strum::IntoEnumIterator;
        for action in OrderAction::iter() {
            assert!(default_description(action, "SO-00001").contains("SO-00001"));
        }
    }
}
