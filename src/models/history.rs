use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

use super::status::OrderStatus;

/// Action codes recorded in the activity history. These share the
/// identifier space with the transition actions; every new action gets a
/// code here and an entry in the transition table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    OrderCreated,
    OrderRegistered,
    ShipmentCreated,
    ShipmentProcessed,
    ShippingCompleted,
    PaymentRegistered,
    TaxInvoiceIssued,
    OrderCancelled,
    OrderUpdate,
}

/// Snapshot of one order line, used in `ORDER_UPDATE` diffs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LineSummary {
    pub item_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

/// Before/after view of a changed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LineChange {
    pub item_id: Uuid,
    pub quantity_before: i32,
    pub quantity_after: i32,
    pub unit_price_before: Decimal,
    pub unit_price_after: Decimal,
    pub amount_before: Decimal,
    pub amount_after: Decimal,
}

/// Before/after view of a notes update carried on a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NotesChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    pub after: String,
}

/// Structured history metadata, tagged by action code. Each action has its
/// own payload shape instead of an open-ended bag, so the expected fields
/// are checkable at the type level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryMetadata {
    OrderCreated {
        order_number: String,
        line_count: usize,
        total_amount: Decimal,
    },
    OrderRegistered {
        order_number: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<NotesChange>,
    },
    ShipmentCreated {
        order_number: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
        /// Advisory availability snapshot taken when the shipment
        /// instruction was created, if a check ran.
        #[serde(skip_serializing_if = "Option::is_none")]
        can_ship_all: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_shortage: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<NotesChange>,
    },
    ShipmentProcessed {
        order_number: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<NotesChange>,
    },
    ShippingCompleted {
        order_number: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
        /// The pass-through status of the compound transition.
        through: OrderStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<NotesChange>,
    },
    PaymentRegistered {
        order_number: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<NotesChange>,
    },
    TaxInvoiceIssued {
        order_number: String,
        /// Status at issue time; unchanged by this action.
        status: OrderStatus,
    },
    OrderCancelled {
        order_number: String,
        old_status: OrderStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<NotesChange>,
    },
    OrderUpdate {
        order_number: String,
        total_before: Decimal,
        total_after: Decimal,
        added: Vec<LineSummary>,
        removed: Vec<LineSummary>,
        changed: Vec<LineChange>,
    },
}

impl HistoryMetadata {
    /// The action code this payload belongs to; always matches the
    /// serialized `action` tag.
    pub fn action(&self) -> HistoryAction {
        match self {
            HistoryMetadata::OrderCreated { .. } => HistoryAction::OrderCreated,
            HistoryMetadata::OrderRegistered { .. } => HistoryAction::OrderRegistered,
            HistoryMetadata::ShipmentCreated { .. } => HistoryAction::ShipmentCreated,
            HistoryMetadata::ShipmentProcessed { .. } => HistoryAction::ShipmentProcessed,
            HistoryMetadata::ShippingCompleted { .. } => HistoryAction::ShippingCompleted,
            HistoryMetadata::PaymentRegistered { .. } => HistoryAction::PaymentRegistered,
            HistoryMetadata::TaxInvoiceIssued { .. } => HistoryAction::TaxInvoiceIssued,
            HistoryMetadata::OrderCancelled { .. } => HistoryAction::OrderCancelled,
            HistoryMetadata::OrderUpdate { .. } => HistoryAction::OrderUpdate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn metadata_tag_matches_action_code() {
        let samples = vec![
            HistoryMetadata::OrderCreated {
                order_number: "SO-00001".into(),
                line_count: 2,
                total_amount: dec!(2000),
            },
            HistoryMetadata::OrderRegistered {
                order_number: "SO-00001".into(),
                old_status: OrderStatus::Pending,
                new_status: OrderStatus::Confirmed,
                notes: None,
            },
            HistoryMetadata::ShippingCompleted {
                order_number: "SO-00001".into(),
                old_status: OrderStatus::Shipping,
                new_status: OrderStatus::PaymentPending,
                through: OrderStatus::Shipped,
                notes: None,
            },
            HistoryMetadata::OrderCancelled {
                order_number: "SO-00001".into(),
                old_status: OrderStatus::Confirmed,
                reason: Some("customer request".into()),
                notes: None,
            },
        ];

        for metadata in samples {
            let value = serde_json::to_value(&metadata).unwrap();
            assert_eq!(value["action"], metadata.action().to_string());
        }
    }

    #[test]
    fn metadata_round_trips_through_json() {
        let metadata = HistoryMetadata::OrderUpdate {
            order_number: "PO-00003".into(),
            total_before: dec!(100),
            total_after: dec!(250),
            added: vec![LineSummary {
                item_id: Uuid::new_v4(),
                quantity: 3,
                unit_price: dec!(50),
                amount: dec!(150),
            }],
            removed: vec![],
            changed: vec![],
        };
        let value = serde_json::to_value(&metadata).unwrap();
        let parsed: HistoryMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn advisory_fields_are_omitted_when_absent() {
        let metadata = HistoryMetadata::ShipmentCreated {
            order_number: "SO-00002".into(),
            old_status: OrderStatus::Confirmed,
            new_status: OrderStatus::ReadyToShip,
            can_ship_all: None,
            total_shortage: None,
            notes: None,
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert!(value.get("can_ship_all").is_none());
        assert!(value.get("total_shortage").is_none());
        assert!(value.get("notes").is_none());
    }

    #[test]
    fn notes_change_records_before_and_after() {
        let metadata = HistoryMetadata::OrderRegistered {
            order_number: "SO-00004".into(),
            old_status: OrderStatus::Pending,
            new_status: OrderStatus::Confirmed,
            notes: Some(NotesChange {
                before: None,
                after: "rush delivery".into(),
            }),
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["notes"]["after"], "rush delivery");
        assert!(value["notes"].get("before").is_none());
    }
}
