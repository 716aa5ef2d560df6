use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use utoipa::ToSchema;

/// Order status lifecycle.
///
/// `Pending` is the sole initial status; `Completed` and `Cancelled` are
/// terminal. `Shipped` is a pass-through status: completing shipping
/// advances an order straight to `PaymentPending` so it never sits in a
/// status with no available action.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    ReadyToShip,
    Shipping,
    Shipped,
    PaymentPending,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Lines may only be added, removed or changed before shipment work
    /// has started.
    pub fn lines_editable(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }
}

/// Sales or purchase side of an order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderType {
    Sales,
    Purchase,
}

/// Named actions a caller can request against an order.
///
/// Action identifiers share the history action-code identifier space; the
/// wire form is SCREAMING_SNAKE_CASE (`REGISTER_ORDER`, ...).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderAction {
    RegisterOrder,
    CreateShipment,
    ProcessShipment,
    CompleteShipping,
    RegisterPayment,
    IssueTaxInvoice,
    Cancel,
}

/// Result of evaluating an action against a current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The order moves to `to`. `through` records a pass-through status
    /// for compound transitions (completing shipping passes `shipped`).
    Move {
        to: OrderStatus,
        through: Option<OrderStatus>,
    },
    /// The action is legal but leaves the status untouched.
    SideEffectOnly,
}

/// The transition table. Returns `None` for every (status, action) pair
/// that is not legal; callers turn that into an `InvalidTransition` error
/// carrying `required_status` for the attempted action.
pub fn evaluate(current: OrderStatus, action: OrderAction) -> Option<TransitionOutcome> {
    use OrderAction::*;
    use OrderStatus::*;

    match (current, action) {
        (Pending, RegisterOrder) => Some(TransitionOutcome::Move {
            to: Confirmed,
            through: None,
        }),
        (Confirmed, CreateShipment) => Some(TransitionOutcome::Move {
            to: ReadyToShip,
            through: None,
        }),
        (ReadyToShip, ProcessShipment) => Some(TransitionOutcome::Move {
            to: Shipping,
            through: None,
        }),
        // Compound step: completing shipping advances through `shipped`
        // into `payment_pending` in a single action.
        (Shipping, CompleteShipping) => Some(TransitionOutcome::Move {
            to: PaymentPending,
            through: Some(Shipped),
        }),
        (PaymentPending, RegisterPayment) => Some(TransitionOutcome::Move {
            to: Completed,
            through: None,
        }),
        (Pending | Cancelled, IssueTaxInvoice) => None,
        (_, IssueTaxInvoice) => Some(TransitionOutcome::SideEffectOnly),
        // Cancellation is only allowed before goods start moving.
        (Pending | Confirmed | ReadyToShip, Cancel) => Some(TransitionOutcome::Move {
            to: Cancelled,
            through: None,
        }),
        _ => None,
    }
}

/// Human-readable description of the status an action requires, used in
/// `InvalidTransition` errors so the caller can render expected vs actual.
pub fn required_status(action: OrderAction) -> &'static str {
    match action {
        OrderAction::RegisterOrder => "pending",
        OrderAction::CreateShipment => "confirmed",
        OrderAction::ProcessShipment => "ready_to_ship",
        OrderAction::CompleteShipping => "shipping",
        OrderAction::RegisterPayment => "payment_pending",
        OrderAction::IssueTaxInvoice => "any status except pending or cancelled",
        OrderAction::Cancel => "pending, confirmed or ready_to_ship",
    }
}
