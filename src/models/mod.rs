pub mod history;
pub mod status;

pub use history::{HistoryAction, HistoryMetadata, LineChange, LineSummary};
pub use status::{evaluate, required_status, OrderAction, OrderStatus, OrderType, TransitionOutcome};
