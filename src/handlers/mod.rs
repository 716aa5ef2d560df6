pub mod health;
pub mod orders;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    history::HistoryService,
    orders::{OrderNumberPrefixes, OrderService},
    shipment_check::ShipmentCheckService,
    transitions::TransitionService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub transitions: Arc<TransitionService>,
    pub shipment_check: Arc<ShipmentCheckService>,
    pub history: Arc<HistoryService>,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let shipment_check = Arc::new(ShipmentCheckService::new(db.clone()));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            Some(event_sender.clone()),
            OrderNumberPrefixes::from_config(config),
        ));
        let transitions = Arc::new(TransitionService::new(
            db.clone(),
            Some(event_sender),
            shipment_check.clone(),
            config.shipment.require_full_stock,
        ));
        let history = Arc::new(HistoryService::new(db));

        Self {
            orders,
            transitions,
            shipment_check,
            history,
        }
    }
}
