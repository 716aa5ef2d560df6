#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectOptions, ConnectionTrait, Database,
    EntityTrait, QueryFilter, QueryOrder, Schema,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use orderflow_api::{
    app_router,
    config::AppConfig,
    entities::{inventory_item, order, order_history, order_line},
    events::{self, EventSender},
    handlers::AppServices,
    models::status::OrderType,
    services::orders::{CreateOrderRequest, OrderLineInput, OrderResponse},
    AppState,
};

/// Test harness backed by an in-memory SQLite database with the schema
/// generated from the entity definitions.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Harness with the CREATE_SHIPMENT hard-block enabled.
    pub async fn with_full_stock_required() -> Self {
        let mut cfg = test_config();
        cfg.shipment.require_full_stock = true;
        Self::with_config(cfg).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        // A single pooled connection keeps every query on the same
        // in-memory database.
        let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
        options.max_connections(1).min_connections(1);
        let db = Database::connect(options)
            .await
            .expect("failed to open in-memory sqlite");

        let backend = db.get_database_backend();
        let schema = Schema::new(backend);
        for stmt in [
            schema.create_table_from_entity(order::Entity),
            schema.create_table_from_entity(order_line::Entity),
            schema.create_table_from_entity(order_history::Entity),
            schema.create_table_from_entity(inventory_item::Entity),
        ] {
            db.execute(backend.build(&stmt))
                .await
                .expect("failed to create table");
        }

        let db = Arc::new(db);
        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(db.clone(), Arc::new(event_sender.clone()), &cfg);
        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };
        let router = app_router(state.clone());

        Self {
            state,
            router,
            _event_task: event_task,
        }
    }

    pub async fn seed_item(&self, sku: &str, quantity_on_hand: i32) -> inventory_item::Model {
        let now = Utc::now();
        inventory_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            name: Set(format!("Test item {sku}")),
            quantity_on_hand: Set(quantity_on_hand),
            minimum_stock: Set(0),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed inventory item")
    }

    /// Creates a sales order through the order service.
    pub async fn create_order(&self, lines: Vec<OrderLineInput>) -> OrderResponse {
        self.state
            .services
            .orders
            .create_order(CreateOrderRequest {
                order_type: OrderType::Sales,
                counterparty_id: Uuid::new_v4(),
                expected_date: None,
                notes: None,
                actor: Some("tester".to_string()),
                lines,
            })
            .await
            .expect("failed to create order")
    }

    /// Inserts a bare order row directly, bypassing number assignment.
    pub async fn seed_order_row(&self, order_type: &str, order_number: &str) -> order::Model {
        let now = Utc::now();
        order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number.to_string()),
            order_type: Set(order_type.to_string()),
            counterparty_id: Set(Uuid::new_v4()),
            status: Set("pending".to_string()),
            order_date: Set(now),
            expected_date: Set(None),
            total_amount: Set(Decimal::ZERO),
            notes: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed order row")
    }

    pub fn line(item_id: Uuid, quantity: i32, unit_price: Decimal) -> OrderLineInput {
        OrderLineInput {
            item_id,
            quantity,
            unit_price,
        }
    }

    /// Overwrites the stored status directly, bypassing the engine. Used
    /// to seed states the engine itself refuses to produce.
    pub async fn set_status(&self, order_id: Uuid, status: &str) {
        let existing = order::Entity::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .expect("failed to load order")
            .expect("order missing");
        let mut active: order::ActiveModel = existing.into();
        active.status = Set(status.to_string());
        active.update(&*self.state.db).await.expect("failed to set status");
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let request = match body {
            Some(json) => Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed")
    }

    pub async fn transition(&self, order_id: Uuid, action: &str) -> Response {
        self.request(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/transition"),
            Some(serde_json::json!({ "action": action })),
        )
        .await
    }

    pub async fn get_order_json(&self, order_id: Uuid) -> Value {
        let response = self
            .request(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
            .await;
        assert!(response.status().is_success(), "get order failed");
        response_json(response).await
    }

    /// Action codes recorded for an order, oldest first.
    pub async fn history_actions(&self, order_id: Uuid) -> Vec<String> {
        order_history::Entity::find()
            .filter(order_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_history::Column::CreatedAt)
            .all(&*self.state.db)
            .await
            .expect("failed to load history")
            .into_iter()
            .map(|entry| entry.action)
            .collect()
    }

    pub async fn history_entries(&self, order_id: Uuid) -> Vec<order_history::Model> {
        order_history::Entity::find()
            .filter(order_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_history::Column::CreatedAt)
            .all(&*self.state.db)
            .await
            .expect("failed to load history")
    }
}

fn test_config() -> AppConfig {
    AppConfig::new(
        "sqlite::memory:".into(),
        "127.0.0.1".into(),
        18080,
        "test".into(),
    )
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Parses a Decimal field that may arrive as a JSON string or number.
pub fn decimal_field(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("expected decimal, got {other:?}"),
    }
}
