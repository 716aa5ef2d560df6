//! Orderflow API Library
//!
//! Backend service for ERP order lifecycle management: validated status
//! transitions, shipment availability checks, order line editing, and an
//! append-only activity history.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod models;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::{OpenApi, ToSchema};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

/// Common response wrapper
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
        }
    }
}

/// OpenAPI schema catalogue for the order endpoints.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "orderflow-api",
        description = "ERP order lifecycle API: status transitions, shipment checks, line editing, activity history"
    ),
    components(schemas(
        models::status::OrderStatus,
        models::status::OrderType,
        models::status::OrderAction,
        models::history::HistoryAction,
        models::history::HistoryMetadata,
        models::history::LineSummary,
        models::history::LineChange,
        models::history::NotesChange,
        services::orders::CreateOrderRequest,
        services::orders::OrderLineInput,
        services::orders::UpdateOrderLinesRequest,
        services::orders::OrderLineResponse,
        services::orders::OrderResponse,
        services::orders::OrderListResponse,
        services::transitions::TransitionRequest,
        services::shipment_check::LineAvailability,
        services::shipment_check::ShipmentCheckReport,
        errors::ErrorResponse,
    ))
)]
pub struct ApiDoc;

async fn openapi_doc() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Assembles the full application router with its middleware stack.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/orders", handlers::orders::router())
        .merge(handlers::health::router())
        .route("/api-docs/openapi.json", get(openapi_doc))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
