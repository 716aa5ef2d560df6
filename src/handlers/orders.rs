use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    models::status::{OrderStatus, OrderType},
    services::orders::{CreateOrderRequest, UpdateOrderLinesRequest},
    services::transitions::TransitionRequest,
    ApiResponse, AppState,
};

fn default_page() -> u64 {
    1
}
fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrdersQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
    pub status: Option<OrderStatus>,
    pub order_type: Option<OrderType>,
}

async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.create_order(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrdersQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders(query.page, query.per_page, query.status, query.order_type)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

async fn transition_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.transitions.transition(id, payload).await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn shipment_check(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let report = state.services.shipment_check.check(id).await?;
    Ok(Json(ApiResponse::success(report)))
}

async fn update_lines(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderLinesRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.update_lines(id, payload).await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let entries = state.services.history.list_for_order(id).await?;
    Ok(Json(ApiResponse::success(entries)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/transition", post(transition_order))
        .route("/:id/shipment-check", get(shipment_check))
        .route("/:id/lines", put(update_lines))
        .route("/:id/history", get(get_history))
}
