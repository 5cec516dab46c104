//! Store-scoped order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use common::{CustomerId, DeliveryMethod, OrderId, OrderStatus, PaymentStatus, StoreId};
use domain::{
    CancelOrder, CartItem, CreateOrder, DeliveryInfo, OrderPage, OrderStats, StatsPeriod,
    UpdateOrderStatus,
};
use serde::Deserialize;
use storage::{CustomerInfo, Order, OrderQuery, SortOrder, Store};

use crate::AppState;
use crate::error::ApiError;

pub const CUSTOMER_HEADER: &str = "x-customer-id";
pub const ACTOR_HEADER: &str = "x-actor-id";

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub customer_info: CustomerInfo,
    pub delivery_address: Option<String>,
    pub delivery_method: Option<DeliveryMethod>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct ListOrdersParams {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub sort_order: Option<SortOrder>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct StatsParams {
    pub period: Option<StatsPeriod>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

// -- Handlers --

/// POST /stores/{store_id}/orders
#[tracing::instrument(skip_all)]
pub async fn create<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<StoreId>, PathRejection>,
    headers: HeaderMap,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Path(store_id) = path?;
    let customer_id = customer_id(&headers)?;
    let Json(req) = body?;

    let cmd = CreateOrder::new(store_id, customer_id, req.items)
        .with_customer_info(req.customer_info)
        .with_delivery(DeliveryInfo {
            address: req.delivery_address,
            method: req.delivery_method.unwrap_or_default(),
            notes: req.notes,
        });
    let order = state.orders.create_order(cmd).await?;

    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /stores/{store_id}/orders
#[tracing::instrument(skip_all)]
pub async fn list<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<StoreId>, PathRejection>,
    params: Result<Query<ListOrdersParams>, QueryRejection>,
) -> Result<Json<OrderPage>, ApiError> {
    let Path(store_id) = path?;
    let Query(params) = params?;

    let defaults = OrderQuery::default();
    let query = OrderQuery {
        status: params.status,
        payment_status: params.payment_status,
        date_from: params.date_from,
        date_to: params.date_to,
        sort_order: params.sort_order.unwrap_or_default(),
        page: params.page.unwrap_or(defaults.page),
        limit: params.limit.unwrap_or(defaults.limit),
    };
    Ok(Json(state.orders.list_orders(store_id, query).await?))
}

/// GET /stores/{store_id}/orders/stats
#[tracing::instrument(skip_all)]
pub async fn stats<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<StoreId>, PathRejection>,
    params: Result<Query<StatsParams>, QueryRejection>,
) -> Result<Json<OrderStats>, ApiError> {
    let Path(store_id) = path?;
    let Query(params) = params?;
    let period = params.period.unwrap_or_default();
    Ok(Json(state.orders.order_stats(store_id, period).await?))
}

/// GET /stores/{store_id}/orders/{order_id}
#[tracing::instrument(skip_all)]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<(StoreId, OrderId)>, PathRejection>,
) -> Result<Json<Order>, ApiError> {
    let Path((store_id, order_id)) = path?;
    Ok(Json(state.orders.get_order(store_id, order_id).await?))
}

/// PATCH /stores/{store_id}/orders/{order_id}/status
#[tracing::instrument(skip_all)]
pub async fn update_status<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<(StoreId, OrderId)>, PathRejection>,
    body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<Order>, ApiError> {
    let Path((store_id, order_id)) = path?;
    let Json(req) = body?;

    let mut cmd = UpdateOrderStatus::new(store_id, order_id, req.status);
    cmd.notes = req.notes;
    Ok(Json(state.orders.update_order_status(cmd).await?))
}

/// PATCH /stores/{store_id}/orders/{order_id}/cancel
#[tracing::instrument(skip_all)]
pub async fn cancel<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<(StoreId, OrderId)>, PathRejection>,
    headers: HeaderMap,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Json<Order>, ApiError> {
    let Path((store_id, order_id)) = path?;
    let Json(req) = body?;

    let mut cmd = CancelOrder::new(store_id, order_id);
    if let Some(reason) = req.reason {
        cmd = cmd.with_reason(reason);
    }
    if let Some(actor) = headers.get(ACTOR_HEADER).and_then(|v| v.to_str().ok()) {
        cmd = cmd.with_actor(actor);
    }
    Ok(Json(state.orders.cancel_order(cmd).await?))
}

fn customer_id(headers: &HeaderMap) -> Result<CustomerId, ApiError> {
    let value = headers
        .get(CUSTOMER_HEADER)
        .ok_or_else(|| ApiError::Unauthorized(format!("Missing {CUSTOMER_HEADER} header")))?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid {CUSTOMER_HEADER} header")))
}
