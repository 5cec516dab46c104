//! Payment endpoints and provider webhooks.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::{Money, OrderId, PaymentId, PaymentMethod};
use payments::{CallbackRequest, CreatedPayment, PaymentError, RefundPayment};
use serde::Deserialize;
use serde_json::Value;
use storage::{Payment, Store};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreatePaymentRequest {
    pub payment_method: String,
}

#[derive(Deserialize)]
pub struct RefundRequest {
    pub amount: Option<Money>,
    pub reason: Option<String>,
}

/// POST /payments/orders/{order_id}/payments
#[tracing::instrument(skip_all)]
pub async fn create<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<OrderId>, PathRejection>,
    body: Result<Json<CreatePaymentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedPayment>), ApiError> {
    let Path(order_id) = path?;
    let Json(req) = body?;
    let method: PaymentMethod = req
        .payment_method
        .parse()
        .map_err(|_| PaymentError::UnsupportedMethod(req.payment_method.clone()))?;

    let created = state.payments.create_payment(order_id, method).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /payments/{payment_id}
#[tracing::instrument(skip_all)]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<PaymentId>, PathRejection>,
) -> Result<Json<Payment>, ApiError> {
    let Path(payment_id) = path?;
    Ok(Json(state.payments.get_payment(payment_id).await?))
}

/// POST /payments/{payment_id}/refund
#[tracing::instrument(skip_all)]
pub async fn refund<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<PaymentId>, PathRejection>,
    body: Result<Json<RefundRequest>, JsonRejection>,
) -> Result<Json<Payment>, ApiError> {
    let Path(payment_id) = path?;
    let Json(req) = body?;

    let mut cmd = RefundPayment::new(payment_id);
    if let Some(amount) = req.amount {
        cmd = cmd.with_amount(amount);
    }
    if let Some(reason) = req.reason {
        cmd = cmd.with_reason(reason);
    }
    Ok(Json(state.payments.refund_payment(cmd).await?))
}

/// POST /payments/webhooks/{provider}
///
/// The raw body reaches the adapter unparsed.
#[tracing::instrument(skip_all)]
pub async fn webhook<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let method: PaymentMethod = provider
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Unknown provider: {provider}")))?;

    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let reply = state
        .reconciler
        .handle(method, CallbackRequest::new(headers, body.to_vec()))
        .await?;

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok((status, Json(reply.body)))
}
