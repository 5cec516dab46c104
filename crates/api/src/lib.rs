//! HTTP surface for the storefront engine.
//!
//! Exposes order placement and seller actions, payment initiation and
//! refunds, and one webhook endpoint per payment provider, with structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod notifier;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, patch, post};
use domain::{Dispatcher, OrderService};
use metrics_exporter_prometheus::PrometheusHandle;
use payments::{AdapterRegistry, PaymentService, WebhookReconciler};
use storage::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::notifier::TelegramNotifier;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub orders: OrderService<S>,
    pub payments: PaymentService<S>,
    pub reconciler: WebhookReconciler<S>,
}

impl<S: Store + Clone> AppState<S> {
    /// Wires every service over one store.
    pub fn new(
        store: S,
        registry: AdapterRegistry,
        dispatcher: Dispatcher,
        outbound_timeout: Duration,
    ) -> Self {
        Self {
            orders: OrderService::new(store.clone(), dispatcher.clone()),
            payments: PaymentService::new(store.clone(), registry.clone(), outbound_timeout),
            reconciler: WebhookReconciler::new(store, registry, dispatcher),
        }
    }

    /// State built from configuration.
    pub fn from_config(store: S, config: &Config) -> Self {
        Self::new(
            store,
            config.adapters(),
            dispatcher(config),
            config.outbound_timeout,
        )
    }
}

/// Sends notifications to Telegram when a bot token and chat are
/// configured, otherwise to the log.
pub fn dispatcher(config: &Config) -> Dispatcher {
    match (&config.telegram_bot_token, &config.telegram_notify_chat_id) {
        (Some(token), Some(chat_id)) => Dispatcher::new(
            Arc::new(TelegramNotifier::new(token, chat_id)),
            config.outbound_timeout,
        ),
        _ => Dispatcher::new(Arc::new(domain::LogNotifier), config.outbound_timeout),
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{orders, payments};

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/stores/{store_id}/orders",
            post(orders::create::<S>).get(orders::list::<S>),
        )
        .route("/stores/{store_id}/orders/stats", get(orders::stats::<S>))
        .route("/stores/{store_id}/orders/{order_id}", get(orders::get::<S>))
        .route(
            "/stores/{store_id}/orders/{order_id}/status",
            patch(orders::update_status::<S>),
        )
        .route(
            "/stores/{store_id}/orders/{order_id}/cancel",
            patch(orders::cancel::<S>),
        )
        .route(
            "/payments/orders/{order_id}/payments",
            post(payments::create::<S>),
        )
        .route("/payments/webhooks/{provider}", post(payments::webhook::<S>))
        .route("/payments/{payment_id}", get(payments::get::<S>))
        .route("/payments/{payment_id}/refund", post(payments::refund::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
