//! Outbound notifications for order and payment events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::OrderStatus;
use storage::{Order, Payment};
use thiserror::Error;
use tokio::sync::Mutex;

/// An event worth telling the seller about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    OrderCreated {
        order: Order,
    },
    OrderStatusChanged {
        order: Order,
        previous: OrderStatus,
    },
    PaymentReceived {
        order: Order,
        payment: Payment,
    },
}

impl Notification {
    /// Short name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Notification::OrderCreated { .. } => "order_created",
            Notification::OrderStatusChanged { .. } => "order_status_changed",
            Notification::PaymentReceived { .. } => "payment_received",
        }
    }

    pub fn order(&self) -> &Order {
        match self {
            Notification::OrderCreated { order }
            | Notification::OrderStatusChanged { order, .. }
            | Notification::PaymentReceived { order, .. } => order,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification transport failed: {0}")]
    Transport(String),
}

/// Delivers notifications to some external channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let order = notification.order();
        tracing::info!(
            event = notification.name(),
            order_id = %order.id,
            store_id = %order.store_id,
            status = %order.status,
            payment_status = %order.payment_status,
            "notification"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail: bool,
}

/// Records notifications for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<Mutex<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent delivery fail.
    pub async fn set_fail(&self, fail: bool) {
        self.state.lock().await.fail = fail;
    }

    /// Returns everything delivered so far.
    pub async fn sent(&self) -> Vec<Notification> {
        self.state.lock().await.sent.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut state = self.state.lock().await;
        if state.fail {
            return Err(NotifyError::Transport("injected failure".into()));
        }
        state.sent.push(notification.clone());
        Ok(())
    }
}

/// Best-effort delivery with a deadline.
///
/// Failures and timeouts are logged and counted, never returned.
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl Dispatcher {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    /// Dispatcher backed by [`LogNotifier`].
    pub fn logging() -> Self {
        Self::new(Arc::new(LogNotifier), Self::DEFAULT_TIMEOUT)
    }

    pub async fn dispatch(&self, notification: Notification) {
        let event = notification.name();
        match tokio::time::timeout(self.timeout, self.notifier.notify(&notification)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                metrics::counter!("notifications_failed_total", "event" => event).increment(1);
                tracing::warn!(event, error = %err, "notification failed");
            }
            Err(_) => {
                metrics::counter!("notifications_failed_total", "event" => event).increment(1);
                tracing::warn!(event, timeout_ms = self.timeout.as_millis() as u64, "notification timed out");
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::logging()
    }
}
