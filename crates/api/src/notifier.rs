//! Telegram Bot API notifier for sellers.

use async_trait::async_trait;
use domain::{Notification, Notifier, NotifyError};
use serde_json::json;

const API_BASE: &str = "https://api.telegram.org";

/// Posts order events to a chat through `sendMessage`.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: API_BASE.to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Points the notifier at another Bot API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Message text for a notification.
pub fn render(notification: &Notification) -> String {
    match notification {
        Notification::OrderCreated { order } => format!(
            "New order {}\nTotal: {}\nItems: {}\nCustomer: {} {}",
            order.id,
            order.total_amount,
            order.items.len(),
            order.customer_info.name,
            order.customer_info.phone,
        ),
        Notification::OrderStatusChanged { order, previous } => format!(
            "Order {} status: {} -> {}",
            order.id, previous, order.status
        ),
        Notification::PaymentReceived { order, payment } => format!(
            "Payment received for order {}\nAmount: {}\nMethod: {}",
            order.id, payment.amount, payment.payment_method
        ),
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let body = json!({ "chat_id": self.chat_id, "text": render(notification) });

        self.client
            .post(url)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{
        CustomerId, DeliveryMethod, Money, OrderId, OrderStatus, PaymentStatus, StoreId,
    };
    use storage::{CustomerInfo, Order};

    #[test]
    fn status_change_text() {
        let order = Order {
            id: OrderId::new(),
            store_id: StoreId::new(),
            customer_id: CustomerId::new(),
            status: OrderStatus::Shipped,
            payment_status: PaymentStatus::Paid,
            total_amount: Money::zero(),
            customer_info: CustomerInfo::default(),
            delivery_address: None,
            delivery_method: DeliveryMethod::Delivery,
            notes: None,
            items: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let text = render(&Notification::OrderStatusChanged {
            order: order.clone(),
            previous: OrderStatus::Confirmed,
        });
        assert_eq!(text, format!("Order {} status: confirmed -> shipped", order.id));
    }
}
