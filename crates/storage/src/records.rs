//! Persisted records.

use chrono::{DateTime, Utc};
use common::{
    CustomerId, DeliveryMethod, Money, OrderId, OrderStatus, PaymentId, PaymentMethod,
    PaymentStatus, ProductId, StoreId,
};
use serde::{Deserialize, Serialize};

/// A catalog product as seen by the engine.
///
/// Catalog management owns every field except `stock_quantity`, which only
/// moves through [`crate::Store::decrement_stock`] and
/// [`crate::Store::increment_stock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub store_id: StoreId,
    pub name: String,
    pub price: Money,
    pub stock_quantity: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Creates an active product.
    pub fn new(store_id: StoreId, name: impl Into<String>, price: Money, stock: u32) -> Self {
        let now = Utc::now();
        Self {
            id: ProductId::new(),
            store_id,
            name: name.into(),
            price,
            stock_quantity: stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Contact details captured with the order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A line of an order. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Unit price captured when the order was placed.
    pub price: Money,
}

impl OrderItem {
    /// Returns `price * quantity`.
    pub fn line_total(&self) -> Money {
        self.price.times(self.quantity)
    }
}

/// An order with its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub store_id: StoreId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Money,
    pub customer_info: CustomerInfo,
    pub delivery_address: Option<String>,
    pub delivery_method: DeliveryMethod,
    pub notes: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Sum of the item line totals.
    pub fn items_total(&self) -> Money {
        self.items.iter().map(OrderItem::line_total).sum()
    }
}

/// Provider-specific payment state.
///
/// Only the adapter for the matching provider reads or writes its variant;
/// order and payment logic treat the value as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderData {
    Click {
        service_id: String,
        merchant_id: String,
        payment_url: String,
        #[serde(default)]
        click_trans_id: Option<String>,
        #[serde(default)]
        click_paydoc_id: Option<String>,
        #[serde(default)]
        sign_time: Option<String>,
    },
    Payme {
        merchant_id: String,
        checkout_url: String,
        /// Payme's own transaction id, bound by `CreateTransaction`.
        #[serde(default)]
        transaction_id: Option<String>,
        /// Milliseconds since the epoch, as Payme reports them.
        #[serde(default)]
        create_time: Option<i64>,
        #[serde(default)]
        perform_time: Option<i64>,
        #[serde(default)]
        cancel_time: Option<i64>,
        #[serde(default)]
        cancel_reason: Option<i32>,
    },
    Telegram {
        invoice_payload: String,
        deep_link: String,
        #[serde(default)]
        telegram_payment_charge_id: Option<String>,
        #[serde(default)]
        provider_payment_charge_id: Option<String>,
        #[serde(default)]
        currency: Option<String>,
    },
    Offline {
        method: PaymentMethod,
    },
}

/// A payment attempt or a refund.
///
/// Refunds are separate rows with a negative `amount` and
/// `parent_payment_id` set; history is never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    /// Globally unique idempotency key.
    pub transaction_id: String,
    pub provider_payment_id: Option<String>,
    pub provider_data: Option<ProviderData>,
    pub parent_payment_id: Option<PaymentId>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a pending payment for `amount`.
    pub fn pending(
        order_id: OrderId,
        amount: Money,
        method: PaymentMethod,
        transaction_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            order_id,
            amount,
            payment_method: method,
            status: PaymentStatus::Pending,
            transaction_id: transaction_id.into(),
            provider_payment_id: None,
            provider_data: None,
            parent_payment_id: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if this row records a refund.
    pub fn is_refund(&self) -> bool {
        self.parent_payment_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_items_total() {
        let order_id = OrderId::new();
        let items = vec![
            OrderItem {
                order_id,
                product_id: ProductId::new(),
                quantity: 2,
                price: Money::new(dec!(10.00)),
            },
            OrderItem {
                order_id,
                product_id: ProductId::new(),
                quantity: 1,
                price: Money::new(dec!(25.00)),
            },
        ];
        assert_eq!(items[0].line_total(), Money::new(dec!(20.00)));
        let total: Money = items.iter().map(OrderItem::line_total).sum();
        assert_eq!(total, Money::new(dec!(45.00)));
    }

    #[test]
    fn provider_data_is_tagged_by_provider() {
        let data = ProviderData::Offline {
            method: PaymentMethod::Cash,
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["provider"], "offline");
        assert_eq!(json["method"], "cash");

        let click: ProviderData = serde_json::from_value(serde_json::json!({
            "provider": "click",
            "service_id": "1",
            "merchant_id": "2",
            "payment_url": "https://my.click.uz/services/pay"
        }))
        .unwrap();
        assert!(matches!(click, ProviderData::Click { click_trans_id: None, .. }));
    }

    #[test]
    fn pending_payment_is_not_a_refund() {
        let payment = Payment::pending(
            OrderId::new(),
            Money::new(dec!(5)),
            PaymentMethod::Payme,
            "TXN_1",
        );
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(!payment.is_refund());
    }
}
