//! Order commands and query results.

use chrono::Duration;
use common::{CustomerId, DeliveryMethod, Money, OrderId, OrderStatus, ProductId, StoreId};
use serde::{Deserialize, Serialize};
use storage::{CustomerInfo, Order};

/// One cart line as submitted by the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl CartItem {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Where and how the order is handed over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub address: Option<String>,
    pub method: DeliveryMethod,
    pub notes: Option<String>,
}

/// Command to place an order from a cart.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub store_id: StoreId,
    pub customer_id: CustomerId,
    pub items: Vec<CartItem>,
    pub customer_info: CustomerInfo,
    pub delivery: DeliveryInfo,
}

impl CreateOrder {
    /// Creates a command with default contact and delivery details.
    pub fn new(store_id: StoreId, customer_id: CustomerId, items: Vec<CartItem>) -> Self {
        Self {
            store_id,
            customer_id,
            items,
            customer_info: CustomerInfo::default(),
            delivery: DeliveryInfo::default(),
        }
    }

    pub fn with_customer_info(mut self, customer_info: CustomerInfo) -> Self {
        self.customer_info = customer_info;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryInfo) -> Self {
        self.delivery = delivery;
        self
    }
}

/// Command to move an order along its status graph.
#[derive(Debug, Clone)]
pub struct UpdateOrderStatus {
    pub store_id: StoreId,
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub notes: Option<String>,
}

impl UpdateOrderStatus {
    pub fn new(store_id: StoreId, order_id: OrderId, status: OrderStatus) -> Self {
        Self {
            store_id,
            order_id,
            status,
            notes: None,
        }
    }
}

/// Command to cancel an order and return its stock.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub store_id: StoreId,
    pub order_id: OrderId,
    /// Who asked, for the audit log.
    pub actor: Option<String>,
    pub reason: Option<String>,
}

impl CancelOrder {
    pub fn new(store_id: StoreId, order_id: OrderId) -> Self {
        Self {
            store_id,
            order_id,
            actor: None,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Paging metadata for order listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

/// One page of orders.
#[derive(Debug, Clone, Serialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub pagination: Pagination,
}

/// Look-back window for order statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatsPeriod {
    #[serde(rename = "7d")]
    Week,
    #[default]
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
}

impl StatsPeriod {
    pub fn duration(&self) -> Duration {
        match self {
            StatsPeriod::Week => Duration::days(7),
            StatsPeriod::Month => Duration::days(30),
            StatsPeriod::Quarter => Duration::days(90),
        }
    }
}

impl std::str::FromStr for StatsPeriod {
    type Err = std::convert::Infallible;

    /// Unknown periods fall back to 30 days.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "7d" => StatsPeriod::Week,
            "90d" => StatsPeriod::Quarter,
            _ => StatsPeriod::Month,
        })
    }
}

/// Order counts and revenue over a period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderStats {
    pub total_orders: u64,
    pub total_revenue: Money,
    pub pending_orders: u64,
    pub processing_orders: u64,
    pub shipped_orders: u64,
    pub delivered_orders: u64,
    pub cancelled_orders: u64,
    pub paid_orders: u64,
    pub average_order_value: Money,
}
