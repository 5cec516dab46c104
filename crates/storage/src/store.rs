use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    OrderId, OrderStatus, PaymentId, PaymentMethod, PaymentStatus, ProductId, StoreId,
};
use serde::{Deserialize, Serialize};

use crate::{Order, OrderItem, Payment, Product, ProviderData, Result};

/// Result of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockChange {
    /// Stock was decremented; `remaining` is the new quantity.
    Decremented { remaining: u32 },
    /// Stock was lower than requested; nothing changed.
    Insufficient { available: u32 },
    /// The product is inactive; nothing changed.
    Inactive,
    /// No such product.
    Missing,
}

/// Result of a compare-and-swap update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome<A, C> {
    /// The expected state matched and the update was written.
    Applied(A),
    /// The row had moved on; carries the current state, nothing was written.
    Stale(C),
}

/// Status change applied to an order by [`Store::transition_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderChange {
    pub status: OrderStatus,
    pub payment_status: Option<PaymentStatus>,
    /// Replaces the order notes when set.
    pub notes: Option<String>,
}

impl OrderChange {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status,
            payment_status: None,
            notes: None,
        }
    }
}

/// Order side of a payment transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderPaymentUpdate {
    pub payment_status: PaymentStatus,
    /// If the order is still `Pending`, move it to this status.
    pub promote_pending_to: Option<OrderStatus>,
}

/// A payment status change, keyed by the status the caller last observed.
///
/// The payment row and, when `order` is set, its order are written in one
/// atomic step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTransition {
    pub payment_id: PaymentId,
    pub expected: PaymentStatus,
    pub next: PaymentStatus,
    pub provider_payment_id: Option<String>,
    pub provider_data: Option<ProviderData>,
    pub notes: Option<String>,
    pub order: Option<OrderPaymentUpdate>,
}

/// Rows written by an applied [`PaymentTransition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub payment: Payment,
    pub order: Option<Order>,
}

/// Rows written by an applied refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRecord {
    pub parent: Payment,
    pub refund: Payment,
    pub order: Order,
}

/// Sort direction on `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filters and paging for order listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub sort_order: SortOrder,
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
}

impl OrderQuery {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }

    /// Returns true if `order` passes every filter.
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|s| order.status == s)
            && self.payment_status.is_none_or(|s| order.payment_status == s)
            && self.date_from.is_none_or(|from| order.created_at >= from)
            && self.date_to.is_none_or(|to| order.created_at <= to)
    }
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            status: None,
            payment_status: None,
            date_from: None,
            date_to: None,
            sort_order: SortOrder::default(),
            page: 1,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// Persistence port for the engine.
///
/// Implementations must be thread-safe and must make every conditional
/// update atomic with respect to concurrent callers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts or replaces a product. Used by catalog management.
    async fn upsert_product(&self, product: &Product) -> Result<()>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Loads the products among `ids` that belong to `store_id`.
    async fn get_products(&self, store_id: StoreId, ids: &[ProductId]) -> Result<Vec<Product>>;

    /// Decrements stock only if the product is active and has at least
    /// `quantity` units.
    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<StockChange>;

    /// Unconditionally returns `quantity` units to stock.
    ///
    /// Returns the new quantity, or `None` if the product no longer exists.
    async fn increment_stock(&self, id: ProductId, quantity: u32) -> Result<Option<u32>>;

    /// Inserts the order row. `order.items` is ignored.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn insert_order_items(&self, order_id: OrderId, items: &[OrderItem]) -> Result<()>;

    /// Deletes an order and its items. Used only to undo a failed creation.
    async fn delete_order(&self, id: OrderId) -> Result<()>;

    /// Loads an order with its items.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Returns one page of a store's orders and the total match count.
    async fn list_orders(&self, store_id: StoreId, query: &OrderQuery)
    -> Result<(Vec<Order>, u64)>;

    /// Applies `change` only if the order is currently in `expected`.
    async fn transition_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        change: OrderChange,
    ) -> Result<CasOutcome<Order, Order>>;

    /// Inserts a payment. Fails with `DuplicateTransaction` if the
    /// transaction id is taken.
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>>;

    async fn find_payment_by_transaction_id(&self, transaction_id: &str)
    -> Result<Option<Payment>>;

    async fn find_payment_by_provider_id(
        &self,
        method: PaymentMethod,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>>;

    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>>;

    /// Records what the provider returned when the payment was initiated.
    async fn attach_provider(
        &self,
        id: PaymentId,
        provider_payment_id: Option<String>,
        provider_data: ProviderData,
    ) -> Result<Payment>;

    /// Applies a payment transition if the payment is still in
    /// `transition.expected`.
    async fn transition_payment(
        &self,
        transition: PaymentTransition,
    ) -> Result<CasOutcome<Settlement, Payment>>;

    /// Inserts `refund` and moves its parent from `Paid` to `parent_next`,
    /// mirroring `parent_next` onto the order's payment status.
    async fn record_refund(
        &self,
        refund: &Payment,
        parent_next: PaymentStatus,
    ) -> Result<CasOutcome<RefundRecord, Payment>>;
}
