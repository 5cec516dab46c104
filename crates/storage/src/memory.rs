use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    OrderId, OrderStatus, PaymentId, PaymentMethod, PaymentStatus, ProductId, StoreId,
};
use tokio::sync::RwLock;

use crate::{
    Order, OrderItem, Payment, Product, ProviderData, Result, StorageError,
    store::{
        CasOutcome, OrderChange, OrderQuery, PaymentTransition, RefundRecord, Settlement,
        SortOrder, StockChange, Store,
    },
};

#[derive(Default)]
struct State {
    products: HashMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
    order_items: HashMap<OrderId, Vec<OrderItem>>,
    payments: HashMap<PaymentId, Payment>,
    fail_on_insert_items: bool,
}

impl State {
    fn order_with_items(&self, id: OrderId) -> Option<Order> {
        self.orders.get(&id).map(|order| {
            let mut order = order.clone();
            order.items = self.order_items.get(&id).cloned().unwrap_or_default();
            order
        })
    }
}

/// In-memory store for tests and local runs.
///
/// A single lock guards all tables, so every trait method is atomic. The lock
/// is never held across an await on anything but itself.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `insert_order_items` calls fail.
    pub async fn set_fail_on_insert_items(&self, fail: bool) {
        self.state.write().await.fail_on_insert_items = fail;
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the number of stored payments, refunds included.
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    /// Returns a product's stock, if the product exists.
    pub async fn stock_of(&self, id: ProductId) -> Option<u32> {
        self.state
            .read()
            .await
            .products
            .get(&id)
            .map(|p| p.stock_quantity)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_product(&self, product: &Product) -> Result<()> {
        self.state
            .write()
            .await
            .products
            .insert(product.id, product.clone());
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn get_products(&self, store_id: StoreId, ids: &[ProductId]) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.products.get(id))
            .filter(|p| p.store_id == store_id)
            .cloned()
            .collect())
    }

    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<StockChange> {
        let mut state = self.state.write().await;
        let Some(product) = state.products.get_mut(&id) else {
            return Ok(StockChange::Missing);
        };
        if !product.is_active {
            return Ok(StockChange::Inactive);
        }
        if product.stock_quantity < quantity {
            return Ok(StockChange::Insufficient {
                available: product.stock_quantity,
            });
        }
        product.stock_quantity -= quantity;
        product.updated_at = Utc::now();
        Ok(StockChange::Decremented {
            remaining: product.stock_quantity,
        })
    }

    async fn increment_stock(&self, id: ProductId, quantity: u32) -> Result<Option<u32>> {
        let mut state = self.state.write().await;
        Ok(state.products.get_mut(&id).map(|product| {
            product.stock_quantity = product.stock_quantity.saturating_add(quantity);
            product.updated_at = Utc::now();
            product.stock_quantity
        }))
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut stored = order.clone();
        stored.items.clear();
        self.state.write().await.orders.insert(order.id, stored);
        Ok(())
    }

    async fn insert_order_items(&self, order_id: OrderId, items: &[OrderItem]) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_insert_items {
            return Err(StorageError::Injected("insert_order_items"));
        }
        if !state.orders.contains_key(&order_id) {
            return Err(StorageError::not_found("order", order_id));
        }
        state
            .order_items
            .entry(order_id)
            .or_default()
            .extend_from_slice(items);
        Ok(())
    }

    async fn delete_order(&self, id: OrderId) -> Result<()> {
        let mut state = self.state.write().await;
        state.orders.remove(&id);
        state.order_items.remove(&id);
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.order_with_items(id))
    }

    async fn list_orders(
        &self,
        store_id: StoreId,
        query: &OrderQuery,
    ) -> Result<(Vec<Order>, u64)> {
        let state = self.state.read().await;
        let mut matching: Vec<&Order> = state
            .orders
            .values()
            .filter(|o| o.store_id == store_id && query.matches(o))
            .collect();

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if query.sort_order == SortOrder::Desc {
            matching.reverse();
        }

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .filter_map(|o| state.order_with_items(o.id))
            .collect();

        Ok((page, total))
    }

    async fn transition_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        change: OrderChange,
    ) -> Result<CasOutcome<Order, Order>> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("order", id))?;

        if order.status != expected {
            let current = order.clone();
            return Ok(CasOutcome::Stale(Order {
                items: state.order_items.get(&id).cloned().unwrap_or_default(),
                ..current
            }));
        }

        order.status = change.status;
        if let Some(payment_status) = change.payment_status {
            order.payment_status = payment_status;
        }
        if change.notes.is_some() {
            order.notes = change.notes;
        }
        order.updated_at = Utc::now();

        let updated = order.clone();
        Ok(CasOutcome::Applied(Order {
            items: state.order_items.get(&id).cloned().unwrap_or_default(),
            ..updated
        }))
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .payments
            .values()
            .any(|p| p.transaction_id == payment.transaction_id)
        {
            return Err(StorageError::DuplicateTransaction(
                payment.transaction_id.clone(),
            ));
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn find_payment_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .find(|p| p.transaction_id == transaction_id)
            .cloned())
    }

    async fn find_payment_by_provider_id(
        &self,
        method: PaymentMethod,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .find(|p| {
                p.payment_method == method
                    && !p.is_refund()
                    && p.provider_payment_id.as_deref() == Some(provider_payment_id)
            })
            .cloned())
    }

    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn attach_provider(
        &self,
        id: PaymentId,
        provider_payment_id: Option<String>,
        provider_data: ProviderData,
    ) -> Result<Payment> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("payment", id))?;
        if provider_payment_id.is_some() {
            payment.provider_payment_id = provider_payment_id;
        }
        payment.provider_data = Some(provider_data);
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn transition_payment(
        &self,
        transition: PaymentTransition,
    ) -> Result<CasOutcome<Settlement, Payment>> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let payment = state
            .payments
            .get_mut(&transition.payment_id)
            .ok_or_else(|| StorageError::not_found("payment", transition.payment_id))?;
        if payment.status != transition.expected {
            return Ok(CasOutcome::Stale(payment.clone()));
        }

        payment.status = transition.next;
        if transition.provider_payment_id.is_some() {
            payment.provider_payment_id = transition.provider_payment_id;
        }
        if transition.provider_data.is_some() {
            payment.provider_data = transition.provider_data;
        }
        if transition.notes.is_some() {
            payment.notes = transition.notes;
        }
        payment.updated_at = now;
        let payment = payment.clone();

        let order = match transition.order {
            Some(update) => {
                let order = state
                    .orders
                    .get_mut(&payment.order_id)
                    .ok_or_else(|| StorageError::not_found("order", payment.order_id))?;
                order.payment_status = update.payment_status;
                if let Some(next) = update.promote_pending_to {
                    if order.status == OrderStatus::Pending {
                        order.status = next;
                    }
                }
                order.updated_at = now;
                state.order_with_items(payment.order_id)
            }
            None => None,
        };

        Ok(CasOutcome::Applied(Settlement { payment, order }))
    }

    async fn record_refund(
        &self,
        refund: &Payment,
        parent_next: PaymentStatus,
    ) -> Result<CasOutcome<RefundRecord, Payment>> {
        let parent_id = refund
            .parent_payment_id
            .ok_or_else(|| StorageError::not_found("parent payment", refund.id))?;

        let mut state = self.state.write().await;
        if state
            .payments
            .values()
            .any(|p| p.transaction_id == refund.transaction_id)
        {
            return Err(StorageError::DuplicateTransaction(
                refund.transaction_id.clone(),
            ));
        }

        let now = Utc::now();
        let parent = state
            .payments
            .get_mut(&parent_id)
            .ok_or_else(|| StorageError::not_found("payment", parent_id))?;
        if parent.status != PaymentStatus::Paid {
            return Ok(CasOutcome::Stale(parent.clone()));
        }
        parent.status = parent_next;
        parent.updated_at = now;
        let parent = parent.clone();

        let order = state
            .orders
            .get_mut(&parent.order_id)
            .ok_or_else(|| StorageError::not_found("order", parent.order_id))?;
        order.payment_status = parent_next;
        order.updated_at = now;

        state.payments.insert(refund.id, refund.clone());
        let order = state
            .order_with_items(parent.order_id)
            .ok_or_else(|| StorageError::not_found("order", parent.order_id))?;

        Ok(CasOutcome::Applied(RefundRecord {
            parent,
            refund: refund.clone(),
            order,
        }))
    }
}
