//! Order engine.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use common::{Money, OrderId, OrderStatus, PaymentStatus, StoreId};
use rust_decimal::Decimal;
use storage::{CasOutcome, Order, OrderChange, OrderItem, OrderQuery, Store};

use crate::error::{DomainError, Result};
use crate::inventory::{InventoryLedger, Reservation};
use crate::notify::{Dispatcher, Notification};

use super::{
    CancelOrder, CartItem, CreateOrder, OrderPage, OrderStats, Pagination, StatsPeriod,
    UpdateOrderStatus,
};

/// Attempts at a status compare-and-swap before giving up.
const MAX_CAS_ATTEMPTS: usize = 3;

/// Service for placing orders and driving their status.
pub struct OrderService<S: Store> {
    store: S,
    ledger: InventoryLedger<S>,
    dispatcher: Dispatcher,
}

impl<S: Store + Clone> OrderService<S> {
    /// Creates a new order service over the given store.
    pub fn new(store: S, dispatcher: Dispatcher) -> Self {
        Self {
            ledger: InventoryLedger::new(store.clone()),
            store,
            dispatcher,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &InventoryLedger<S> {
        &self.ledger
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Places an order: snapshots prices, reserves stock and persists the
    /// order with its items.
    ///
    /// Any failure after stock is taken releases it again, and an order row
    /// without items is deleted.
    #[tracing::instrument(skip(self, cmd), fields(store_id = %cmd.store_id, customer_id = %cmd.customer_id))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<Order> {
        let started = Instant::now();
        let lines = merge_lines(&cmd.items)?;

        let ids: Vec<_> = lines.iter().map(|l| l.product_id).collect();
        let products: HashMap<_, _> = self
            .store
            .get_products(cmd.store_id, &ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let order_id = OrderId::new();
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = products
                .get(&line.product_id)
                .ok_or(DomainError::ProductNotFound {
                    product_id: line.product_id,
                })?;
            if !product.is_active {
                return Err(DomainError::ProductUnavailable {
                    product_id: product.id,
                });
            }
            items.push(OrderItem {
                order_id,
                product_id: product.id,
                quantity: line.quantity,
                price: product.price,
            });
        }
        let total_amount: Money = items.iter().map(OrderItem::line_total).sum();

        let reservations: Vec<Reservation> = items
            .iter()
            .map(|i| Reservation::new(i.product_id, i.quantity))
            .collect();
        self.ledger.reserve_all(&reservations).await?;

        let now = Utc::now();
        let order = Order {
            id: order_id,
            store_id: cmd.store_id,
            customer_id: cmd.customer_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_amount,
            customer_info: cmd.customer_info,
            delivery_address: cmd.delivery.address,
            delivery_method: cmd.delivery.method,
            notes: cmd.delivery.notes,
            items,
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.persist(&order).await {
            tracing::warn!(order_id = %order.id, error = %err, "order persistence failed, releasing stock");
            if let Err(release_err) = self.ledger.release_all(&reservations).await {
                tracing::error!(order_id = %order.id, error = %release_err, "failed to release stock");
            }
            return Err(err);
        }

        metrics::counter!("orders_created_total").increment(1);
        metrics::histogram!("order_creation_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(order_id = %order.id, total = %order.total_amount, "order created");

        self.dispatcher
            .dispatch(Notification::OrderCreated {
                order: order.clone(),
            })
            .await;

        Ok(order)
    }

    async fn persist(&self, order: &Order) -> Result<()> {
        self.store.insert_order(order).await?;
        if let Err(err) = self.store.insert_order_items(order.id, &order.items).await {
            if let Err(delete_err) = self.store.delete_order(order.id).await {
                tracing::error!(order_id = %order.id, error = %delete_err, "failed to delete partial order");
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Loads an order with its items, scoped to the store.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, store_id: StoreId, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .filter(|o| o.store_id == store_id)
            .ok_or(DomainError::OrderNotFound(order_id))
    }

    /// Lists a store's orders. Page and limit are clamped to valid values.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, store_id: StoreId, mut query: OrderQuery) -> Result<OrderPage> {
        query.page = query.page.max(1);
        query.limit = query.limit.clamp(1, OrderQuery::MAX_LIMIT);

        let (orders, total) = self.store.list_orders(store_id, &query).await?;
        Ok(OrderPage {
            orders,
            pagination: Pagination {
                page: query.page,
                limit: query.limit,
                total,
                pages: total.div_ceil(u64::from(query.limit)),
            },
        })
    }

    /// Summarises orders created within `period`.
    #[tracing::instrument(skip(self))]
    pub async fn order_stats(&self, store_id: StoreId, period: StatsPeriod) -> Result<OrderStats> {
        let mut query = OrderQuery {
            date_from: Some(Utc::now() - period.duration()),
            limit: OrderQuery::MAX_LIMIT,
            ..OrderQuery::default()
        };

        let mut stats = OrderStats::default();
        loop {
            let (orders, total) = self.store.list_orders(store_id, &query).await?;
            for order in &orders {
                stats.total_orders += 1;
                stats.total_revenue += order.total_amount;
                match order.status {
                    OrderStatus::Pending => stats.pending_orders += 1,
                    OrderStatus::Processing => stats.processing_orders += 1,
                    OrderStatus::Shipped => stats.shipped_orders += 1,
                    OrderStatus::Delivered => stats.delivered_orders += 1,
                    OrderStatus::Cancelled => stats.cancelled_orders += 1,
                    OrderStatus::Confirmed | OrderStatus::Returned => {}
                }
                if order.payment_status == PaymentStatus::Paid {
                    stats.paid_orders += 1;
                }
            }
            if orders.is_empty() || u64::from(query.page) * u64::from(query.limit) >= total {
                break;
            }
            query.page += 1;
        }

        if stats.total_orders > 0 {
            stats.average_order_value =
                Money::new(stats.total_revenue.amount() / Decimal::from(stats.total_orders));
        }
        Ok(stats)
    }

    /// Moves an order to a new status along the order state graph.
    ///
    /// A target of `Cancelled` is handled by [`Self::cancel_order`] so the
    /// order's stock is always returned. Payment status is never touched here.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, status = %cmd.status))]
    pub async fn update_order_status(&self, cmd: UpdateOrderStatus) -> Result<Order> {
        if cmd.status == OrderStatus::Cancelled {
            return self
                .cancel_order(CancelOrder {
                    store_id: cmd.store_id,
                    order_id: cmd.order_id,
                    actor: None,
                    reason: cmd.notes,
                })
                .await;
        }

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get_order(cmd.store_id, cmd.order_id).await?;
            if !current.status.can_transition_to(cmd.status) {
                return Err(DomainError::InvalidTransition {
                    from: current.status,
                    to: cmd.status,
                });
            }

            let change = OrderChange {
                status: cmd.status,
                payment_status: None,
                notes: cmd.notes.clone(),
            };
            match self
                .store
                .transition_order(cmd.order_id, current.status, change)
                .await?
            {
                CasOutcome::Applied(order) => {
                    tracing::info!(from = %current.status, to = %order.status, "order status changed");
                    self.dispatcher
                        .dispatch(Notification::OrderStatusChanged {
                            order: order.clone(),
                            previous: current.status,
                        })
                        .await;
                    return Ok(order);
                }
                CasOutcome::Stale(latest) => {
                    tracing::debug!(expected = %current.status, actual = %latest.status, "status moved, retrying");
                }
            }
        }

        Err(DomainError::Contended(cmd.order_id))
    }

    /// Cancels an order and releases its stock.
    ///
    /// Rejected with `AlreadyTerminal` once the order is delivered,
    /// cancelled or returned. The swap is keyed on the observed status so a
    /// concurrent delivery wins cleanly.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, actor = ?cmd.actor))]
    pub async fn cancel_order(&self, cmd: CancelOrder) -> Result<Order> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get_order(cmd.store_id, cmd.order_id).await?;
            if !current.status.can_cancel() {
                return Err(DomainError::AlreadyTerminal {
                    status: current.status,
                });
            }

            let change = OrderChange {
                status: OrderStatus::Cancelled,
                payment_status: Some(PaymentStatus::Cancelled),
                notes: cmd.reason.clone(),
            };
            match self
                .store
                .transition_order(cmd.order_id, current.status, change)
                .await?
            {
                CasOutcome::Applied(order) => {
                    let reservations: Vec<Reservation> = order
                        .items
                        .iter()
                        .map(|i| Reservation::new(i.product_id, i.quantity))
                        .collect();
                    if let Err(err) = self.ledger.release_all(&reservations).await {
                        tracing::error!(error = %err, "stock release after cancel failed");
                    }

                    metrics::counter!("orders_cancelled_total").increment(1);
                    tracing::info!(from = %current.status, "order cancelled");
                    self.dispatcher
                        .dispatch(Notification::OrderStatusChanged {
                            order: order.clone(),
                            previous: current.status,
                        })
                        .await;
                    return Ok(order);
                }
                CasOutcome::Stale(latest) => {
                    tracing::debug!(expected = %current.status, actual = %latest.status, "status moved, retrying");
                }
            }
        }

        Err(DomainError::Contended(cmd.order_id))
    }
}

/// Validates quantities and folds repeated products into one line, keeping
/// first-seen order.
fn merge_lines(items: &[CartItem]) -> Result<Vec<CartItem>> {
    if items.is_empty() {
        return Err(DomainError::EmptyCart);
    }

    let mut lines: Vec<CartItem> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity == 0 {
            return Err(DomainError::InvalidQuantity {
                product_id: item.product_id,
            });
        }
        match lines.iter_mut().find(|l| l.product_id == item.product_id) {
            Some(line) => {
                line.quantity = line.quantity.checked_add(item.quantity).ok_or(
                    DomainError::InvalidQuantity {
                        product_id: item.product_id,
                    },
                )?
            }
            None => lines.push(*item),
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;

    #[test]
    fn merge_lines_folds_duplicates() {
        let a = ProductId::new();
        let b = ProductId::new();
        let lines = merge_lines(&[CartItem::new(a, 1), CartItem::new(b, 2), CartItem::new(a, 3)])
            .unwrap();
        assert_eq!(lines, vec![CartItem::new(a, 4), CartItem::new(b, 2)]);
    }

    #[test]
    fn merge_lines_rejects_empty_and_zero() {
        assert!(matches!(merge_lines(&[]), Err(DomainError::EmptyCart)));
        assert!(matches!(
            merge_lines(&[CartItem::new(ProductId::new(), 0)]),
            Err(DomainError::InvalidQuantity { .. })
        ));
    }
}
