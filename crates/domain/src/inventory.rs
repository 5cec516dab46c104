//! Inventory ledger: per-product stock reservation and release.

use common::ProductId;
use storage::{StockChange, Store};

use crate::error::{DomainError, Result};

/// A quantity of one product held for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl Reservation {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Moves stock through the store's conditional decrement and unconditional
/// increment. Nothing else writes `stock_quantity`.
#[derive(Clone)]
pub struct InventoryLedger<S> {
    store: S,
}

impl<S: Store> InventoryLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Takes `quantity` units of a product, returning the remaining stock.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, product_id: ProductId, quantity: u32) -> Result<u32> {
        let change = self.store.decrement_stock(product_id, quantity).await?;
        let reason = match change {
            StockChange::Decremented { remaining } => {
                metrics::counter!("stock_reservations_total").increment(1);
                tracing::debug!(remaining, "stock reserved");
                return Ok(remaining);
            }
            StockChange::Insufficient { .. } => "insufficient",
            StockChange::Inactive => "inactive",
            StockChange::Missing => "missing",
        };

        metrics::counter!("stock_reservation_failures_total", "reason" => reason).increment(1);
        Err(match change {
            StockChange::Insufficient { available } => DomainError::InsufficientStock {
                product_id,
                available,
            },
            StockChange::Inactive => DomainError::ProductUnavailable { product_id },
            _ => DomainError::ProductNotFound { product_id },
        })
    }

    /// Reserves every item or none.
    ///
    /// On the first failure the items already taken by this call are released
    /// and the failing item's error is returned.
    #[tracing::instrument(skip_all, fields(items = items.len()))]
    pub async fn reserve_all(&self, items: &[Reservation]) -> Result<()> {
        for (index, item) in items.iter().enumerate() {
            if let Err(err) = self.reserve(item.product_id, item.quantity).await {
                tracing::info!(
                    product_id = %item.product_id,
                    error = %err,
                    rolled_back = index,
                    "reservation failed, releasing earlier items"
                );
                if let Err(release_err) = self.release_all(&items[..index]).await {
                    tracing::error!(error = %release_err, "failed to roll back reservations");
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Returns `quantity` units to stock.
    ///
    /// Returns the new stock, or `None` if the product has been removed.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, product_id: ProductId, quantity: u32) -> Result<Option<u32>> {
        let restored = self.store.increment_stock(product_id, quantity).await?;
        metrics::counter!("stock_released_total").increment(u64::from(quantity));
        if restored.is_none() {
            tracing::warn!(%product_id, quantity, "released stock for a missing product");
        }
        Ok(restored)
    }

    /// Releases every item, continuing past failures.
    ///
    /// Returns the first error after all items have been attempted.
    pub async fn release_all(&self, items: &[Reservation]) -> Result<()> {
        let mut first_error = None;
        for item in items {
            if let Err(err) = self.release(item.product_id, item.quantity).await {
                tracing::error!(product_id = %item.product_id, error = %err, "stock release failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
