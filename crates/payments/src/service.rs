//! Payment initiation, lookup and refunds.

use std::time::Duration;

use chrono::Utc;
use common::{Money, OrderId, OrderStatus, PaymentId, PaymentMethod, PaymentStatus};
use serde::Serialize;
use storage::{CasOutcome, Order, Payment, StorageError, Store};
use uuid::Uuid;

use crate::error::{PaymentError, Result};
use crate::registry::AdapterRegistry;

/// Attempts at inserting a payment before a transaction id collision is fatal.
const MAX_INSERT_ATTEMPTS: usize = 3;

/// A new payment and where to send the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedPayment {
    pub payment: Payment,
    pub payment_url: Option<String>,
}

/// Command to refund a paid payment.
#[derive(Debug, Clone)]
pub struct RefundPayment {
    pub payment_id: PaymentId,
    /// Defaults to the full payment amount.
    pub amount: Option<Money>,
    pub reason: Option<String>,
}

impl RefundPayment {
    pub fn new(payment_id: PaymentId) -> Self {
        Self {
            payment_id,
            amount: None,
            reason: None,
        }
    }

    pub fn with_amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Generates an idempotency key: `TXN_<unix-millis>_<12 hex chars>`.
pub fn transaction_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("TXN_{}_{}", Utc::now().timestamp_millis(), &suffix[..12])
}

/// Service for the client-facing side of payments.
pub struct PaymentService<S: Store> {
    store: S,
    registry: AdapterRegistry,
    initiate_timeout: Duration,
}

impl<S: Store> PaymentService<S> {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(store: S, registry: AdapterRegistry, initiate_timeout: Duration) -> Self {
        Self {
            store,
            registry,
            initiate_timeout,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Creates a pending payment for the full order total and asks the
    /// provider for a redirect.
    ///
    /// A provider that fails or times out is logged and the payment is
    /// returned without a URL.
    #[tracing::instrument(skip(self), fields(method = %method))]
    pub async fn create_payment(
        &self,
        order_id: OrderId,
        method: PaymentMethod,
    ) -> Result<CreatedPayment> {
        let adapter = self
            .registry
            .get(method)
            .ok_or_else(|| PaymentError::UnsupportedMethod(method.to_string()))?;

        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(PaymentError::OrderNotFound(order_id))?;
        if order.status == OrderStatus::Cancelled || order.payment_status.is_settled() {
            return Err(PaymentError::NotPayable { order_id });
        }

        let payment = self.insert_pending(&order, method).await?;

        let initiation =
            tokio::time::timeout(self.initiate_timeout, adapter.initiate(&order, &payment)).await;
        let (payment, payment_url) = match initiation {
            Ok(Ok(initiation)) => {
                let payment = self
                    .store
                    .attach_provider(
                        payment.id,
                        initiation.provider_payment_id,
                        initiation.provider_data,
                    )
                    .await?;
                (payment, initiation.redirect_url)
            }
            Ok(Err(err)) => {
                tracing::warn!(payment_id = %payment.id, error = %err, "payment initiation failed");
                (payment, None)
            }
            Err(_) => {
                tracing::warn!(
                    payment_id = %payment.id,
                    timeout_ms = self.initiate_timeout.as_millis() as u64,
                    "payment initiation timed out"
                );
                (payment, None)
            }
        };

        metrics::counter!("payments_initiated_total", "provider" => method.as_str()).increment(1);
        tracing::info!(payment_id = %payment.id, transaction_id = %payment.transaction_id, "payment created");

        Ok(CreatedPayment {
            payment,
            payment_url,
        })
    }

    async fn insert_pending(&self, order: &Order, method: PaymentMethod) -> Result<Payment> {
        let mut last = String::new();
        for _ in 0..MAX_INSERT_ATTEMPTS {
            let payment = Payment::pending(order.id, order.total_amount, method, transaction_id());
            match self.store.insert_payment(&payment).await {
                Ok(()) => return Ok(payment),
                Err(StorageError::DuplicateTransaction(id)) => {
                    tracing::debug!(transaction_id = %id, "transaction id taken, regenerating");
                    last = id;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(StorageError::DuplicateTransaction(last).into())
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment> {
        self.store
            .get_payment(id)
            .await?
            .ok_or(PaymentError::PaymentNotFound(id))
    }

    /// Records a refund against a paid payment.
    ///
    /// The refund is a new row with a negative amount. The provider is not
    /// contacted and stock is not returned.
    #[tracing::instrument(skip(self, cmd), fields(payment_id = %cmd.payment_id))]
    pub async fn refund_payment(&self, cmd: RefundPayment) -> Result<Payment> {
        let parent = self.get_payment(cmd.payment_id).await?;
        if parent.is_refund() || parent.status != PaymentStatus::Paid {
            return Err(PaymentError::NotRefundable {
                status: parent.status,
            });
        }

        let amount = cmd.amount.unwrap_or(parent.amount);
        if !amount.is_positive() {
            return Err(PaymentError::InvalidAmount);
        }
        if amount > parent.amount {
            return Err(PaymentError::RefundExceedsPayment {
                requested: amount,
                available: parent.amount,
            });
        }

        let full = amount == parent.amount;
        let parent_next = if full {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };

        let refund = Payment {
            status: PaymentStatus::Refunded,
            parent_payment_id: Some(parent.id),
            notes: cmd.reason,
            ..Payment::pending(parent.order_id, -amount, parent.payment_method, transaction_id())
        };

        match self.store.record_refund(&refund, parent_next).await? {
            CasOutcome::Applied(record) => {
                let kind = if full { "full" } else { "partial" };
                metrics::counter!("refunds_total", "kind" => kind).increment(1);
                tracing::info!(
                    refund_id = %record.refund.id,
                    amount = %amount,
                    parent_status = %record.parent.status,
                    "payment refunded"
                );
                Ok(record.refund)
            }
            CasOutcome::Stale(current) => Err(PaymentError::NotRefundable {
                status: current.status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_shape() {
        let id = transaction_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "TXN");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 12);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(transaction_id(), id);
    }
}
