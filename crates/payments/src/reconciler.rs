//! Applies verified provider callbacks to payments and orders.

use common::{OrderStatus, PaymentMethod, PaymentStatus};
use domain::{Dispatcher, Notification};
use storage::{CasOutcome, Order, OrderPaymentUpdate, Payment, PaymentTransition, Store};

use crate::adapter::{
    CallbackRequest, Disposition, NormalizedEvent, PaymentAdapter, Phase, ProviderReply,
    Reconciled, TransactionRef,
};
use crate::error::{CallbackError, PaymentError, Result};
use crate::registry::AdapterRegistry;

/// Attempts at a payment compare-and-swap before reporting a retryable error.
const MAX_CAS_ATTEMPTS: usize = 3;

enum Step {
    Done(Disposition),
    Transition(PaymentStatus),
}

/// Webhook entry point for every registered provider.
///
/// Each callback is verified by its adapter, resolved to a payment and then
/// applied as a single compare-and-swap on the payment's status. Replays
/// of an event the payment already reflects are acknowledged without
/// writing anything.
pub struct WebhookReconciler<S: Store> {
    store: S,
    registry: AdapterRegistry,
    dispatcher: Dispatcher,
}

impl<S: Store> WebhookReconciler<S> {
    pub fn new(store: S, registry: AdapterRegistry, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            registry,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Handles one raw callback and renders the provider's reply.
    ///
    /// Only a missing adapter is an error; everything else is answered in
    /// the provider's own envelope.
    #[tracing::instrument(skip(self, request), fields(provider = %method))]
    pub async fn handle(
        &self,
        method: PaymentMethod,
        request: CallbackRequest,
    ) -> Result<ProviderReply> {
        let adapter = self
            .registry
            .get(method)
            .ok_or_else(|| PaymentError::UnsupportedMethod(method.to_string()))?;
        metrics::counter!("webhooks_received_total", "provider" => method.as_str()).increment(1);

        let event = match adapter.verify_callback(&request) {
            Ok(event) => event,
            Err(err) => {
                rejected(method, &err);
                return Ok(adapter.reply(None, &Err(err)));
            }
        };

        let result = self.reconcile(adapter.as_ref(), &event).await;
        if let Err(err) = &result {
            rejected(method, err);
        }
        Ok(adapter.reply(Some(&event), &result))
    }

    /// Applies a verified event.
    pub async fn reconcile(
        &self,
        adapter: &dyn PaymentAdapter,
        event: &NormalizedEvent,
    ) -> std::result::Result<Reconciled, CallbackError> {
        let method = adapter.method();
        let mut payment = self.resolve(method, &event.transaction_ref).await?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let order = self
                .store
                .get_order(payment.order_id)
                .await?
                .ok_or(CallbackError::PaymentNotFound)?;

            let next = match decide(&payment, &order, event)? {
                Step::Done(disposition) => {
                    return Ok(Reconciled {
                        disposition,
                        payment,
                        order,
                    });
                }
                Step::Transition(next) => next,
            };

            let transition = PaymentTransition {
                payment_id: payment.id,
                expected: payment.status,
                next,
                provider_payment_id: event.provider_payment_id.clone(),
                provider_data: adapter.provider_data(payment.provider_data.as_ref(), event),
                notes: None,
                order: (next == PaymentStatus::Paid).then_some(OrderPaymentUpdate {
                    payment_status: PaymentStatus::Paid,
                    promote_pending_to: Some(OrderStatus::Processing),
                }),
            };

            match self.store.transition_payment(transition).await? {
                CasOutcome::Applied(settlement) => {
                    let order = settlement.order.unwrap_or(order);
                    self.applied(method, event, &payment, &settlement.payment, &order)
                        .await;
                    return Ok(Reconciled {
                        disposition: Disposition::Applied,
                        payment: settlement.payment,
                        order,
                    });
                }
                CasOutcome::Stale(current) => {
                    tracing::debug!(
                        expected = %payment.status,
                        actual = %current.status,
                        "payment moved, retrying"
                    );
                    payment = current;
                }
            }
        }

        Err(CallbackError::Internal("payment status contended".into()))
    }

    async fn resolve(
        &self,
        method: PaymentMethod,
        reference: &TransactionRef,
    ) -> std::result::Result<Payment, CallbackError> {
        let found = match reference {
            TransactionRef::TransactionId(id) => {
                self.store.find_payment_by_transaction_id(id).await?
            }
            TransactionRef::ProviderPaymentId(id) => {
                self.store.find_payment_by_provider_id(method, id).await?
            }
            TransactionRef::PaymentId(id) => self.store.get_payment(*id).await?,
        };
        found
            .filter(|p| p.payment_method == method && !p.is_refund())
            .ok_or(CallbackError::PaymentNotFound)
    }

    async fn applied(
        &self,
        method: PaymentMethod,
        event: &NormalizedEvent,
        before: &Payment,
        payment: &Payment,
        order: &Order,
    ) {
        metrics::counter!(
            "payments_settled_total",
            "provider" => method.as_str(),
            "outcome" => event.outcome.as_str()
        )
        .increment(1);
        tracing::info!(
            payment_id = %payment.id,
            order_id = %order.id,
            from = %before.status,
            to = %payment.status,
            "payment transitioned"
        );

        if payment.status == PaymentStatus::Paid {
            if order.status == OrderStatus::Cancelled {
                tracing::warn!(
                    payment_id = %payment.id,
                    order_id = %order.id,
                    "payment captured for a cancelled order"
                );
            }
            self.dispatcher
                .dispatch(Notification::PaymentReceived {
                    order: order.clone(),
                    payment: payment.clone(),
                })
                .await;
        }
    }
}

fn rejected(method: PaymentMethod, err: &CallbackError) {
    metrics::counter!(
        "webhooks_rejected_total",
        "provider" => method.as_str(),
        "reason" => err.reason()
    )
    .increment(1);
    if err.is_retryable() {
        tracing::error!(error = %err, "webhook failed");
    } else {
        tracing::warn!(error = %err, "webhook rejected");
    }
}

fn decide(
    payment: &Payment,
    order: &Order,
    event: &NormalizedEvent,
) -> std::result::Result<Step, CallbackError> {
    if let (Some(bound), Some(incoming)) = (&payment.provider_payment_id, &event.provider_payment_id)
        && payment.status != PaymentStatus::Pending
        && bound != incoming
    {
        return Err(CallbackError::ConflictingState {
            current: payment.status,
        });
    }

    match event.phase {
        Phase::Query => Ok(Step::Done(Disposition::Checked)),
        Phase::Check => {
            ensure_payable(payment, order)?;
            ensure_amount(payment, event)?;
            Ok(Step::Done(Disposition::Checked))
        }
        Phase::Notify => {
            let target = event.outcome.target();
            if payment.status.reflects(target) {
                return Ok(Step::Done(Disposition::AlreadyApplied));
            }
            if !payment.status.can_transition_to(target) {
                return Err(CallbackError::ConflictingState {
                    current: payment.status,
                });
            }
            match target {
                PaymentStatus::Processing => {
                    ensure_payable(payment, order)?;
                    ensure_amount(payment, event)?;
                }
                // A capture is authoritative even on a cancelled order.
                PaymentStatus::Paid => ensure_amount(payment, event)?,
                _ => {}
            }
            Ok(Step::Transition(target))
        }
    }
}

fn ensure_payable(payment: &Payment, order: &Order) -> std::result::Result<(), CallbackError> {
    if order.status == OrderStatus::Cancelled || order.payment_status.is_settled() {
        return Err(CallbackError::NotPayable);
    }
    if !payment.status.is_open() {
        return Err(CallbackError::ConflictingState {
            current: payment.status,
        });
    }
    Ok(())
}

fn ensure_amount(payment: &Payment, event: &NormalizedEvent) -> std::result::Result<(), CallbackError> {
    match event.amount {
        Some(amount) if amount != payment.amount => Err(CallbackError::AmountMismatch),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Outcome;
    use chrono::Utc;
    use common::{CustomerId, DeliveryMethod, Money, OrderId, StoreId};
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use storage::CustomerInfo;

    fn order(status: OrderStatus, payment_status: PaymentStatus) -> Order {
        Order {
            id: OrderId::new(),
            store_id: StoreId::new(),
            customer_id: CustomerId::new(),
            status,
            payment_status,
            total_amount: Money::new(dec!(15)),
            customer_info: CustomerInfo::default(),
            delivery_address: None,
            delivery_method: DeliveryMethod::Pickup,
            notes: None,
            items: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn payment(status: PaymentStatus, bound: Option<&str>) -> Payment {
        let mut payment = Payment::pending(
            OrderId::new(),
            Money::new(dec!(15)),
            PaymentMethod::Click,
            "TXN_1",
        );
        payment.status = status;
        payment.provider_payment_id = bound.map(String::from);
        payment
    }

    fn event(phase: Phase, outcome: Outcome, amount: Option<Money>, id: Option<&str>) -> NormalizedEvent {
        NormalizedEvent {
            transaction_ref: TransactionRef::TransactionId("TXN_1".into()),
            phase,
            outcome,
            amount,
            provider_payment_id: id.map(String::from),
            raw: Value::Null,
        }
    }

    #[test]
    fn late_prepare_after_capture_is_already_applied() {
        let step = decide(
            &payment(PaymentStatus::Paid, Some("c-1")),
            &order(OrderStatus::Processing, PaymentStatus::Paid),
            &event(Phase::Notify, Outcome::Pending, Some(Money::new(dec!(15))), Some("c-1")),
        );
        assert!(matches!(step, Ok(Step::Done(Disposition::AlreadyApplied))));
    }

    #[test]
    fn different_provider_id_conflicts() {
        let err = decide(
            &payment(PaymentStatus::Processing, Some("pm-1")),
            &order(OrderStatus::Pending, PaymentStatus::Pending),
            &event(Phase::Notify, Outcome::Pending, None, Some("pm-2")),
        )
        .err();
        assert_eq!(
            err,
            Some(CallbackError::ConflictingState {
                current: PaymentStatus::Processing
            })
        );
    }

    #[test]
    fn cancel_after_capture_conflicts() {
        let err = decide(
            &payment(PaymentStatus::Paid, None),
            &order(OrderStatus::Processing, PaymentStatus::Paid),
            &event(Phase::Notify, Outcome::Cancelled, None, None),
        )
        .err();
        assert!(matches!(err, Some(CallbackError::ConflictingState { .. })));
    }

    #[test]
    fn check_phase_validates_amount_and_payability() {
        let pending = payment(PaymentStatus::Pending, None);
        let wrong = event(Phase::Check, Outcome::Pending, Some(Money::new(dec!(14))), None);
        assert_eq!(
            decide(&pending, &order(OrderStatus::Pending, PaymentStatus::Pending), &wrong).err(),
            Some(CallbackError::AmountMismatch)
        );

        let right = event(Phase::Check, Outcome::Pending, Some(Money::new(dec!(15))), None);
        assert_eq!(
            decide(&pending, &order(OrderStatus::Cancelled, PaymentStatus::Cancelled), &right).err(),
            Some(CallbackError::NotPayable)
        );
    }

    #[test]
    fn capture_on_cancelled_order_still_transitions() {
        let step = decide(
            &payment(PaymentStatus::Processing, Some("c-1")),
            &order(OrderStatus::Cancelled, PaymentStatus::Cancelled),
            &event(Phase::Notify, Outcome::Success, Some(Money::new(dec!(15))), Some("c-1")),
        );
        assert!(matches!(step, Ok(Step::Transition(PaymentStatus::Paid))));
    }
}
