//! The contract every payment provider implements.

use async_trait::async_trait;
use common::{Money, PaymentId, PaymentMethod, PaymentStatus};
use serde_json::Value;
use storage::{Order, Payment, ProviderData};

use crate::error::{CallbackError, Result};

/// A raw inbound callback as received over HTTP.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CallbackRequest {
    pub fn new(headers: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Builds a request with a JSON body.
    pub fn json(headers: Vec<(String, String)>, body: &Value) -> Self {
        Self::new(headers, body.to_string())
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// How a callback identifies its payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRef {
    /// Our `transaction_id`, echoed back by the provider.
    TransactionId(String),
    /// The provider's own id, bound to the payment earlier.
    ProviderPaymentId(String),
    /// Our payment id, carried in an invoice payload.
    PaymentId(PaymentId),
}

/// What the callback asks of us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Validate that the payment can proceed. No mutation.
    Check,
    /// Report a state change to apply.
    Notify,
    /// Read back current state. No mutation.
    Query,
}

/// Provider-agnostic result reported by a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Funds are held but not yet captured.
    Pending,
    Cancelled,
}

impl Outcome {
    /// The payment status this outcome drives towards.
    pub fn target(&self) -> PaymentStatus {
        match self {
            Outcome::Success => PaymentStatus::Paid,
            Outcome::Failure => PaymentStatus::Failed,
            Outcome::Pending => PaymentStatus::Processing,
            Outcome::Cancelled => PaymentStatus::Cancelled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Pending => "pending",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// A verified callback, normalized by its adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub transaction_ref: TransactionRef,
    pub phase: Phase,
    pub outcome: Outcome,
    /// Amount the provider claims, if it sent one worth checking.
    pub amount: Option<Money>,
    /// The provider's id for this payment, to bind or cross-check.
    pub provider_payment_id: Option<String>,
    /// The decoded callback body.
    pub raw: Value,
}

/// What an adapter returns from [`PaymentAdapter::initiate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initiation {
    pub provider_payment_id: Option<String>,
    pub redirect_url: Option<String>,
    pub provider_data: ProviderData,
}

/// How the reconciler handled a verified event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A transition was written.
    Applied,
    /// The payment already reflected the event; nothing was written.
    AlreadyApplied,
    /// A check or query phase; nothing was written.
    Checked,
}

/// Successful reconciliation, with the state after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub disposition: Disposition,
    pub payment: Payment,
    pub order: Order,
}

/// Response in the provider's own envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub status: u16,
    pub body: Value,
}

impl ProviderReply {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn with_status(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

/// One payment provider.
///
/// Adapters translate between the provider's wire format and our payment
/// model. They never write orders or payments themselves.
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Prepares the provider side of a new payment.
    async fn initiate(&self, order: &Order, payment: &Payment) -> Result<Initiation>;

    /// Authenticates and decodes a callback.
    fn verify_callback(&self, request: &CallbackRequest)
    -> std::result::Result<NormalizedEvent, CallbackError>;

    /// Provider data to store alongside a transition triggered by `event`.
    fn provider_data(
        &self,
        _existing: Option<&ProviderData>,
        _event: &NormalizedEvent,
    ) -> Option<ProviderData> {
        None
    }

    /// Renders the outcome of a callback. `event` is `None` when
    /// verification itself failed.
    fn reply(
        &self,
        event: Option<&NormalizedEvent>,
        result: &std::result::Result<Reconciled, CallbackError>,
    ) -> ProviderReply;
}
