//! Payment error types.

use common::{Money, OrderId, PaymentId, PaymentStatus};
use domain::{DomainError, ErrorKind};
use storage::StorageError;
use thiserror::Error;

/// Errors raised by payment initiation, lookup and refunds.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// No adapter is registered for this method.
    #[error("Unsupported payment method: {0}")]
    UnsupportedMethod(String),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    /// The order is already paid or cancelled.
    #[error("Order {order_id} cannot be paid")]
    NotPayable { order_id: OrderId },

    /// Only a `Paid` payment that is not itself a refund can be refunded.
    #[error("Payment in status {status} cannot be refunded")]
    NotRefundable { status: PaymentStatus },

    #[error("Refund of {requested} exceeds payment of {available}")]
    RefundExceedsPayment { requested: Money, available: Money },

    #[error("Refund amount must be positive")]
    InvalidAmount,

    /// The provider rejected or failed an outbound call.
    #[error("Provider error: {0}")]
    Provider(String),
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::Domain(err) => err.kind(),
            PaymentError::Storage(StorageError::NotFound { .. }) => ErrorKind::NotFound,
            PaymentError::Storage(_) | PaymentError::Provider(_) => ErrorKind::Internal,
            PaymentError::UnsupportedMethod(_) | PaymentError::InvalidAmount => {
                ErrorKind::Validation
            }
            PaymentError::OrderNotFound(_) | PaymentError::PaymentNotFound(_) => {
                ErrorKind::NotFound
            }
            PaymentError::NotPayable { .. }
            | PaymentError::NotRefundable { .. }
            | PaymentError::RefundExceedsPayment { .. } => ErrorKind::Conflict,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Domain(err) => err.code(),
            PaymentError::Storage(StorageError::NotFound { .. }) => "NOT_FOUND",
            PaymentError::Storage(_) | PaymentError::Provider(_) => "INTERNAL",
            PaymentError::UnsupportedMethod(_) => "UNSUPPORTED_PAYMENT_METHOD",
            PaymentError::InvalidAmount => "INVALID_AMOUNT",
            PaymentError::OrderNotFound(_) | PaymentError::PaymentNotFound(_) => "NOT_FOUND",
            PaymentError::NotPayable { .. } => "ORDER_NOT_PAYABLE",
            PaymentError::NotRefundable { .. } => "PAYMENT_NOT_REFUNDABLE",
            PaymentError::RefundExceedsPayment { .. } => "REFUND_EXCEEDS_PAYMENT",
        }
    }
}

/// Result type for payment operations.
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Why a provider callback was not applied.
///
/// Each adapter renders these in its own wire envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("Signature check failed")]
    SignatureInvalid,

    #[error("Malformed callback: {0}")]
    Malformed(String),

    /// The provider asked for an operation we do not implement.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Payment not found")]
    PaymentNotFound,

    #[error("Amount does not match payment")]
    AmountMismatch,

    /// The order is cancelled or already paid.
    #[error("Order is not payable")]
    NotPayable,

    /// The event contradicts the payment's current status.
    #[error("Payment is {current}")]
    ConflictingState { current: PaymentStatus },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallbackError {
    /// Returns true if the provider should redeliver.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallbackError::Internal(_))
    }

    /// Label for the rejection metric.
    pub fn reason(&self) -> &'static str {
        match self {
            CallbackError::SignatureInvalid => "signature_invalid",
            CallbackError::Malformed(_) => "malformed",
            CallbackError::UnknownMethod(_) => "unknown_method",
            CallbackError::PaymentNotFound => "payment_not_found",
            CallbackError::AmountMismatch => "amount_mismatch",
            CallbackError::NotPayable => "not_payable",
            CallbackError::ConflictingState { .. } => "conflicting_state",
            CallbackError::Internal(_) => "internal",
        }
    }
}

impl From<StorageError> for CallbackError {
    fn from(err: StorageError) -> Self {
        CallbackError::Internal(err.to_string())
    }
}
