//! Domain error types.

use common::{OrderId, OrderStatus, ProductId};
use storage::StorageError;
use thiserror::Error;

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input. Nothing was written.
    Validation,
    /// Caller identity missing or not allowed.
    Unauthorized,
    /// Referenced entity does not exist.
    NotFound,
    /// Request conflicts with current state. Nothing was written.
    Conflict,
    /// Unexpected failure.
    Internal,
}

/// Errors that can occur during order and inventory operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The cart had no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// A cart line asked for zero units.
    #[error("Invalid quantity for product {product_id}")]
    InvalidQuantity { product_id: ProductId },

    /// A product does not exist in this store.
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    /// A product exists but is not for sale.
    #[error("Product unavailable: {product_id}")]
    ProductUnavailable { product_id: ProductId },

    /// Not enough stock to cover the request.
    #[error("Insufficient stock for product {product_id}: {available} available")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
    },

    /// The order does not exist in this store.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The status change is not on the order state graph.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The order is in a terminal status.
    #[error("Order is already {status}")]
    AlreadyTerminal { status: OrderStatus },

    /// The order kept changing underneath the update.
    #[error("Order {0} was modified concurrently")]
    Contended(OrderId),

    /// A storage error occurred.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::EmptyCart
            | DomainError::InvalidQuantity { .. }
            | DomainError::ProductNotFound { .. } => ErrorKind::Validation,
            DomainError::OrderNotFound(_) => ErrorKind::NotFound,
            DomainError::ProductUnavailable { .. }
            | DomainError::InsufficientStock { .. }
            | DomainError::InvalidTransition { .. }
            | DomainError::AlreadyTerminal { .. }
            | DomainError::Contended(_) => ErrorKind::Conflict,
            DomainError::Storage(StorageError::NotFound { .. }) => ErrorKind::NotFound,
            DomainError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::EmptyCart => "EMPTY_CART",
            DomainError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            DomainError::ProductNotFound { .. } => "PRODUCT_NOT_FOUND",
            DomainError::ProductUnavailable { .. } => "PRODUCT_UNAVAILABLE",
            DomainError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            DomainError::OrderNotFound(_) => "NOT_FOUND",
            DomainError::InvalidTransition { .. } => "INVALID_TRANSITION",
            DomainError::AlreadyTerminal { .. } => "ALREADY_TERMINAL",
            DomainError::Contended(_) => "CONFLICT",
            DomainError::Storage(StorageError::NotFound { .. }) => "NOT_FOUND",
            DomainError::Storage(_) => "INTERNAL",
        }
    }

    /// Units still available, for `InsufficientStock`.
    pub fn available(&self) -> Option<u32> {
        match self {
            DomainError::InsufficientStock { available, .. } => Some(*available),
            _ => None,
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
