//! Payments for the storefront engine.
//!
//! Each provider is a [`PaymentAdapter`] registered in an
//! [`AdapterRegistry`]. The [`WebhookReconciler`] turns verified callbacks
//! into payment and order transitions; [`PaymentService`] creates payments
//! and records refunds.

pub mod adapter;
pub mod error;
pub mod providers;
pub mod reconciler;
pub mod registry;
pub mod service;

pub use adapter::{
    CallbackRequest, Disposition, Initiation, NormalizedEvent, Outcome, PaymentAdapter, Phase,
    ProviderReply, Reconciled, TransactionRef,
};
pub use error::{CallbackError, PaymentError, Result};
pub use providers::{
    ClickAdapter, ClickConfig, OfflineAdapter, PaymeAdapter, PaymeConfig, TelegramAdapter,
    TelegramConfig,
};
pub use reconciler::WebhookReconciler;
pub use registry::AdapterRegistry;
pub use service::{CreatedPayment, PaymentService, RefundPayment, transaction_id};
