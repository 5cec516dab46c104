//! Persistence for the storefront engine.
//!
//! The [`Store`] trait is the only way the engine touches durable state. Every
//! mutation that more than one request can race on is expressed as a
//! conditional update keyed by the current status (or, for stock, the current
//! quantity), so callers never read-then-write.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use error::{Result, StorageError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use records::{CustomerInfo, Order, OrderItem, Payment, Product, ProviderData};
pub use store::{
    CasOutcome, OrderChange, OrderPaymentUpdate, OrderQuery, PaymentTransition, RefundRecord,
    Settlement, SortOrder, StockChange, Store,
};
