//! Order fulfillment for the storefront engine.
//!
//! - [`InventoryLedger`] reserves and releases stock through the store's
//!   conditional updates
//! - [`OrderService`] builds orders from carts and owns the order state graph
//! - [`Dispatcher`] delivers best-effort notifications under a timeout

pub mod error;
pub mod inventory;
pub mod notify;
pub mod order;

pub use error::{DomainError, ErrorKind, Result};
pub use inventory::{InventoryLedger, Reservation};
pub use notify::{Dispatcher, InMemoryNotifier, LogNotifier, Notification, Notifier, NotifyError};
pub use order::{
    CancelOrder, CartItem, CreateOrder, DeliveryInfo, OrderPage, OrderService, OrderStats,
    Pagination, StatsPeriod, UpdateOrderStatus,
};
