//! Shared types for the storefront order and payment engine.

pub mod money;
pub mod status;
pub mod types;

pub use money::Money;
pub use status::{DeliveryMethod, OrderStatus, ParseEnumError, PaymentMethod, PaymentStatus};
pub use types::{CustomerId, OrderId, PaymentId, ProductId, StoreId};
