//! Order commands and the order engine.

mod commands;
mod service;

pub use commands::{
    CancelOrder, CartItem, CreateOrder, DeliveryInfo, OrderPage, OrderStats, Pagination,
    StatsPeriod, UpdateOrderStatus,
};
pub use service::OrderService;
