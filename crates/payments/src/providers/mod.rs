//! Payment provider adapters.

mod click;
mod offline;
mod payme;
mod telegram;

pub use click::{ClickAdapter, ClickConfig};
pub use offline::OfflineAdapter;
pub use payme::{PaymeAdapter, PaymeConfig};
pub use telegram::{TelegramAdapter, TelegramConfig};

use subtle::ConstantTimeEq;

/// Compares two secrets without leaking where they differ.
pub(crate) fn secure_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
