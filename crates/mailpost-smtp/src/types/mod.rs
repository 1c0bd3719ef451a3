//! Core SMTP types.

mod address;
mod dsn;
mod extension;
mod reply;

pub use address::Address;
pub use dsn::{Dsn, DsnBuilder};
pub use extension::Extension;
pub use reply::{Reply, ReplyCode};
