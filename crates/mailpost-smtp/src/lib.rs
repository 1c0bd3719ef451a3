//! # mailpost-smtp
//!
//! An SMTP client protocol engine (RFC 5321) with a tolerant reply decoder.
//!
//! ## Features
//!
//! - **Explicit state machine**: `FRESH → CONNECTED → LOGIN_COMPLETE →
//!   MAILFROM_DONE → RCPTTO_DONE`, with a `BAD` trap for broken streams
//! - **One driver, two dialects**: HELO, or EHLO with extension discovery
//! - **Delivery status notifications**: `RET`/`ENVID` and `NOTIFY`/`ORCPT`
//!   parameters when the server advertises DSN
//! - **Tolerant decoding**: bounded recovery from stray carriage returns and
//!   malformed lines
//! - **Timeouts and cancellation** on every network wait
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailpost_smtp::{Address, Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> mailpost_smtp::Result<()> {
//!     let config = ClientConfig::builder()
//!         .extensions(true)
//!         .helo_host("client.example.com")
//!         .build();
//!     let mut client = Client::new(config);
//!
//!     client.connect("smtp.example.com", 25).await?;
//!     client.login().await?;
//!
//!     let from = Address::new("sender@example.com")?;
//!     let to = Address::new("recipient@example.com")?;
//!     client.sender(&from, None).await?;
//!     client.recipient(&to, None).await?;
//!
//!     let mut bodies = [Some(&b"Subject: Test\r\n\r\nHello, World!\r\n"[..])];
//!     let reply = client.send_data(&mut bodies).await?;
//!     println!("{reply}");
//!
//!     client.done().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`cancel`]: Cancellation signal
//! - [`command`]: SMTP command builders
//! - [`connection`]: State machine, framing and the protocol driver
//! - [`parser`]: Incremental reply decoder
//! - [`types`]: Core SMTP types (addresses, DSN, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cancel;
pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use cancel::{CancelToken, Canceller};
pub use connection::{
    Client, ClientConfig, ClientConfigBuilder, ConnectionState, Connector, ServerInfo,
    TcpConnector,
};
pub use error::{Error, ErrorKind, Phase, Result};
pub use types::{Address, Dsn, DsnBuilder, Extension, Reply, ReplyCode};
