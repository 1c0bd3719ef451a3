//! SMTP connection management.
//!
//! [`Client`] drives one connection through the [`ConnectionState`] machine.
//! Framing, timeouts and cancellation live in [`FramedStream`]; sockets come
//! from a [`Connector`].

mod client;
mod config;
mod framed;
mod state;
mod stream;
mod stuffing;

pub use client::Client;
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_TIMEOUT, millis};
pub use framed::{FramedStream, bounded};
pub use state::ConnectionState;
pub use stream::{Connector, TcpConnector};
pub use stuffing::{DotStuffer, TERMINATOR};

use crate::types::{Extension, Reply};
use std::collections::HashSet;

/// Server capabilities from greeting and EHLO response.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Builds server info from the greeting; extensions start empty.
    #[must_use]
    pub fn from_greeting(greeting: &Reply) -> Self {
        // Hostname is the first word after the code
        let hostname = greeting
            .text()
            .split_whitespace()
            .next()
            .unwrap_or("unknown")
            .to_string();

        Self {
            hostname,
            extensions: HashSet::new(),
        }
    }

    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if delivery status notifications are advertised.
    #[must_use]
    pub fn supports_dsn(&self) -> bool {
        self.supports(&Extension::Dsn)
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        for ext in &self.extensions {
            if let Extension::Size(size) = ext {
                return *size;
            }
        }
        None
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::types::ReplyCode;

    #[test]
    fn test_server_info_from_greeting() {
        let greeting = Reply::new(ReplyCode::SERVICE_READY, "mx.example.com ESMTP ready");
        let info = ServerInfo::from_greeting(&greeting);
        assert_eq!(info.hostname, "mx.example.com");
        assert!(!info.supports_dsn());
    }

    #[test]
    fn test_max_message_size() {
        let mut info = ServerInfo::default();
        info.extensions.insert(Extension::parse("SIZE 35882577"));
        info.extensions.insert(Extension::Dsn);
        assert_eq!(info.max_message_size(), Some(35_882_577));
        assert!(info.supports_dsn());
    }
}
