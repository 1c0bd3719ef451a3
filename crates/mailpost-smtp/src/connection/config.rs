//! Client configuration types.

use std::time::Duration;

use serde::Deserialize;

use crate::parser::DEFAULT_TOLERANCE;

/// Default read/write timeout (three minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(180_000);

/// Protocol client configuration.
///
/// Fixed once a connection is open; see [`crate::Client::configure`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Read/write timeout applied to every network wait.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    /// Extra read attempts after a read times out.
    pub read_retries: u32,
    /// Name prefix; each client appends a unique sequence number.
    pub name: String,
    /// Use EHLO and ESMTP parameters instead of HELO.
    pub extensions: bool,
    /// Host name announced in HELO/EHLO.
    pub helo_host: String,
    /// Protocol deviations tolerated in one reply.
    pub tolerance: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            read_retries: 0,
            name: "smtp".to_string(),
            extensions: false,
            helo_host: "localhost".to_string(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Sets the read/write timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets how many times a timed-out read is retried.
    #[must_use]
    pub const fn read_retries(mut self, retries: u32) -> Self {
        self.config.read_retries = retries;
        self
    }

    /// Sets the name prefix.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Enables EHLO and ESMTP parameters.
    #[must_use]
    pub const fn extensions(mut self, on: bool) -> Self {
        self.config.extensions = on;
        self
    }

    /// Sets the host name announced in HELO/EHLO.
    #[must_use]
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.config.helo_host = host.into();
        self
    }

    /// Sets the per-reply deviation tolerance.
    #[must_use]
    pub const fn tolerance(mut self, tolerance: u32) -> Self {
        self.config.tolerance = tolerance;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Serde helpers for [`Duration`] fields written as integer milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a duration as whole milliseconds.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    #[allow(clippy::trivially_copy_pass_by_ref)] // Required by serde with= signature
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserializes whole milliseconds into a duration.
    ///
    /// # Errors
    ///
    /// Fails if the value is not an unsigned integer.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
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

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(180));
        assert_eq!(config.read_retries, 0);
        assert_eq!(config.tolerance, 5);
        assert!(!config.extensions);
        assert_eq!(config.helo_host, "localhost");
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder()
            .timeout(Duration::from_millis(250))
            .read_retries(2)
            .name("relay")
            .extensions(true)
            .helo_host("client.local")
            .tolerance(1)
            .build();

        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.read_retries, 2);
        assert_eq!(config.name, "relay");
        assert!(config.extensions);
        assert_eq!(config.tolerance, 1);
        assert_eq!(config.helo_host, "client.local");
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"timeout_ms": 1500, "extensions": true}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert!(config.extensions);
        assert_eq!(config.name, "smtp");
    }
}
