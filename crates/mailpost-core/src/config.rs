//! Submission configuration.

use std::time::Duration;

use mailpost_smtp::connection::millis;
use mailpost_smtp::{ClientConfig, Dsn};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How a submitter reacts to a rejected envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicy {
    /// Reconnect and replay the envelope after a rejected login, sender or
    /// recipient, up to [`SubmitConfig::connect_retries`] times.
    #[default]
    Tolerant,
    /// Hand every rejection straight back to the caller.
    Touchy,
}

/// Submission configuration.
///
/// Deserializes from a flat object; the [`ClientConfig`] keys sit next to
/// the submission keys:
///
/// ```json
/// { "host": "mx.example.com", "streaming": true, "timeout_ms": 30000,
///   "extensions": true, "dsn": "HDRS`id-1``TRUE`TRUE``" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Reuse one connection for several messages.
    pub streaming: bool,
    /// Messages sent on one connection before it is recycled.
    pub stream_max: u32,
    /// DSN attached to every submission.
    pub dsn: Option<Dsn>,
    /// Retry policy.
    pub policy: RetryPolicy,
    /// Reconnect cycles allowed per submission (tolerant policy only).
    pub connect_retries: u32,
    /// Pause between reconnect cycles.
    #[serde(rename = "retry_delay_ms", with = "millis")]
    pub retry_delay: Duration,
    /// Protocol client settings.
    #[serde(flatten)]
    pub client: ClientConfig,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 25,
            streaming: false,
            stream_max: 1000,
            dsn: None,
            policy: RetryPolicy::Tolerant,
            connect_retries: 3,
            retry_delay: Duration::from_millis(1000),
            client: ClientConfig::default(),
        }
    }
}

impl SubmitConfig {
    /// Creates a configuration with defaults for everything but the host.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> SubmitConfigBuilder {
        SubmitConfigBuilder {
            config: Self::new(host),
        }
    }

    /// Parses a JSON configuration and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serde`] on malformed JSON or [`Error::Config`] if
    /// validation fails.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.stream_max == 0 {
            return Err(Error::Config("stream_max must be at least 1".into()));
        }
        if self.client.timeout.is_zero() {
            return Err(Error::Config("timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Builder for [`SubmitConfig`].
#[derive(Debug, Clone)]
pub struct SubmitConfigBuilder {
    config: SubmitConfig,
}

impl SubmitConfigBuilder {
    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Enables connection reuse.
    #[must_use]
    pub const fn streaming(mut self, on: bool) -> Self {
        self.config.streaming = on;
        self
    }

    /// Sets the per-connection message cap.
    #[must_use]
    pub const fn stream_max(mut self, max: u32) -> Self {
        self.config.stream_max = max;
        self
    }

    /// Enables EHLO and ESMTP parameters.
    #[must_use]
    pub const fn extensions(mut self, on: bool) -> Self {
        self.config.client.extensions = on;
        self
    }

    /// Sets the DSN attached to every submission.
    #[must_use]
    pub fn dsn(mut self, dsn: Dsn) -> Self {
        self.config.dsn = Some(dsn);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn policy(mut self, policy: RetryPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Sets the reconnect budget.
    #[must_use]
    pub const fn connect_retries(mut self, retries: u32) -> Self {
        self.config.connect_retries = retries;
        self
    }

    /// Sets the pause between reconnect cycles.
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Sets the protocol client settings.
    #[must_use]
    pub fn client(mut self, client: ClientConfig) -> Self {
        self.config.client = client;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> SubmitConfig {
        self.config
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
        let config = SubmitConfig::new("mx.example.com");
        assert_eq!(config.port, 25);
        assert_eq!(config.stream_max, 1000);
        assert_eq!(config.connect_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.policy, RetryPolicy::Tolerant);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SubmitConfig::builder("mx.example.com")
            .port(2525)
            .streaming(true)
            .stream_max(10)
            .extensions(true)
            .policy(RetryPolicy::Touchy)
            .connect_retries(0)
            .build();

        assert_eq!(config.port, 2525);
        assert!(config.streaming);
        assert_eq!(config.stream_max, 10);
        assert!(config.client.extensions);
        assert_eq!(config.policy, RetryPolicy::Touchy);
        assert_eq!(config.connect_retries, 0);
    }

    #[test]
    fn test_from_json_flat() {
        let config = SubmitConfig::from_json(
            r#"{
                "host": "mx.example.com",
                "port": 587,
                "streaming": true,
                "policy": "touchy",
                "retry_delay_ms": 250,
                "timeout_ms": 30000,
                "read_retries": 2,
                "extensions": true,
                "dsn": "HDRS`id-1``TRUE`TRUE``"
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 587);
        assert_eq!(config.policy, RetryPolicy::Touchy);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.client.timeout, Duration::from_secs(30));
        assert_eq!(config.client.read_retries, 2);
        assert!(config.client.extensions);

        let dsn = config.dsn.unwrap();
        assert_eq!(dsn.ret(), Some("HDRS"));
        assert_eq!(dsn.envid(), Some("id-1"));
        assert!(dsn.notify_success());
        assert!(dsn.notify_failure());
        assert!(!dsn.notify_delay());
    }

    #[test]
    fn test_from_json_rejects_bad_dsn() {
        let err = SubmitConfig::from_json(r#"{"dsn": "HDRS`only`three"}"#).unwrap_err();
        assert!(matches!(err, Error::Serde(_)));
    }

    #[test]
    fn test_validate() {
        let config = SubmitConfig::builder("mx").stream_max(0).build();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = SubmitConfig::new(" ");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
