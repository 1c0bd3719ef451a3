//! Error types for the core library.

use mailpost_smtp::Reply;
use thiserror::Error;

/// Errors that can occur in submission.
#[derive(Debug, Error)]
pub enum Error {
    /// SMTP operation failed.
    #[error("{client}: {source}{}", last_reply_suffix(.last_reply.as_ref()))]
    Smtp {
        /// Diagnostic name of the client that failed.
        client: String,
        /// Last reply the client received, if any.
        last_reply: Option<Reply>,
        /// Underlying protocol error.
        source: mailpost_smtp::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn last_reply_suffix(reply: Option<&Reply>) -> String {
    reply.map_or_else(String::new, |reply| format!(" (last reply: {reply})"))
}

impl Error {
    /// Returns the underlying protocol error, if any.
    #[must_use]
    pub const fn smtp(&self) -> Option<&mailpost_smtp::Error> {
        match self {
            Self::Smtp { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Returns true if this error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.smtp(), Some(e) if e.is_cancelled())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

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
    use mailpost_smtp::ReplyCode;

    #[test]
    fn test_message_carries_context() {
        let err = Error::Smtp {
            client: "smtp-3".to_string(),
            last_reply: Some(Reply::new(ReplyCode::OK, "sender ok")),
            source: mailpost_smtp::Error::ConnectionClosed,
        };
        assert_eq!(
            err.to_string(),
            "smtp-3: Connection closed mid-reply (last reply: 250 sender ok)"
        );
    }

    #[test]
    fn test_cancellation_detected_through_wrapper() {
        let err = Error::Smtp {
            client: "smtp-1".to_string(),
            last_reply: None,
            source: mailpost_smtp::Error::Cancelled,
        };
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "smtp-1: Operation cancelled");
        assert!(!Error::Config("x".into()).is_cancelled());
    }
}
