//! Error types for SMTP operations.

use std::fmt;
use std::io;

use crate::connection::ConnectionState;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Where in an exchange a timeout struck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Opening the socket.
    Connect,
    /// Sending a command or awaiting its reply.
    Reply,
    /// Streaming a DATA body.
    Body,
    /// Awaiting the reply that follows the end-of-data marker.
    DataReply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Reply => "reply",
            Self::Body => "message body",
            Self::DataReply => "post-DATA reply",
        })
    }
}

/// SMTP error types.
///
/// Protocol rejections (a well-formed reply with a failing code) are not
/// errors; they come back as [`crate::Reply`] values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation invoked in a state that does not allow it.
    #[error("{op} not allowed in state {state}")]
    InvalidState {
        /// Operation that was refused.
        op: &'static str,
        /// State the client was in.
        state: ConnectionState,
    },

    /// Stream ended before a reply was complete.
    #[error("Connection closed mid-reply")]
    ConnectionClosed,

    /// Too many malformed lines or stray carriage returns in one reply.
    #[error("Reply thrashing: {0} protocol deviations")]
    ReplyThrashing(u32),

    /// A read or write timed out.
    #[error("Timed out during {phase} after {transferred} bytes")]
    Timeout {
        /// What the client was doing.
        phase: Phase,
        /// Bytes moved before giving up.
        transferred: u64,
    },

    /// The operation was cancelled while waiting on the network.
    #[error("Operation cancelled")]
    Cancelled,

    /// Server greeted with a failing code.
    #[error("Server greeting rejected: {code} {message}")]
    Greeting {
        /// Greeting code.
        code: u16,
        /// Greeting text.
        message: String,
    },

    /// RSET was refused; the session cannot be trusted.
    #[error("RSET failed: {code} {message}")]
    ResetFailed {
        /// Reply code.
        code: u16,
        /// Reply text.
        message: String,
    },

    /// Persisted DSN text could not be parsed.
    #[error("Invalid DSN: {0}")]
    InvalidDsn(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),
}

/// Coarse classification of [`Error`] used by retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller or configuration bug; never retried.
    Precondition,
    /// Socket unusable; a fresh connection is required.
    Transport,
    /// Cancellation; always propagated verbatim.
    Cancelled,
    /// Anything else.
    Other,
}

impl Error {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidState { .. } | Self::InvalidDsn(_) | Self::InvalidAddress(_) => {
                ErrorKind::Precondition
            }
            Self::Io(_)
            | Self::ConnectionClosed
            | Self::ReplyThrashing(_)
            | Self::Timeout { .. }
            | Self::Greeting { .. }
            | Self::ResetFailed { .. } => ErrorKind::Transport,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Returns true for cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if the connection can no longer be used.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Cancelled)
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
    fn classification() {
        let precondition = Error::InvalidState {
            op: "sender",
            state: ConnectionState::Fresh,
        };
        assert_eq!(precondition.kind(), ErrorKind::Precondition);
        assert!(!precondition.is_fatal());

        assert_eq!(Error::ConnectionClosed.kind(), ErrorKind::Transport);
        assert!(Error::ReplyThrashing(6).is_fatal());
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::Cancelled.is_fatal());
    }

    #[test]
    fn timeout_message_carries_tally() {
        let err = Error::Timeout {
            phase: Phase::Body,
            transferred: 2048,
        };
        assert_eq!(
            err.to_string(),
            "Timed out during message body after 2048 bytes"
        );
    }

    #[test]
    fn invalid_state_message() {
        let err = Error::InvalidState {
            op: "recipient",
            state: ConnectionState::Bad,
        };
        assert_eq!(err.to_string(), "recipient not allowed in state BAD");
    }
}
