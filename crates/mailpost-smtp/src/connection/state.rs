//! Connection state machine.
//!
//! ```text
//! FRESH ─connect→ CONNECTED ─login(250)→ LOGIN_COMPLETE ─sender→ MAILFROM_DONE ─recipient→ RCPTTO_DONE
//!                                              ↑                                              │
//!                                              └──────────────────── reset ───────────────────┘
//! ```
//!
//! `BAD` is a trap: entered on transport failure or cancellation, left only
//! through `disconnect`.

use std::fmt;

/// Where a client is in its session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection.
    #[default]
    Fresh,
    /// Socket open, greeting received.
    Connected,
    /// HELO/EHLO accepted.
    LoginComplete,
    /// Sender accepted.
    MailFromDone,
    /// Recipient accepted; DATA may follow.
    RcptToDone,
    /// Byte stream desynchronized or interrupted.
    Bad,
}

impl ConnectionState {
    /// True for every state except `FRESH` and `BAD`.
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Fresh | Self::Bad)
    }

    /// True while a mail transaction may be reset.
    #[must_use]
    pub const fn in_session(self) -> bool {
        matches!(
            self,
            Self::LoginComplete | Self::MailFromDone | Self::RcptToDone
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fresh => "FRESH",
            Self::Connected => "CONNECTED",
            Self::LoginComplete => "LOGIN_COMPLETE",
            Self::MailFromDone => "MAILFROM_DONE",
            Self::RcptToDone => "RCPTTO_DONE",
            Self::Bad => "BAD",
        })
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
    fn test_default_is_fresh() {
        assert_eq!(ConnectionState::default(), ConnectionState::Fresh);
    }

    #[test]
    fn test_is_live() {
        assert!(!ConnectionState::Fresh.is_live());
        assert!(!ConnectionState::Bad.is_live());
        assert!(ConnectionState::Connected.is_live());
        assert!(ConnectionState::LoginComplete.is_live());
        assert!(ConnectionState::MailFromDone.is_live());
        assert!(ConnectionState::RcptToDone.is_live());
    }

    #[test]
    fn test_in_session() {
        assert!(!ConnectionState::Connected.in_session());
        assert!(ConnectionState::RcptToDone.in_session());
        assert!(!ConnectionState::Bad.in_session());
    }
}
