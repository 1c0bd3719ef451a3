//! SMTP reply types.

use std::fmt;

use serde::Serialize;

/// SMTP reply from server.
///
/// A reply is immutable once decoded. The only value attached afterwards is
/// the byte count of a completed DATA transaction, which [`Reply::with_size`]
/// sets by consuming the reply.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Reply {
    code: ReplyCode,
    text: String,
    broken: bool,
    size: Option<u64>,
}

impl Reply {
    /// Creates a new, well-formed reply.
    #[must_use]
    pub fn new(code: ReplyCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
            broken: false,
            size: None,
        }
    }

    /// Creates a reply the decoder could only partially make sense of.
    #[must_use]
    pub fn broken(code: ReplyCode, text: impl Into<String>) -> Self {
        Self {
            broken: true,
            ..Self::new(code, text)
        }
    }

    /// Attaches the number of bytes transmitted by a DATA transaction.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Reply code.
    #[must_use]
    pub const fn code(&self) -> ReplyCode {
        self.code
    }

    /// Free text following the status code, without the `DDD-`/`DDD ` prefix.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// True if the decoder hit malformed input while producing this reply.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.broken
    }

    /// Bytes transmitted, set only on the reply that completes a DATA transaction.
    #[must_use]
    pub const fn size(&self) -> Option<u64> {
        self.size
    }

    /// Returns true if this is a success reply (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient_error(&self) -> bool {
        self.code.is_transient()
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code.is_permanent()
    }

    /// Returns true if the reply counts as a failure for transaction policy.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.code.is_failure()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }

    /// Returns true if the code is at or above [`Self::FAIL_THRESHOLD`].
    ///
    /// Codes below 100 (including [`Self::ABORT`]) never come from a
    /// conforming server and are treated as failures too.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        self.0 >= Self::FAIL_THRESHOLD.0 || self.0 < 100
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

// Common reply codes
impl ReplyCode {
    /// Sentinel for "no reply received".
    pub const ABORT: Self = Self(0);
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 251 User not local; will forward
    pub const FORWARD: Self = Self(251);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// Lowest code treated as a failure, applied to every transaction step.
    pub const FAIL_THRESHOLD: Self = Self::SERVICE_UNAVAILABLE;
    /// 450 Mailbox unavailable (busy)
    pub const MAILBOX_BUSY: Self = Self(450);
    /// 451 Local error in processing
    pub const LOCAL_ERROR: Self = Self(451);
    /// 452 Insufficient system storage
    pub const INSUFFICIENT_STORAGE: Self = Self(452);
    /// 500 Syntax error, command unrecognized
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 501 Syntax error in parameters or arguments
    pub const PARAMETER_ERROR: Self = Self(501);
    /// 502 Command not implemented
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// 503 Bad sequence of commands
    pub const BAD_SEQUENCE: Self = Self(503);
    /// 550 Mailbox unavailable (not found, access denied)
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 552 Exceeded storage allocation
    pub const EXCEEDED_STORAGE: Self = Self(552);
    /// 554 Transaction failed
    pub const TRANSACTION_FAILED: Self = Self(554);
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

    mod reply_code_tests {
        use super::*;

        #[test]
        fn success_codes() {
            assert!(ReplyCode::OK.is_success());
            assert!(ReplyCode::SERVICE_READY.is_success());
            assert!(ReplyCode::CLOSING.is_success());
            assert!(ReplyCode::FORWARD.is_success());
        }

        #[test]
        fn intermediate_codes() {
            assert!(!ReplyCode::START_DATA.is_failure());
        }

        #[test]
        fn transient_errors() {
            assert!(ReplyCode::MAILBOX_BUSY.is_transient());
            assert!(ReplyCode::SERVICE_UNAVAILABLE.is_transient());
            assert!(ReplyCode::LOCAL_ERROR.is_transient());
        }

        #[test]
        fn permanent_errors() {
            assert!(ReplyCode::MAILBOX_UNAVAILABLE.is_permanent());
            assert!(ReplyCode::SYNTAX_ERROR.is_permanent());
            assert!(ReplyCode::BAD_SEQUENCE.is_permanent());
        }

        #[test]
        fn fail_threshold_boundary() {
            assert!(!ReplyCode::new(420).is_failure());
            assert!(ReplyCode::new(421).is_failure());
            assert!(ReplyCode::new(550).is_failure());
            assert!(!ReplyCode::OK.is_failure());
        }

        #[test]
        fn abort_is_failure() {
            assert_eq!(ReplyCode::default(), ReplyCode::ABORT);
            assert!(ReplyCode::ABORT.is_failure());
            assert!(ReplyCode::new(25).is_failure());
        }

        #[test]
        fn display() {
            assert_eq!(format!("{}", ReplyCode::OK), "250");
            assert_eq!(format!("{}", ReplyCode::ABORT), "000");
        }

        #[test]
        fn ordering() {
            assert!(ReplyCode::OK < ReplyCode::MAILBOX_BUSY);
            assert!(ReplyCode::MAILBOX_BUSY < ReplyCode::MAILBOX_UNAVAILABLE);
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn new() {
            let reply = Reply::new(ReplyCode::OK, "OK");
            assert_eq!(reply.code(), ReplyCode::OK);
            assert_eq!(reply.text(), "OK");
            assert!(!reply.is_broken());
            assert_eq!(reply.size(), None);
        }

        #[test]
        fn default_is_abort() {
            let reply = Reply::default();
            assert_eq!(reply.code(), ReplyCode::ABORT);
            assert!(reply.is_failure());
        }

        #[test]
        fn broken() {
            let reply = Reply::broken(ReplyCode::ABORT, "garbage");
            assert!(reply.is_broken());
        }

        #[test]
        fn with_size() {
            let reply = Reply::new(ReplyCode::OK, "queued").with_size(42);
            assert_eq!(reply.size(), Some(42));
        }

        #[test]
        fn classification() {
            let busy = Reply::new(ReplyCode::MAILBOX_BUSY, "Busy");
            assert!(busy.is_transient_error());
            assert!(busy.is_failure());

            let gone = Reply::new(ReplyCode::MAILBOX_UNAVAILABLE, "Not found");
            assert!(gone.is_permanent_error());
            assert!(!gone.is_success());
        }

        #[test]
        fn display() {
            let reply = Reply::new(ReplyCode::OK, "2.0.0 Ok");
            assert_eq!(reply.to_string(), "250 2.0.0 Ok");
        }
    }
}
