//! Structured result of a measured submission.

use std::time::Instant;

use chrono::{DateTime, Utc};
use mailpost_smtp::{Phase, Reply};
use serde::Serialize;

use crate::Error;

/// Whether a submission succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// Message accepted after DATA.
    Pass,
    /// Server rejected the submission.
    Fail,
    /// Anything else went wrong.
    Exception,
}

/// Counters for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metrics {
    /// Wall-clock duration.
    pub elapsed_ms: u64,
    /// Bytes put on the wire by DATA.
    pub bytes: u64,
    /// 1 on pass.
    pub pass: u32,
    /// 1 on fail.
    pub fail: u32,
    /// 1 on exception.
    pub exception: u32,
    /// Always 1.
    pub cases: u32,
}

/// Identifying details of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attributes {
    /// DSN envelope id, or `<client-name>#<n>`.
    pub correlation_id: String,
    /// Final reply code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Server text of a rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_text: Option<String>,
    /// Error description of an exception.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome record of [`crate::Submitter::measured_submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    /// Pass, fail or exception.
    pub kind: OutcomeKind,
    /// When the submission started.
    pub started_at: DateTime<Utc>,
    /// Counters.
    pub metrics: Metrics,
    /// Identifying details.
    pub attributes: Attributes,
}

/// True if `reply` is the server accepting a message body.
#[must_use]
pub const fn is_delivered(reply: &Reply) -> bool {
    reply.size().is_some() && !reply.is_failure()
}

impl Outcome {
    /// Classifies a finished submission.
    #[must_use]
    pub fn from_reply(stopwatch: &Stopwatch, correlation_id: String, reply: &Reply) -> Self {
        let delivered = is_delivered(reply);
        let (kind, server_text) = if delivered {
            (OutcomeKind::Pass, None)
        } else {
            (OutcomeKind::Fail, Some(reply.text().to_string()))
        };

        Self {
            kind,
            started_at: stopwatch.started_at(),
            metrics: Metrics::new(kind, stopwatch.elapsed_ms(), reply.size().unwrap_or(0)),
            attributes: Attributes {
                correlation_id,
                status: Some(reply.code().as_u16()),
                server_text,
                error: None,
            },
        }
    }

    /// Records a submission that ended in an error.
    ///
    /// A timeout while sending the body or awaiting its reply still reports
    /// the bytes that made it onto the wire.
    #[must_use]
    pub fn from_error(stopwatch: &Stopwatch, correlation_id: String, error: &Error) -> Self {
        let last_reply = match error {
            Error::Smtp { last_reply, .. } => last_reply.as_ref(),
            _ => None,
        };
        let bytes = match error.smtp() {
            Some(mailpost_smtp::Error::Timeout {
                phase: Phase::Body | Phase::DataReply,
                transferred,
            }) => *transferred,
            _ => 0,
        };

        Self {
            kind: OutcomeKind::Exception,
            started_at: stopwatch.started_at(),
            metrics: Metrics::new(OutcomeKind::Exception, stopwatch.elapsed_ms(), bytes),
            attributes: Attributes {
                correlation_id,
                status: last_reply.map(|reply| reply.code().as_u16()),
                server_text: None,
                error: Some(error.to_string()),
            },
        }
    }

    /// True for a pass.
    #[must_use]
    pub fn is_pass(&self) -> bool {
        self.kind == OutcomeKind::Pass
    }
}

impl Metrics {
    fn new(kind: OutcomeKind, elapsed_ms: u64, bytes: u64) -> Self {
        Self {
            elapsed_ms,
            bytes,
            pass: u32::from(kind == OutcomeKind::Pass),
            fail: u32::from(kind == OutcomeKind::Fail),
            exception: u32::from(kind == OutcomeKind::Exception),
            cases: 1,
        }
    }
}

/// Wall-clock start plus a monotonic timer.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Stopwatch {
    /// Starts timing now.
    #[must_use]
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Wall-clock start time.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Milliseconds since start.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
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
    use mailpost_smtp::ReplyCode;

    #[test]
    fn test_pass_outcome() {
        let reply = Reply::new(ReplyCode::OK, "queued").with_size(512);
        let outcome = Outcome::from_reply(&Stopwatch::start(), "id-1".into(), &reply);

        assert!(outcome.is_pass());
        assert_eq!(outcome.metrics.bytes, 512);
        assert_eq!(outcome.metrics.pass, 1);
        assert_eq!(outcome.metrics.fail, 0);
        assert_eq!(outcome.metrics.cases, 1);
        assert_eq!(outcome.attributes.status, Some(250));
        assert_eq!(outcome.attributes.server_text, None);
    }

    #[test]
    fn test_rejection_is_fail() {
        let reply = Reply::new(ReplyCode::MAILBOX_UNAVAILABLE, "no such user");
        let outcome = Outcome::from_reply(&Stopwatch::start(), "id-2".into(), &reply);

        assert_eq!(outcome.kind, OutcomeKind::Fail);
        assert_eq!(outcome.metrics.fail, 1);
        assert_eq!(outcome.attributes.server_text.as_deref(), Some("no such user"));
    }

    #[test]
    fn test_success_code_without_body_is_fail() {
        // A 250 to DATA means nothing was sent.
        let reply = Reply::new(ReplyCode::OK, "odd");
        assert!(!is_delivered(&reply));
    }

    #[test]
    fn test_error_outcome_keeps_last_status() {
        let error = Error::Smtp {
            client: "smtp-9".into(),
            last_reply: Some(Reply::new(ReplyCode::START_DATA, "go ahead")),
            source: mailpost_smtp::Error::ConnectionClosed,
        };
        let outcome = Outcome::from_error(&Stopwatch::start(), "id-3".into(), &error);

        assert_eq!(outcome.kind, OutcomeKind::Exception);
        assert_eq!(outcome.metrics.exception, 1);
        assert_eq!(outcome.attributes.status, Some(354));
        assert!(outcome.attributes.error.unwrap().contains("smtp-9"));
    }

    #[test]
    fn test_body_timeout_reports_partial_bytes() {
        let timeout = |phase| Error::Smtp {
            client: "smtp-5".into(),
            last_reply: None,
            source: mailpost_smtp::Error::Timeout {
                phase,
                transferred: 4096,
            },
        };

        for phase in [Phase::Body, Phase::DataReply] {
            let outcome = Outcome::from_error(&Stopwatch::start(), "id-5".into(), &timeout(phase));
            assert_eq!(outcome.metrics.bytes, 4096, "{phase:?}");
        }
        let outcome = Outcome::from_error(&Stopwatch::start(), "id-5".into(), &timeout(Phase::Reply));
        assert_eq!(outcome.metrics.bytes, 0);
    }

    #[test]
    fn test_serializes_to_json() {
        let reply = Reply::new(ReplyCode::OK, "queued").with_size(10);
        let outcome = Outcome::from_reply(&Stopwatch::start(), "id-4".into(), &reply);
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["kind"], "pass");
        assert_eq!(json["metrics"]["bytes"], 10);
        assert_eq!(json["attributes"]["correlation_id"], "id-4");
        assert!(json["attributes"].get("server_text").is_none());
        assert!(json["started_at"].is_string());
    }
}
