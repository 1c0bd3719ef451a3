//! # mailpost-core
//!
//! Message submission on top of `mailpost-smtp`.
//!
//! This crate provides:
//! - **Submitter** - connects lazily, runs the envelope and DATA, and keeps
//!   or recycles the connection between messages
//! - **Retry policies** - tolerant (reconnect and replay a rejected envelope)
//!   or touchy (hand every rejection back)
//! - **Measured submissions** - pass/fail/exception outcome records with
//!   timing and byte counts, serializable to JSON
//! - **Configuration** - one flat JSON document for submission and client
//!   settings

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod outcome;
pub mod submit;

pub use config::{RetryPolicy, SubmitConfig, SubmitConfigBuilder};
pub use error::{Error, Result};
pub use outcome::{Attributes, Metrics, Outcome, OutcomeKind, Stopwatch, is_delivered};
pub use submit::{Stage, Submitter};
