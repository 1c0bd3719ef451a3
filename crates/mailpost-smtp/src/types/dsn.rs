//! Delivery Status Notification parameters (RFC 3461).
//!
//! A [`Dsn`] travels in two shapes: the compact persisted line of seven
//! back-tick separated fields
//!
//! ```text
//! RET`ENVID`ORCPT`SUCCESS`FAILURE`DELAY`NEVER
//! ```
//!
//! where flags are the literal text `TRUE` or empty, and the ESMTP
//! parameters appended to `MAIL FROM` and `RCPT TO`. Parameter values go on
//! the wire as xtext, so spaces, `+`, `=` and control characters never
//! reach the command line raw.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const FIELD_COUNT: usize = 7;
const SEPARATOR: char = '`';
const TRUE: &str = "TRUE";

/// DSN parameters for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[allow(clippy::struct_excessive_bools)]
pub struct Dsn {
    ret: Option<String>,
    envid: Option<String>,
    orcpt: Option<String>,
    notify_success: bool,
    notify_failure: bool,
    notify_delay: bool,
    notify_never: bool,
}

impl Dsn {
    /// Starts building a DSN.
    #[must_use]
    pub fn builder() -> DsnBuilder {
        DsnBuilder::default()
    }

    /// Return-content policy (`FULL` or `HDRS`).
    #[must_use]
    pub fn ret(&self) -> Option<&str> {
        self.ret.as_deref()
    }

    /// Envelope identifier used to correlate notifications.
    #[must_use]
    pub fn envid(&self) -> Option<&str> {
        self.envid.as_deref()
    }

    /// Original recipient address.
    #[must_use]
    pub fn orcpt(&self) -> Option<&str> {
        self.orcpt.as_deref()
    }

    /// Requests notification on successful delivery.
    #[must_use]
    pub const fn notify_success(&self) -> bool {
        self.notify_success
    }

    /// Requests notification on failed delivery.
    #[must_use]
    pub const fn notify_failure(&self) -> bool {
        self.notify_failure
    }

    /// Requests notification on delayed delivery.
    #[must_use]
    pub const fn notify_delay(&self) -> bool {
        self.notify_delay
    }

    /// Requests that no notification be sent.
    #[must_use]
    pub const fn notify_never(&self) -> bool {
        self.notify_never
    }

    /// Renders the `MAIL FROM` parameters, e.g. `RET=HDRS ENVID=abc`, with
    /// values xtext-encoded.
    ///
    /// Empty when neither field is set.
    #[must_use]
    pub fn render_from(&self) -> String {
        let mut params = Vec::with_capacity(2);
        if let Some(ret) = &self.ret {
            params.push(format!("RET={}", xtext(ret)));
        }
        if let Some(envid) = &self.envid {
            params.push(format!("ENVID={}", xtext(envid)));
        }
        params.join(" ")
    }

    /// Renders the `RCPT TO` parameters, e.g. `NOTIFY=SUCCESS,DELAY ORCPT=rfc822;a@b`.
    ///
    /// Empty when no flag and no original recipient is set.
    #[must_use]
    pub fn render_recipient(&self) -> String {
        let notify: Vec<&str> = [
            (self.notify_success, "SUCCESS"),
            (self.notify_failure, "FAILURE"),
            (self.notify_delay, "DELAY"),
            (self.notify_never, "NEVER"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect();

        let mut params = Vec::with_capacity(2);
        if !notify.is_empty() {
            params.push(format!("NOTIFY={}", notify.join(",")));
        }
        if let Some(orcpt) = &self.orcpt {
            params.push(format!("ORCPT=rfc822;{}", xtext(orcpt)));
        }
        params.join(" ")
    }

    /// Renders the persisted seven-field form.
    #[must_use]
    pub fn to_persisted(&self) -> String {
        self.to_string()
    }
}

/// Encodes `value` as xtext (RFC 3461 section 4): printable ASCII other
/// than `+` and `=` passes through, every other byte becomes `+XX`.
fn xtext(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_graphic() && byte != b'+' && byte != b'=' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "+{byte:02X}");
        }
    }
    out
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = |field: &Option<String>| field.clone().unwrap_or_default();
        let flag = |set: bool| if set { TRUE } else { "" };
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
            text(&self.ret),
            text(&self.envid),
            text(&self.orcpt),
            flag(self.notify_success),
            flag(self.notify_failure),
            flag(self.notify_delay),
            flag(self.notify_never),
        )
    }
}

impl FromStr for Dsn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(SEPARATOR).collect();
        if fields.len() != FIELD_COUNT {
            return Err(Error::InvalidDsn(format!(
                "expected {FIELD_COUNT} fields, found {}",
                fields.len()
            )));
        }

        let text = |field: &str| (!field.is_empty()).then(|| field.to_string());
        let flag = |field: &str| field.eq_ignore_ascii_case(TRUE);

        Ok(Self {
            ret: text(fields[0]),
            envid: text(fields[1]),
            orcpt: text(fields[2]),
            notify_success: flag(fields[3]),
            notify_failure: flag(fields[4]),
            notify_delay: flag(fields[5]),
            notify_never: flag(fields[6]),
        })
    }
}

impl TryFrom<String> for Dsn {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Dsn> for String {
    fn from(dsn: Dsn) -> Self {
        dsn.to_string()
    }
}

/// Builder for [`Dsn`].
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct DsnBuilder {
    inner: Dsn,
}

impl DsnBuilder {
    /// Sets the return-content policy.
    #[must_use]
    pub fn ret(mut self, ret: impl Into<String>) -> Self {
        self.inner.ret = Some(ret.into());
        self
    }

    /// Sets the envelope identifier.
    #[must_use]
    pub fn envid(mut self, envid: impl Into<String>) -> Self {
        self.inner.envid = Some(envid.into());
        self
    }

    /// Sets the original recipient.
    #[must_use]
    pub fn orcpt(mut self, orcpt: impl Into<String>) -> Self {
        self.inner.orcpt = Some(orcpt.into());
        self
    }

    /// Sets the SUCCESS notify flag.
    #[must_use]
    pub const fn notify_success(mut self, on: bool) -> Self {
        self.inner.notify_success = on;
        self
    }

    /// Sets the FAILURE notify flag.
    #[must_use]
    pub const fn notify_failure(mut self, on: bool) -> Self {
        self.inner.notify_failure = on;
        self
    }

    /// Sets the DELAY notify flag.
    #[must_use]
    pub const fn notify_delay(mut self, on: bool) -> Self {
        self.inner.notify_delay = on;
        self
    }

    /// Sets the NEVER notify flag.
    #[must_use]
    pub const fn notify_never(mut self, on: bool) -> Self {
        self.inner.notify_never = on;
        self
    }

    /// Builds the DSN.
    #[must_use]
    pub fn build(self) -> Dsn {
        self.inner
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
    use proptest::prelude::*;

    #[test]
    fn parse_full_line() {
        let dsn: Dsn = "HDRS`batch-7`bob@example.com`TRUE`true``TRUE".parse().unwrap();
        assert_eq!(dsn.ret(), Some("HDRS"));
        assert_eq!(dsn.envid(), Some("batch-7"));
        assert_eq!(dsn.orcpt(), Some("bob@example.com"));
        assert!(dsn.notify_success());
        assert!(dsn.notify_failure());
        assert!(!dsn.notify_delay());
        assert!(dsn.notify_never());
    }

    #[test]
    fn empty_fields_are_unset() {
        let dsn: Dsn = "``````".parse().unwrap();
        assert_eq!(dsn, Dsn::default());
        assert_eq!(dsn.render_from(), "");
        assert_eq!(dsn.render_recipient(), "");
    }

    #[test]
    fn non_true_flag_text_is_false() {
        let dsn: Dsn = "```yes`1`false`".parse().unwrap();
        assert!(!dsn.notify_success());
        assert!(!dsn.notify_failure());
        assert!(!dsn.notify_delay());
    }

    #[test]
    fn too_few_fields_rejected() {
        let err = "FULL`id`rcpt".parse::<Dsn>().unwrap_err();
        assert!(matches!(err, Error::InvalidDsn(_)));
    }

    #[test]
    fn too_many_fields_rejected() {
        assert!("```````".parse::<Dsn>().is_err());
    }

    #[test]
    fn render_from_params() {
        let dsn = Dsn::builder().ret("FULL").envid("QQ314159").build();
        assert_eq!(dsn.render_from(), "RET=FULL ENVID=QQ314159");

        let only_envid = Dsn::builder().envid("x").build();
        assert_eq!(only_envid.render_from(), "ENVID=x");
    }

    #[test]
    fn render_recipient_params() {
        let dsn = Dsn::builder()
            .notify_success(true)
            .notify_delay(true)
            .orcpt("bob@example.com")
            .build();
        assert_eq!(
            dsn.render_recipient(),
            "NOTIFY=SUCCESS,DELAY ORCPT=rfc822;bob@example.com"
        );
    }

    #[test]
    fn params_are_xtext_encoded() {
        let dsn = Dsn::builder()
            .envid("x\r\nRSET")
            .orcpt("a+b=c d@example.com")
            .build();
        assert_eq!(dsn.render_from(), "ENVID=x+0D+0ARSET");
        assert_eq!(
            dsn.render_recipient(),
            "ORCPT=rfc822;a+2Bb+3Dc+20d@example.com"
        );
    }

    #[test]
    fn xtext_encodes_non_ascii_bytes() {
        assert_eq!(xtext("é"), "+C3+A9");
        assert_eq!(xtext("plain-id.1"), "plain-id.1");
    }

    #[test]
    fn render_recipient_orcpt_only() {
        let dsn = Dsn::builder().orcpt("a@b.c").build();
        assert_eq!(dsn.render_recipient(), "ORCPT=rfc822;a@b.c");
    }

    #[test]
    fn persisted_form() {
        let dsn = Dsn::builder().ret("HDRS").notify_failure(true).build();
        assert_eq!(dsn.to_persisted(), "HDRS````TRUE``");
    }

    #[test]
    fn serde_uses_persisted_form() {
        let dsn = Dsn::builder().envid("e1").notify_never(true).build();
        let json = serde_json::to_string(&dsn).unwrap();
        assert_eq!(json, "\"`e1`````TRUE\"");
        let back: Dsn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dsn);
    }

    fn field() -> impl Strategy<Value = Option<String>> {
        proptest::option::of("[A-Za-z0-9@.+=;-]{1,16}")
    }

    proptest! {
        #[test]
        fn persisted_round_trip(
            ret in field(),
            envid in field(),
            orcpt in field(),
            success in any::<bool>(),
            failure in any::<bool>(),
            delay in any::<bool>(),
            never in any::<bool>(),
        ) {
            let dsn = Dsn {
                ret,
                envid,
                orcpt,
                notify_success: success,
                notify_failure: failure,
                notify_delay: delay,
                notify_never: never,
            };
            let parsed: Dsn = dsn.to_persisted().parse().unwrap();
            prop_assert_eq!(parsed, dsn);
        }

        #[test]
        fn rendered_params_stay_on_one_line(envid in "(?s).{0,24}", orcpt in "(?s).{0,24}") {
            let dsn = Dsn::builder().envid(envid).orcpt(orcpt).notify_delay(true).build();
            let from = dsn.render_from();
            let rcpt = dsn.render_recipient();
            prop_assert!(from.bytes().all(|b| b.is_ascii_graphic()));
            prop_assert_eq!(rcpt.split(' ').count(), 2);
            prop_assert!(rcpt.bytes().all(|b| b == b' ' || b.is_ascii_graphic()));
        }
    }
}
