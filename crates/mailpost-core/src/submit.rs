//! Submission manager.
//!
//! A [`Submitter`] owns one protocol client and pushes messages through it:
//! connect and log in on demand, run the envelope and DATA, then either
//! recycle the connection or keep it warm with `RSET` for the next message.
//!
//! ## Example
//!
//! ```ignore
//! use mailpost_core::{SubmitConfig, Submitter};
//! use mailpost_smtp::Address;
//!
//! let config = SubmitConfig::builder("mx.example.com").streaming(true).build();
//! let mut submitter = Submitter::new(config)?;
//!
//! let from = Address::new("sender@example.com")?;
//! let to = Address::new("recipient@example.com")?;
//! let mut bodies = [Some(&b"Subject: hi\r\n\r\nhello\r\n"[..])];
//!
//! let outcome = submitter.measured_submit(&from, &to, &mut bodies).await?;
//! println!("{}", serde_json::to_string(&outcome)?);
//! submitter.quit().await;
//! ```

use mailpost_smtp::{
    Address, CancelToken, Client, ConnectionState, Connector, Reply, TcpConnector,
};
use tokio::io::AsyncRead;

use crate::config::{RetryPolicy, SubmitConfig};
use crate::outcome::{Outcome, Stopwatch, is_delivered};
use crate::{Error, Result};

/// Protocol step a rejection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// HELO/EHLO.
    Login,
    /// MAIL FROM.
    Sender,
    /// RCPT TO.
    Recipient,
    /// DATA, the body, or the post-DATA reply.
    Data,
}

impl Stage {
    /// True for the steps a tolerant submitter replays after reconnecting.
    /// No body has been read yet at these steps.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Data)
    }
}

/// How one pass through the protocol ended.
#[derive(Debug)]
enum Step {
    Delivered(Reply),
    Rejected { stage: Stage, reply: Reply },
}

/// Submission manager.
pub struct Submitter<C: Connector = TcpConnector> {
    config: SubmitConfig,
    client: Client<C>,
    cancel: CancelToken,
    stream_sent: u32,
    submissions: u64,
}

impl<C: Connector> std::fmt::Debug for Submitter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submitter")
            .field("client", &self.client)
            .field("policy", &self.config.policy)
            .field("stream_sent", &self.stream_sent)
            .field("submissions", &self.submissions)
            .finish_non_exhaustive()
    }
}

impl Submitter<TcpConnector> {
    /// Creates a submitter that connects over TCP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: SubmitConfig) -> Result<Self> {
        Self::with_connector(config, TcpConnector)
    }
}

impl<C: Connector> Submitter<C> {
    /// Creates a submitter that opens streams through `connector`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn with_connector(config: SubmitConfig, connector: C) -> Result<Self> {
        config.validate()?;
        let client = Client::with_connector(config.client.clone(), connector);
        Ok(Self {
            config,
            client,
            cancel: CancelToken::never(),
            stream_sent: 0,
            submissions: 0,
        })
    }

    /// Sets the cancellation token, shared with the client.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.client = self.client.with_cancel(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// The protocol client.
    #[must_use]
    pub const fn client(&self) -> &Client<C> {
        &self.client
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SubmitConfig {
        &self.config
    }

    /// Messages counted against the current connection.
    #[must_use]
    pub const fn stream_sent(&self) -> u32 {
        self.stream_sent
    }

    /// Submits one message.
    ///
    /// Returns the last meaningful reply: the post-DATA reply on success,
    /// otherwise the rejection that ended the attempt. Use
    /// [`crate::is_delivered`] to tell them apart.
    ///
    /// # Errors
    ///
    /// Precondition, transport and cancellation errors. Cancellation
    /// returns at once and leaves the client `BAD`.
    pub async fn submit<R>(
        &mut self,
        sender: &Address,
        recipient: &Address,
        bodies: &mut [Option<R>],
    ) -> Result<Reply>
    where
        R: AsyncRead + Unpin,
    {
        self.submissions += 1;
        let result = match self.config.policy {
            RetryPolicy::Tolerant => self.submit_tolerant(sender, recipient, bodies).await,
            RetryPolicy::Touchy => self
                .attempt(sender, recipient, bodies)
                .await
                .map(Step::into_reply),
        };

        if let Err(e) = &result
            && e.is_cancelled()
        {
            return result;
        }

        self.finish().await;
        result
    }

    /// Submits one message and reports a structured outcome.
    ///
    /// # Errors
    ///
    /// Only cancellation; every other failure is captured in the outcome.
    pub async fn measured_submit<R>(
        &mut self,
        sender: &Address,
        recipient: &Address,
        bodies: &mut [Option<R>],
    ) -> Result<Outcome>
    where
        R: AsyncRead + Unpin,
    {
        let stopwatch = Stopwatch::start();
        let result = self.submit(sender, recipient, bodies).await;
        let correlation_id = self.correlation_id();

        let outcome = match result {
            Ok(reply) => Outcome::from_reply(&stopwatch, correlation_id, &reply),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => Outcome::from_error(&stopwatch, correlation_id, &e),
        };
        tracing::info!(
            client = %self.client.name(),
            kind = ?outcome.kind,
            elapsed_ms = outcome.metrics.elapsed_ms,
            bytes = outcome.metrics.bytes,
            "submission finished"
        );
        Ok(outcome)
    }

    /// Drops the connection and resets the stream counter.
    pub fn disconnect(&mut self) {
        self.client.disconnect();
        self.stream_sent = 0;
    }

    /// Says goodbye with `QUIT` if connected, then disconnects.
    pub async fn quit(&mut self) {
        if self.client.state().is_live()
            && let Err(e) = self.client.done().await
        {
            tracing::warn!(client = %self.client.name(), ?e, "QUIT failed");
        }
        self.disconnect();
    }

    async fn submit_tolerant<R>(
        &mut self,
        sender: &Address,
        recipient: &Address,
        bodies: &mut [Option<R>],
    ) -> Result<Reply>
    where
        R: AsyncRead + Unpin,
    {
        let mut attempt = 0;
        loop {
            match self.attempt(sender, recipient, bodies).await? {
                Step::Rejected { stage, reply }
                    if stage.is_retryable() && attempt < self.config.connect_retries =>
                {
                    attempt += 1;
                    tracing::warn!(
                        client = %self.client.name(),
                        ?stage,
                        code = %reply.code(),
                        attempt,
                        "rejected, reconnecting"
                    );
                    self.client.disconnect();
                    self.pause().await?;
                }
                step => return Ok(step.into_reply()),
            }
        }
    }

    /// One pass: connect and log in if needed, then envelope and DATA.
    async fn attempt<R>(
        &mut self,
        sender: &Address,
        recipient: &Address,
        bodies: &mut [Option<R>],
    ) -> Result<Step>
    where
        R: AsyncRead + Unpin,
    {
        if let Some(reply) = self.ensure_session().await? {
            return Ok(Step::Rejected {
                stage: Stage::Login,
                reply,
            });
        }

        let dsn = self.config.dsn.as_ref();

        let reply = self.client.sender(sender, dsn).await;
        let reply = self.wrap(reply)?;
        if reply.is_failure() {
            return Ok(Step::Rejected {
                stage: Stage::Sender,
                reply,
            });
        }

        let reply = self.client.recipient(recipient, dsn).await;
        let reply = self.wrap(reply)?;
        if reply.is_failure() {
            return Ok(Step::Rejected {
                stage: Stage::Recipient,
                reply,
            });
        }

        let reply = self.client.send_data(bodies).await;
        let reply = self.wrap(reply)?;
        if is_delivered(&reply) {
            Ok(Step::Delivered(reply))
        } else {
            Ok(Step::Rejected {
                stage: Stage::Data,
                reply,
            })
        }
    }

    /// Brings the client to `LOGIN_COMPLETE`, connecting if needed.
    ///
    /// Returns the login reply if the server refused the greeting exchange.
    async fn ensure_session(&mut self) -> Result<Option<Reply>> {
        match self.client.state() {
            ConnectionState::LoginComplete => return Ok(None),
            ConnectionState::Fresh => {}
            state => {
                tracing::debug!(client = %self.client.name(), %state, "recycling connection");
                self.disconnect();
            }
        }

        tracing::info!(
            client = %self.client.name(),
            host = %self.config.host,
            port = self.config.port,
            "connecting"
        );
        let greeting = self
            .client
            .connect(&self.config.host, self.config.port)
            .await;
        self.wrap(greeting)?;

        let replies = self.client.login().await;
        let mut replies = self.wrap(replies)?;
        if self.client.state() == ConnectionState::LoginComplete {
            Ok(None)
        } else {
            Ok(Some(replies.pop().unwrap_or_default()))
        }
    }

    /// Counts the message, then recycles or resets the connection.
    async fn finish(&mut self) {
        self.stream_sent += 1;
        let keep = self.config.streaming
            && self.stream_sent < self.config.stream_max
            && self.client.state().in_session();

        if !keep {
            tracing::debug!(
                client = %self.client.name(),
                sent = self.stream_sent,
                "closing connection"
            );
            self.disconnect();
            return;
        }

        if let Err(e) = self.client.reset().await {
            tracing::warn!(client = %self.client.name(), ?e, "RSET failed, disconnecting");
            self.disconnect();
        }
    }

    async fn pause(&self) -> Result<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(self.error(mailpost_smtp::Error::Cancelled)),
            () = tokio::time::sleep(self.config.retry_delay) => Ok(()),
        }
    }

    fn correlation_id(&self) -> String {
        self.config
            .dsn
            .as_ref()
            .and_then(|dsn| dsn.envid())
            .map_or_else(
                || format!("{}#{}", self.client.name(), self.submissions),
                str::to_string,
            )
    }

    fn wrap<T>(&self, result: mailpost_smtp::Result<T>) -> Result<T> {
        result.map_err(|source| self.error(source))
    }

    fn error(&self, source: mailpost_smtp::Error) -> Error {
        Error::Smtp {
            client: self.client.name().to_string(),
            last_reply: self.client.last_reply().cloned(),
            source,
        }
    }
}

impl Step {
    fn into_reply(self) -> Reply {
        match self {
            Self::Delivered(reply) | Self::Rejected { reply, .. } => reply,
        }
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
    use crate::OutcomeKind;
    use mailpost_smtp::ReplyCode;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_test::io::{Builder, Mock};

    /// Hands out scripted mock streams, one per connect, counting connects.
    #[derive(Clone, Default)]
    struct Scripted {
        mocks: Arc<Mutex<VecDeque<Mock>>>,
        connects: Arc<Mutex<u32>>,
    }

    impl Scripted {
        fn new(mocks: impl IntoIterator<Item = Mock>) -> Self {
            Self {
                mocks: Arc::new(Mutex::new(mocks.into_iter().collect())),
                connects: Arc::default(),
            }
        }

        fn connects(&self) -> u32 {
            *self.connects.lock().unwrap()
        }
    }

    impl Connector for Scripted {
        type Stream = Mock;

        fn connect(&self, _host: &str, _port: u16) -> impl Future<Output = io::Result<Mock>> + Send {
            *self.connects.lock().unwrap() += 1;
            let next = self.mocks.lock().unwrap().pop_front();
            async move {
                next.ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            }
        }
    }

    fn config(policy: RetryPolicy, streaming: bool) -> SubmitConfig {
        let client = mailpost_smtp::ClientConfig::builder()
            .timeout(Duration::from_millis(200))
            .helo_host("client.local")
            .build();
        SubmitConfig::builder("mx.example.com")
            .policy(policy)
            .streaming(streaming)
            .stream_max(10)
            .retry_delay(Duration::from_millis(1))
            .client(client)
            .build()
    }

    fn envelope(builder: &mut Builder, rcpt_reply: &[u8]) {
        builder
            .read(b"220 mx ready\r\n")
            .write(b"HELO client.local\r\n")
            .read(b"250 mx\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<rcpt@example.com>\r\n")
            .read(rcpt_reply);
    }

    fn data(builder: &mut Builder) {
        builder
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"hi\r\n")
            .write(b"\r\n.\r\n")
            .read(b"250 queued\r\n");
    }

    fn addresses() -> (Address, Address) {
        (
            Address::new("sender@example.com").unwrap(),
            Address::new("rcpt@example.com").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_tolerant_reconnects_once_after_rejected_recipient() {
        let mut first = Builder::new();
        envelope(&mut first, b"450 try again\r\n");

        let mut second = Builder::new();
        envelope(&mut second, b"250 OK\r\n");
        data(&mut second);
        second.write(b"RSET\r\n").read(b"250 flushed\r\n");

        let connector = Scripted::new([first.build(), second.build()]);
        let mut submitter =
            Submitter::with_connector(config(RetryPolicy::Tolerant, true), connector.clone())
                .unwrap();

        let (from, to) = addresses();
        let mut bodies = [Some(&b"hi\r\n"[..])];
        let reply = submitter.submit(&from, &to, &mut bodies).await.unwrap();

        assert_eq!(reply.code(), ReplyCode::OK);
        assert!(is_delivered(&reply));
        assert_eq!(connector.connects(), 2);
        assert_eq!(submitter.stream_sent(), 1);
        assert_eq!(
            submitter.client().state(),
            ConnectionState::LoginComplete
        );
    }

    #[tokio::test]
    async fn test_touchy_returns_rejection() {
        let mut only = Builder::new();
        envelope(&mut only, b"550 no such user\r\n");

        let connector = Scripted::new([only.build()]);
        let mut submitter =
            Submitter::with_connector(config(RetryPolicy::Touchy, false), connector.clone())
                .unwrap();

        let (from, to) = addresses();
        let mut bodies = [Some(&b"hi\r\n"[..])];
        let reply = submitter.submit(&from, &to, &mut bodies).await.unwrap();

        assert_eq!(reply.code(), ReplyCode::MAILBOX_UNAVAILABLE);
        assert_eq!(connector.connects(), 1);
        assert_eq!(submitter.client().state(), ConnectionState::Fresh);
    }

    #[tokio::test]
    async fn test_tolerant_gives_up_after_retries() {
        let mut config = config(RetryPolicy::Tolerant, false);
        config.connect_retries = 1;

        let mut first = Builder::new();
        envelope(&mut first, b"550 no\r\n");
        let mut second = Builder::new();
        envelope(&mut second, b"550 still no\r\n");

        let connector = Scripted::new([first.build(), second.build()]);
        let mut submitter = Submitter::with_connector(config, connector.clone()).unwrap();

        let (from, to) = addresses();
        let mut bodies = [Some(&b"hi\r\n"[..])];
        let reply = submitter.submit(&from, &to, &mut bodies).await.unwrap();

        assert_eq!(reply.text(), "still no");
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_data_rejection_not_retried() {
        let mut only = Builder::new();
        envelope(&mut only, b"250 OK\r\n");
        only.write(b"DATA\r\n").read(b"554 no thanks\r\n");

        let connector = Scripted::new([only.build()]);
        let mut submitter =
            Submitter::with_connector(config(RetryPolicy::Tolerant, false), connector.clone())
                .unwrap();

        let (from, to) = addresses();
        let mut bodies = [Some(&b"hi\r\n"[..])];
        let reply = submitter.submit(&from, &to, &mut bodies).await.unwrap();

        assert_eq!(reply.code(), ReplyCode::TRANSACTION_FAILED);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_streaming_reuses_connection_until_cap() {
        let mut config = config(RetryPolicy::Touchy, true);
        config.stream_max = 2;

        let mut only = Builder::new();
        envelope(&mut only, b"250 OK\r\n");
        data(&mut only);
        only.write(b"RSET\r\n")
            .read(b"250 flushed\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<rcpt@example.com>\r\n")
            .read(b"250 OK\r\n");
        data(&mut only);

        let connector = Scripted::new([only.build()]);
        let mut submitter = Submitter::with_connector(config, connector.clone()).unwrap();
        let (from, to) = addresses();

        let mut bodies = [Some(&b"hi\r\n"[..])];
        submitter.submit(&from, &to, &mut bodies).await.unwrap();
        assert_eq!(submitter.stream_sent(), 1);

        let mut bodies = [Some(&b"hi\r\n"[..])];
        submitter.submit(&from, &to, &mut bodies).await.unwrap();

        // Cap reached: connection dropped, counter reset.
        assert_eq!(submitter.stream_sent(), 0);
        assert_eq!(submitter.client().state(), ConnectionState::Fresh);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_failed_reset_falls_back_to_disconnect() {
        let mut only = Builder::new();
        envelope(&mut only, b"250 OK\r\n");
        data(&mut only);
        only.write(b"RSET\r\n").read(b"500 what\r\n");

        let connector = Scripted::new([only.build()]);
        let mut submitter =
            Submitter::with_connector(config(RetryPolicy::Touchy, true), connector).unwrap();
        let (from, to) = addresses();

        let mut bodies = [Some(&b"hi\r\n"[..])];
        let reply = submitter.submit(&from, &to, &mut bodies).await.unwrap();

        assert!(is_delivered(&reply));
        assert_eq!(submitter.client().state(), ConnectionState::Fresh);
        assert_eq!(submitter.stream_sent(), 0);
    }

    #[tokio::test]
    async fn test_measured_pass_and_exception() {
        let mut only = Builder::new();
        envelope(&mut only, b"250 OK\r\n");
        data(&mut only);

        // The second submission finds no server to connect to.
        let connector = Scripted::new([only.build()]);
        let mut submitter =
            Submitter::with_connector(config(RetryPolicy::Tolerant, false), connector).unwrap();
        let (from, to) = addresses();

        let mut bodies = [Some(&b"hi\r\n"[..])];
        let outcome = submitter
            .measured_submit(&from, &to, &mut bodies)
            .await
            .unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Pass);
        assert_eq!(outcome.metrics.bytes, 9);
        assert!(outcome.attributes.correlation_id.contains('#'));

        let mut bodies = [Some(&b"hi\r\n"[..])];
        let outcome = submitter
            .measured_submit(&from, &to, &mut bodies)
            .await
            .unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Exception);
        assert_eq!(outcome.metrics.exception, 1);
        assert_eq!(submitter.client().state(), ConnectionState::Fresh);
    }

    #[tokio::test]
    async fn test_measured_fail_uses_envid() {
        let dsn = mailpost_smtp::Dsn::builder().envid("batch-42").build();
        let mut config = config(RetryPolicy::Touchy, false);
        config.dsn = Some(dsn);

        let mut only = Builder::new();
        envelope(&mut only, b"550 no such user\r\n");

        let connector = Scripted::new([only.build()]);
        let mut submitter = Submitter::with_connector(config, connector).unwrap();
        let (from, to) = addresses();

        let mut bodies = [Some(&b"hi\r\n"[..])];
        let outcome = submitter
            .measured_submit(&from, &to, &mut bodies)
            .await
            .unwrap();

        assert_eq!(outcome.kind, OutcomeKind::Fail);
        assert_eq!(outcome.attributes.correlation_id, "batch-42");
        assert_eq!(outcome.attributes.status, Some(550));
        assert_eq!(
            outcome.attributes.server_text.as_deref(),
            Some("no such user")
        );
    }

    #[tokio::test]
    async fn test_login_rejection_is_retried() {
        let mut first = Builder::new();
        first
            .read(b"220 mx ready\r\n")
            .write(b"HELO client.local\r\n")
            .read(b"421 too busy\r\n");
        let mut second = Builder::new();
        envelope(&mut second, b"250 OK\r\n");
        data(&mut second);

        let connector = Scripted::new([first.build(), second.build()]);
        let mut submitter =
            Submitter::with_connector(config(RetryPolicy::Tolerant, false), connector.clone())
                .unwrap();
        let (from, to) = addresses();

        let mut bodies = [Some(&b"hi\r\n"[..])];
        let reply = submitter.submit(&from, &to, &mut bodies).await.unwrap();
        assert!(is_delivered(&reply));
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_client_bad() {
        let (canceller, token) = mailpost_smtp::cancel::pair();
        canceller.cancel();

        let connector = Scripted::new([Builder::new().build()]);
        let mut submitter =
            Submitter::with_connector(config(RetryPolicy::Tolerant, true), connector)
                .unwrap()
                .with_cancel(token);
        let (from, to) = addresses();

        let mut bodies = [Some(&b"hi\r\n"[..])];
        let err = submitter
            .measured_submit(&from, &to, &mut bodies)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(submitter.client().state(), ConnectionState::Bad);
        assert_eq!(submitter.stream_sent(), 0);
    }
}
