//! SMTP protocol driver.
//!
//! One client, one connection, one state machine. HELO and EHLO dialects
//! share every code path; [`ClientConfig::extensions`] picks between them.
//!
//! Protocol rejections come back as [`Reply`] values and leave the state
//! alone. Transport failures, timeouts and cancellation put the client in
//! [`ConnectionState::Bad`] and drop the socket. So does a call that was
//! abandoned mid-flight (its future dropped): the next call finds the
//! in-flight marker still set and refuses to reuse the stream.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncRead;

use super::framed::{FramedStream, bounded};
use super::stream::{Connector, TcpConnector};
use super::{ClientConfig, ConnectionState, ServerInfo};
use crate::cancel::CancelToken;
use crate::command::Command;
use crate::error::{Error, Phase, Result};
use crate::parser::{self, Line};
use crate::types::{Address, Dsn, Extension, Reply, ReplyCode};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// SMTP client.
pub struct Client<C: Connector = TcpConnector> {
    id: u64,
    name: String,
    config: ClientConfig,
    connector: C,
    cancel: CancelToken,
    stream: Option<FramedStream<C::Stream>>,
    state: ConnectionState,
    server_info: ServerInfo,
    in_flight: bool,
    last_reply: Option<Reply>,
}

impl<C: Connector> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("server_info", &self.server_info)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl Client<TcpConnector> {
    /// Creates a TCP client.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, TcpConnector)
    }
}

impl<C: Connector> Client<C> {
    /// Creates a client that opens streams through `connector`.
    #[must_use]
    pub fn with_connector(config: ClientConfig, connector: C) -> Self {
        let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            name: format!("{}-{id}", config.name),
            config,
            connector,
            cancel: CancelToken::never(),
            stream: None,
            state: ConnectionState::Fresh,
            server_info: ServerInfo::default(),
            in_flight: false,
            last_reply: None,
        }
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replaces the configuration and cancellation token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] while a connection is open.
    pub fn configure(&mut self, config: ClientConfig, cancel: CancelToken) -> Result<()> {
        self.enter("configure", |state| !state.is_live())?;
        self.name = format!("{}-{}", config.name, self.id);
        self.config = config;
        self.cancel = cancel;
        Ok(())
    }

    /// Unique client name, used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Capabilities learned from the greeting and EHLO.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// The most recent reply received, if any.
    #[must_use]
    pub const fn last_reply(&self) -> Option<&Reply> {
        self.last_reply.as_ref()
    }

    /// True when DSN parameters will be sent: extensions are on and the
    /// server advertised DSN.
    #[must_use]
    pub fn dsn_enabled(&self) -> bool {
        self.config.extensions && self.server_info.supports(&Extension::Dsn)
    }

    /// Opens the connection and reads the greeting.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidState`] unless `FRESH`. Any other failure,
    /// including a rejecting greeting, leaves the client `BAD`.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<Reply> {
        self.enter("connect", |state| state == ConnectionState::Fresh)?;
        tracing::debug!(client = %self.name, host, port, "connecting");

        self.in_flight = true;
        let result = self.open(host, port).await;
        let greeting = self.settle(result)?;

        self.server_info = ServerInfo::from_greeting(&greeting);
        self.state = ConnectionState::Connected;
        self.last_reply = Some(greeting.clone());
        tracing::debug!(client = %self.name, server = %self.server_info.hostname, "connected");
        Ok(greeting)
    }

    async fn open(&mut self, host: &str, port: u16) -> Result<Reply> {
        let socket = bounded(&self.cancel, self.config.timeout, self.connector.connect(host, port))
            .await?
            .ok_or(Error::Timeout {
                phase: Phase::Connect,
                transferred: 0,
            })?;
        self.stream = Some(FramedStream::new(socket, &self.config, self.cancel.clone()));

        let lines = self.framed()?.read_reply(Phase::Reply).await?;
        let greeting = parser::collapse(&lines);
        if greeting.is_failure() {
            return Err(Error::Greeting {
                code: greeting.code().as_u16(),
                message: greeting.text().to_string(),
            });
        }
        Ok(greeting)
    }

    /// Sends HELO, or EHLO when extensions are enabled, announcing
    /// [`ClientConfig::helo_host`].
    ///
    /// With extensions, one reply per line comes back and the continuation
    /// lines are scanned for advertised extensions. Without, exactly one
    /// reply. The state advances only on a final code of 250.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidState`] unless `CONNECTED`.
    pub async fn login(&mut self) -> Result<Vec<Reply>> {
        self.enter("login", |state| state == ConnectionState::Connected)?;

        let hostname = self.config.helo_host.clone();
        let cmd = if self.config.extensions {
            Command::Ehlo { hostname }
        } else {
            Command::Helo { hostname }
        };

        self.in_flight = true;
        let result = self.exchange(&cmd).await;
        let lines = self.settle(result)?;
        let reply = parser::collapse(&lines);

        let replies = if self.config.extensions {
            self.server_info.extensions = lines
                .iter()
                .skip(1)
                .map(|line| Extension::parse(&line.text))
                .collect();
            parser::expand(&lines)
        } else {
            vec![reply.clone()]
        };

        if reply.code() == ReplyCode::OK {
            self.state = ConnectionState::LoginComplete;
        }
        tracing::debug!(
            client = %self.name,
            code = %reply.code(),
            dsn = self.dsn_enabled(),
            state = %self.state,
            "login"
        );
        self.last_reply = Some(reply);
        Ok(replies)
    }

    /// Sends `MAIL FROM`.
    ///
    /// DSN parameters are attached only when [`Client::dsn_enabled`].
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidState`] unless `LOGIN_COMPLETE`.
    pub async fn sender(&mut self, from: &Address, dsn: Option<&Dsn>) -> Result<Reply> {
        self.enter("sender", |state| state == ConnectionState::LoginComplete)?;
        let cmd = Command::MailFrom {
            from: from.clone(),
            params: self.dsn_params(dsn, Dsn::render_from),
        };

        let reply = self.transact(&cmd).await?;
        if !reply.is_failure() {
            self.state = ConnectionState::MailFromDone;
        }
        Ok(reply)
    }

    /// Sends `RCPT TO`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidState`] unless `MAILFROM_DONE`.
    pub async fn recipient(&mut self, to: &Address, dsn: Option<&Dsn>) -> Result<Reply> {
        self.enter("recipient", |state| state == ConnectionState::MailFromDone)?;
        let cmd = Command::RcptTo {
            to: to.clone(),
            params: self.dsn_params(dsn, Dsn::render_recipient),
        };

        let reply = self.transact(&cmd).await?;
        if !reply.is_failure() {
            self.state = ConnectionState::RcptToDone;
        }
        Ok(reply)
    }

    /// Sends `RSET`, returning to `LOGIN_COMPLETE`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidState`] outside a session. A refused RSET
    /// is [`Error::ResetFailed`] and leaves the client `BAD`.
    pub async fn reset(&mut self) -> Result<Reply> {
        self.enter("reset", ConnectionState::in_session)?;

        self.in_flight = true;
        let result = self.exchange(&Command::Rset).await.and_then(|lines| {
            let reply = parser::collapse(&lines);
            if reply.is_failure() {
                Err(Error::ResetFailed {
                    code: reply.code().as_u16(),
                    message: reply.text().to_string(),
                })
            } else {
                Ok(reply)
            }
        });
        let reply = self.settle(result)?;

        self.state = ConnectionState::LoginComplete;
        self.last_reply = Some(reply.clone());
        Ok(reply)
    }

    /// Sends `DATA`, streams the bodies, and returns the final reply with
    /// the transmitted byte count attached.
    ///
    /// Empty slots in `bodies` are skipped. If the server refuses `DATA`
    /// itself, that reply is returned without a size and nothing is
    /// streamed.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidState`] unless `RCPTTO_DONE`.
    pub async fn send_data<R>(&mut self, bodies: &mut [Option<R>]) -> Result<Reply>
    where
        R: AsyncRead + Unpin,
    {
        self.enter("send_data", |state| state == ConnectionState::RcptToDone)?;

        self.in_flight = true;
        let result = self.data_exchange(bodies).await;
        let reply = self.settle(result)?;

        tracing::debug!(
            client = %self.name,
            code = %reply.code(),
            size = ?reply.size(),
            "data"
        );
        self.last_reply = Some(reply.clone());
        Ok(reply)
    }

    async fn data_exchange<R>(&mut self, bodies: &mut [Option<R>]) -> Result<Reply>
    where
        R: AsyncRead + Unpin,
    {
        let lines = self.exchange(&Command::Data).await?;
        let go_ahead = parser::collapse(&lines);
        if go_ahead.code() != ReplyCode::START_DATA {
            return Ok(go_ahead);
        }

        let framed = self.framed()?;
        let sent = framed.write_body(bodies).await?;
        let lines = framed.read_reply(Phase::DataReply).await?;
        Ok(parser::collapse(&lines).with_size(sent))
    }

    /// Sends `QUIT` and releases the connection.
    ///
    /// Returns `None` if there was no connection to close.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidState`] when `BAD`. Cancellation leaves
    /// the client `BAD`; any other failure still releases the connection.
    pub async fn done(&mut self) -> Result<Option<Reply>> {
        self.enter("done", |state| state != ConnectionState::Bad)?;
        if !self.state.is_live() {
            self.disconnect();
            return Ok(None);
        }

        self.in_flight = true;
        let result = self.exchange(&Command::Quit).await;
        self.in_flight = false;

        match result {
            Ok(lines) => {
                self.disconnect();
                Ok(Some(parser::collapse(&lines)))
            }
            Err(Error::Cancelled) => {
                self.abandon();
                Err(Error::Cancelled)
            }
            Err(e) => {
                tracing::warn!(client = %self.name, ?e, "QUIT failed");
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Releases the connection without a goodbye. Always returns to
    /// `FRESH`; never fails.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(client = %self.name, state = %self.state, "disconnected");
        }
        self.state = ConnectionState::Fresh;
        self.server_info = ServerInfo::default();
        self.in_flight = false;
    }

    fn dsn_params(&self, dsn: Option<&Dsn>, render: fn(&Dsn) -> String) -> Option<String> {
        dsn.filter(|_| self.dsn_enabled())
            .map(render)
            .filter(|params| !params.is_empty())
    }

    /// Sends a command and collapses its reply, settling the state.
    async fn transact(&mut self, cmd: &Command) -> Result<Reply> {
        self.in_flight = true;
        let result = self.exchange(cmd).await;
        let lines = self.settle(result)?;

        let reply = parser::collapse(&lines);
        tracing::debug!(client = %self.name, code = %reply.code(), text = reply.text(), "<<");
        self.last_reply = Some(reply.clone());
        Ok(reply)
    }

    async fn exchange(&mut self, cmd: &Command) -> Result<Vec<Line>> {
        tracing::debug!(client = %self.name, command = %cmd, ">>");
        let framed = self.framed()?;
        framed.write_command(&cmd.serialize()).await?;
        framed.read_reply(Phase::Reply).await
    }

    fn framed(&mut self) -> Result<&mut FramedStream<C::Stream>> {
        self.stream.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Checks the state precondition for `op`.
    fn enter(&mut self, op: &'static str, allowed: impl Fn(ConnectionState) -> bool) -> Result<()> {
        if self.in_flight {
            tracing::warn!(client = %self.name, op, "previous operation was interrupted");
            self.abandon();
        }
        if allowed(self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    /// Clears the in-flight marker; fatal errors poison the connection.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        self.in_flight = false;
        if let Err(e) = &result
            && e.is_fatal()
        {
            tracing::warn!(client = %self.name, state = %self.state, error = %e, "connection unusable");
            self.abandon();
        }
        result
    }

    fn abandon(&mut self) {
        self.stream = None;
        self.in_flight = false;
        self.state = ConnectionState::Bad;
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
    use std::collections::VecDeque;
    use std::future::Future;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_test::io::{Builder, Mock};

    /// Hands out scripted mock streams, one per connect.
    #[derive(Default)]
    struct Scripted(Mutex<VecDeque<Mock>>);

    impl Scripted {
        fn new(mocks: impl IntoIterator<Item = Mock>) -> Self {
            Self(Mutex::new(mocks.into_iter().collect()))
        }
    }

    impl Connector for Scripted {
        type Stream = Mock;

        fn connect(&self, _host: &str, _port: u16) -> impl Future<Output = io::Result<Mock>> + Send {
            let next = self.0.lock().unwrap().pop_front();
            async move {
                next.ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            }
        }
    }

    fn config(extensions: bool) -> ClientConfig {
        ClientConfig::builder()
            .timeout(Duration::from_millis(100))
            .extensions(extensions)
            .helo_host("client.local")
            .name("test")
            .build()
    }

    fn client(extensions: bool, mock: Mock) -> Client<Scripted> {
        Client::with_connector(config(extensions), Scripted::new([mock]))
    }

    fn from() -> Address {
        Address::new("sender@example.com").unwrap()
    }

    fn to() -> Address {
        Address::new("rcpt@example.com").unwrap()
    }

    #[tokio::test]
    async fn test_full_transaction_helo() {
        let mock = Builder::new()
            .read(b"220 mx.example.com ESMTP\r\n")
            .write(b"HELO client.local\r\n")
            .read(b"250 mx.example.com\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<rcpt@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"hi\r\n")
            .write(b"\r\n.\r\n")
            .read(b"250 queued\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let mut client = client(false, mock);

        let greeting = client.connect("mx.example.com", 25).await.unwrap();
        assert_eq!(greeting.code(), ReplyCode::SERVICE_READY);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.server_info().hostname, "mx.example.com");

        let replies = client.login().await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(client.state(), ConnectionState::LoginComplete);

        client.sender(&from(), None).await.unwrap();
        assert_eq!(client.state(), ConnectionState::MailFromDone);
        client.recipient(&to(), None).await.unwrap();
        assert_eq!(client.state(), ConnectionState::RcptToDone);

        let mut bodies = [Some(&b"hi\r\n"[..])];
        let reply = client.send_data(&mut bodies).await.unwrap();
        assert_eq!(reply.code(), ReplyCode::OK);
        assert_eq!(reply.size(), Some(9));
        assert_eq!(client.state(), ConnectionState::RcptToDone);

        let bye = client.done().await.unwrap().unwrap();
        assert_eq!(bye.code(), ReplyCode::CLOSING);
        assert_eq!(client.state(), ConnectionState::Fresh);
    }

    #[tokio::test]
    async fn test_ehlo_detects_dsn_and_sends_params() {
        let dsn = Dsn::builder()
            .ret("HDRS")
            .envid("QQ314159")
            .notify_failure(true)
            .build();
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"EHLO client.local\r\n")
            .read(b"250-mx greets you\r\n250-SIZE 1000000\r\n250-DSN\r\n250 8BITMIME\r\n")
            .write(b"MAIL FROM:<sender@example.com> RET=HDRS ENVID=QQ314159\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<rcpt@example.com> NOTIFY=FAILURE\r\n")
            .read(b"250 OK\r\n")
            .build();
        let mut client = client(true, mock);

        client.connect("mx", 25).await.unwrap();
        let replies = client.login().await.unwrap();
        assert_eq!(replies.len(), 4);
        assert!(client.dsn_enabled());
        assert_eq!(client.server_info().max_message_size(), Some(1_000_000));

        client.sender(&from(), Some(&dsn)).await.unwrap();
        client.recipient(&to(), Some(&dsn)).await.unwrap();
        assert_eq!(client.state(), ConnectionState::RcptToDone);
        client.disconnect();
    }

    #[tokio::test]
    async fn test_dsn_params_omitted_without_extensions() {
        let dsn = Dsn::builder().ret("FULL").build();
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"HELO client.local\r\n")
            .read(b"250 mx\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"250 OK\r\n")
            .build();
        let mut client = client(false, mock);

        client.connect("mx", 25).await.unwrap();
        client.login().await.unwrap();
        client.sender(&from(), Some(&dsn)).await.unwrap();
        client.disconnect();
    }

    #[tokio::test]
    async fn test_rejections_leave_state_unchanged() {
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"HELO client.local\r\n")
            .read(b"250 mx\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<rcpt@example.com>\r\n")
            .read(b"550 no such user\r\n")
            .build();
        let mut client = client(false, mock);

        client.connect("mx", 25).await.unwrap();
        client.login().await.unwrap();
        client.sender(&from(), None).await.unwrap();

        let reply = client.recipient(&to(), None).await.unwrap();
        assert_eq!(reply.code(), ReplyCode::MAILBOX_UNAVAILABLE);
        assert_eq!(client.state(), ConnectionState::MailFromDone);
        assert_eq!(client.last_reply(), Some(&reply));
        client.disconnect();
    }

    #[tokio::test]
    async fn test_login_without_250_stays_connected() {
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"HELO client.local\r\n")
            .read(b"501 bad hostname\r\n")
            .build();
        let mut client = client(false, mock);

        client.connect("mx", 25).await.unwrap();
        let replies = client.login().await.unwrap();
        assert_eq!(replies[0].code(), ReplyCode::PARAMETER_ERROR);
        assert_eq!(client.state(), ConnectionState::Connected);
        client.disconnect();
    }

    #[tokio::test]
    async fn test_missing_continuation_dash_stays_in_step() {
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"EHLO client.local\r\n")
            .read(b"250-mx\r\n250 SIZE 100\r\n250-DSN\r\n250 HELP\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"550 sender rejected\r\n")
            .build();
        let mut client = client(true, mock);

        client.connect("mx", 25).await.unwrap();
        let replies = client.login().await.unwrap();
        assert_eq!(replies.len(), 4);
        assert!(replies[1].is_broken());
        assert!(client.dsn_enabled());
        assert_eq!(client.state(), ConnectionState::LoginComplete);

        let reply = client.sender(&from(), None).await.unwrap();
        assert_eq!(reply.code(), ReplyCode::MAILBOX_UNAVAILABLE);
        assert_eq!(reply.text(), "sender rejected");
        assert_eq!(client.state(), ConnectionState::LoginComplete);
        client.disconnect();
    }

    #[tokio::test]
    async fn test_broken_continuation_still_logs_in() {
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"EHLO client.local\r\n")
            .read(b"250-mx\r\n2X0-JUNK\r\n250 HELP\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"250 OK\r\n")
            .build();
        let mut client = client(true, mock);

        client.connect("mx", 25).await.unwrap();
        let replies = client.login().await.unwrap();
        assert_eq!(replies.len(), 3);
        assert!(replies[1].is_broken());
        assert_eq!(client.last_reply().unwrap().code(), ReplyCode::OK);
        assert!(client.last_reply().unwrap().is_broken());
        assert_eq!(client.state(), ConnectionState::LoginComplete);

        client.sender(&from(), None).await.unwrap();
        assert_eq!(client.state(), ConnectionState::MailFromDone);
        client.disconnect();
    }

    #[tokio::test]
    async fn test_wrong_state_is_refused() {
        let mut client = client(false, Builder::new().build());

        let err = client.sender(&from(), None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                op: "sender",
                state: ConnectionState::Fresh
            }
        ));
        assert_eq!(client.state(), ConnectionState::Fresh);

        let mut bodies: [Option<&[u8]>; 0] = [];
        assert!(client.send_data(&mut bodies).await.is_err());
        assert!(client.reset().await.is_err());
        assert_eq!(client.done().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejected_greeting_is_bad() {
        let mock = Builder::new().read(b"554 go away\r\n").build();
        let mut client = client(false, mock);

        let err = client.connect("mx", 25).await.unwrap_err();
        assert!(matches!(err, Error::Greeting { code: 554, .. }));
        assert_eq!(client.state(), ConnectionState::Bad);

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Fresh);
    }

    #[tokio::test]
    async fn test_connect_refused_is_bad() {
        let mut client = Client::with_connector(config(false), Scripted::default());
        let err = client.connect("mx", 25).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(client.state(), ConnectionState::Bad);

        let err = client.connect("mx", 25).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: ConnectionState::Bad,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_reset_returns_to_login_complete() {
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"HELO client.local\r\n")
            .read(b"250 mx\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RSET\r\n")
            .read(b"250 flushed\r\n")
            .build();
        let mut client = client(false, mock);

        client.connect("mx", 25).await.unwrap();
        client.login().await.unwrap();
        client.sender(&from(), None).await.unwrap();
        client.reset().await.unwrap();
        assert_eq!(client.state(), ConnectionState::LoginComplete);
        client.disconnect();
    }

    #[tokio::test]
    async fn test_refused_reset_is_bad() {
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"HELO client.local\r\n")
            .read(b"250 mx\r\n")
            .write(b"RSET\r\n")
            .read(b"421 shutting down\r\n")
            .build();
        let mut client = client(false, mock);

        client.connect("mx", 25).await.unwrap();
        client.login().await.unwrap();
        let err = client.reset().await.unwrap_err();
        assert!(matches!(err, Error::ResetFailed { code: 421, .. }));
        assert_eq!(client.state(), ConnectionState::Bad);
    }

    #[tokio::test]
    async fn test_data_refused_streams_nothing() {
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"HELO client.local\r\n")
            .read(b"250 mx\r\n")
            .write(b"MAIL FROM:<>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<rcpt@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"DATA\r\n")
            .read(b"554 no valid recipients\r\n")
            .build();
        let mut client = client(false, mock);

        client.connect("mx", 25).await.unwrap();
        client.login().await.unwrap();
        client.sender(&Address::null(), None).await.unwrap();
        client.recipient(&to(), None).await.unwrap();

        let mut bodies = [Some(&b"never sent"[..])];
        let reply = client.send_data(&mut bodies).await.unwrap();
        assert_eq!(reply.code(), ReplyCode::TRANSACTION_FAILED);
        assert_eq!(reply.size(), None);
        assert_eq!(client.state(), ConnectionState::RcptToDone);
        client.disconnect();
    }

    #[tokio::test]
    async fn test_mid_reply_close_is_bad() {
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"HELO client.local\r\n")
            .read(b"250-mx\r\n")
            .build();
        let mut client = client(false, mock);

        client.connect("mx", 25).await.unwrap();
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(client.state(), ConnectionState::Bad);
    }

    #[tokio::test]
    async fn test_cancel_moves_to_bad() {
        let (canceller, token) = crate::cancel::pair();
        let (stream, _server) = tokio::io::duplex(256);

        struct Once(Mutex<Option<tokio::io::DuplexStream>>);
        impl Connector for Once {
            type Stream = tokio::io::DuplexStream;
            fn connect(
                &self,
                _host: &str,
                _port: u16,
            ) -> impl Future<Output = io::Result<Self::Stream>> + Send {
                let next = self.0.lock().unwrap().take();
                async move { next.ok_or_else(|| io::Error::other("used")) }
            }
        }

        let config = ClientConfig::builder()
            .timeout(Duration::from_secs(30))
            .build();
        let mut client =
            Client::with_connector(config, Once(Mutex::new(Some(stream)))).with_cancel(token);

        let waiter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = client.connect("mx", 25).await.unwrap_err();
        waiter.await.unwrap();

        assert!(err.is_cancelled());
        assert_eq!(client.state(), ConnectionState::Bad);
    }

    #[tokio::test]
    async fn test_cancel_during_data_moves_to_bad() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        struct Once(Mutex<Option<tokio::io::DuplexStream>>);
        impl Connector for Once {
            type Stream = tokio::io::DuplexStream;
            fn connect(
                &self,
                _host: &str,
                _port: u16,
            ) -> impl Future<Output = io::Result<Self::Stream>> + Send {
                let next = self.0.lock().unwrap().take();
                async move { next.ok_or_else(|| io::Error::other("used")) }
            }
        }

        let (canceller, token) = crate::cancel::pair();
        let (stream, far) = tokio::io::duplex(4096);

        // Answers up to 354, then goes quiet and cancels while the client
        // waits for the post-DATA reply.
        let server = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(far);
            let mut lines = BufReader::new(read).lines();
            write.write_all(b"220 mx ready\r\n").await.unwrap();
            for reply in [
                &b"250 mx\r\n"[..],
                b"250 OK\r\n",
                b"250 OK\r\n",
                b"354 go ahead\r\n",
            ] {
                lines.next_line().await.unwrap();
                write.write_all(reply).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
            (lines, write)
        });

        let config = ClientConfig::builder()
            .timeout(Duration::from_secs(30))
            .helo_host("client.local")
            .build();
        let mut client =
            Client::with_connector(config, Once(Mutex::new(Some(stream)))).with_cancel(token);

        client.connect("mx", 25).await.unwrap();
        client.login().await.unwrap();
        client.sender(&from(), None).await.unwrap();
        client.recipient(&to(), None).await.unwrap();

        let mut bodies = [Some(&b"hi\r\n"[..])];
        let err = client.send_data(&mut bodies).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(client.state(), ConnectionState::Bad);

        let err = client.reset().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_call_poisons_connection() {
        let (stream, mut server) = tokio::io::duplex(256);
        {
            use tokio::io::AsyncWriteExt;
            server.write_all(b"220 mx ready\r\n").await.unwrap();
        }

        struct Once(Mutex<Option<tokio::io::DuplexStream>>);
        impl Connector for Once {
            type Stream = tokio::io::DuplexStream;
            fn connect(
                &self,
                _host: &str,
                _port: u16,
            ) -> impl Future<Output = io::Result<Self::Stream>> + Send {
                let next = self.0.lock().unwrap().take();
                async move { next.ok_or_else(|| io::Error::other("used")) }
            }
        }

        let mut client =
            Client::with_connector(config(false), Once(Mutex::new(Some(stream))));
        client.connect("mx", 25).await.unwrap();

        // Server never answers HELO; give up on the call from outside.
        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), client.login()).await;
        assert!(abandoned.is_err());

        let err = client.login().await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: ConnectionState::Bad,
                ..
            }
        ));
        drop(server);
    }

    #[tokio::test]
    async fn test_names_are_unique() {
        let a = Client::new(ClientConfig::default());
        let b = Client::new(ClientConfig::default());
        assert_ne!(a.name(), b.name());
        assert!(a.name().starts_with("smtp-"));
    }

    #[tokio::test]
    async fn test_configure_refused_while_live() {
        let mock = Builder::new().read(b"220 mx ready\r\n").build();
        let mut client = client(false, mock);
        client.connect("mx", 25).await.unwrap();

        let err = client
            .configure(config(true), CancelToken::never())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { op: "configure", .. }));

        client.disconnect();
        client.configure(config(true), CancelToken::never()).unwrap();
        assert!(client.config().extensions);
    }
}
