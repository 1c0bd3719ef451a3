//! Integration tests for the submission manager.
//!
//! Every connect spawns a fresh fake server on an in-memory duplex pipe. The
//! servers share one transcript so tests can count sessions and commands.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use mailpost_core::{OutcomeKind, RetryPolicy, SubmitConfig, Submitter};
use mailpost_smtp::{Address, ClientConfig, ConnectionState, Connector, Dsn};

/// Spawns a fake server per connect.
#[derive(Clone, Default)]
struct FakeServer {
    transcript: Arc<Mutex<Vec<String>>>,
    sessions: Arc<AtomicU32>,
    /// Number of sessions that reject the recipient before one accepts.
    reject_rcpt: u32,
}

impl FakeServer {
    fn transcript(&self) -> Vec<String> {
        self.transcript.lock().unwrap().clone()
    }

    fn count(&self, verb: &str) -> usize {
        self.transcript()
            .iter()
            .filter(|line| line.starts_with(verb))
            .count()
    }
}

impl Connector for FakeServer {
    type Stream = DuplexStream;

    fn connect(
        &self,
        _host: &str,
        _port: u16,
    ) -> impl Future<Output = io::Result<DuplexStream>> + Send {
        let session = self.sessions.fetch_add(1, Ordering::SeqCst);
        let reject = session < self.reject_rcpt;
        let (near, far) = tokio::io::duplex(4096);
        tokio::spawn(serve(far, reject, Arc::clone(&self.transcript)));
        async move { Ok(near) }
    }
}

async fn serve(stream: DuplexStream, reject_rcpt: bool, transcript: Arc<Mutex<Vec<String>>>) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    if write.write_all(b"220 fake.local ESMTP\r\n").await.is_err() {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        transcript.lock().unwrap().push(line.clone());
        let verb = line.split([' ', ':']).next().unwrap_or_default().to_string();

        let reply: &[u8] = match verb.as_str() {
            "EHLO" => b"250-fake.local\r\n250-DSN\r\n250 8BITMIME\r\n",
            "HELO" => b"250 fake.local\r\n",
            "MAIL" | "RSET" => b"250 ok\r\n",
            "RCPT" if reject_rcpt => b"451 greylisted\r\n",
            "RCPT" => b"250 ok\r\n",
            "DATA" => {
                if write.write_all(b"354 go ahead\r\n").await.is_err() {
                    return;
                }
                while let Ok(Some(body)) = lines.next_line().await {
                    if body == "." {
                        break;
                    }
                }
                b"250 queued\r\n"
            }
            "QUIT" => {
                let _ = write.write_all(b"221 bye\r\n").await;
                return;
            }
            _ => b"500 unknown\r\n",
        };
        if write.write_all(reply).await.is_err() {
            return;
        }
    }
}

fn config(policy: RetryPolicy, streaming: bool) -> SubmitConfig {
    let client = ClientConfig::builder()
        .timeout(Duration::from_secs(5))
        .extensions(true)
        .helo_host("client.local")
        .build();
    SubmitConfig::builder("fake.local")
        .policy(policy)
        .streaming(streaming)
        .retry_delay(Duration::from_millis(1))
        .client(client)
        .build()
}

fn addresses() -> (Address, Address) {
    (
        Address::new("sender@example.com").unwrap(),
        Address::new("rcpt@example.com").unwrap(),
    )
}

#[tokio::test]
async fn test_streaming_session_sends_several_messages() {
    let server = FakeServer::default();
    let mut submitter =
        Submitter::with_connector(config(RetryPolicy::Touchy, true), server.clone()).unwrap();
    let (from, to) = addresses();

    for n in 1..=3 {
        let mut bodies = [Some(&b"Subject: test\r\n\r\nbody\r\n"[..])];
        let outcome = submitter
            .measured_submit(&from, &to, &mut bodies)
            .await
            .unwrap();
        assert!(outcome.is_pass(), "message {n}: {outcome:?}");
        assert_eq!(submitter.stream_sent(), n);
    }

    submitter.quit().await;
    assert_eq!(submitter.client().state(), ConnectionState::Fresh);
    assert_eq!(server.sessions.load(Ordering::SeqCst), 1);
    assert_eq!(server.count("EHLO"), 1);
    assert_eq!(server.count("RSET"), 3);
    assert_eq!(server.count("QUIT"), 1);
}

#[tokio::test]
async fn test_tolerant_policy_outlasts_greylisting() {
    let server = FakeServer {
        reject_rcpt: 2,
        ..FakeServer::default()
    };
    let mut submitter =
        Submitter::with_connector(config(RetryPolicy::Tolerant, false), server.clone()).unwrap();
    let (from, to) = addresses();

    let mut bodies = [Some(&b"hello\r\n"[..])];
    let outcome = submitter
        .measured_submit(&from, &to, &mut bodies)
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Pass);
    assert_eq!(server.sessions.load(Ordering::SeqCst), 3);
    assert_eq!(server.count("RCPT"), 3);
    assert_eq!(server.count("DATA"), 1);
}

#[tokio::test]
async fn test_touchy_policy_reports_greylisting() {
    let server = FakeServer {
        reject_rcpt: 1,
        ..FakeServer::default()
    };
    let mut submitter =
        Submitter::with_connector(config(RetryPolicy::Touchy, false), server.clone()).unwrap();
    let (from, to) = addresses();

    let mut bodies = [Some(&b"hello\r\n"[..])];
    let outcome = submitter
        .measured_submit(&from, &to, &mut bodies)
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Fail);
    assert_eq!(outcome.attributes.status, Some(451));
    assert_eq!(server.sessions.load(Ordering::SeqCst), 1);
    assert_eq!(server.count("DATA"), 0);
}

#[tokio::test]
async fn test_dsn_from_json_config_reaches_the_wire() {
    let mut config = SubmitConfig::from_json(
        r#"{
            "host": "fake.local",
            "extensions": true,
            "helo_host": "client.local",
            "dsn": "HDRS`job-7``TRUE`TRUE``"
        }"#,
    )
    .unwrap();
    config.policy = RetryPolicy::Touchy;

    let server = FakeServer::default();
    let mut submitter = Submitter::with_connector(config, server.clone()).unwrap();
    let (from, to) = addresses();

    let mut bodies = [Some(&b"hello\r\n"[..])];
    let outcome = submitter
        .measured_submit(&from, &to, &mut bodies)
        .await
        .unwrap();

    assert!(outcome.is_pass());
    assert_eq!(outcome.attributes.correlation_id, "job-7");

    let transcript = server.transcript();
    assert!(
        transcript.contains(&"MAIL FROM:<sender@example.com> RET=HDRS ENVID=job-7".to_string()),
        "{transcript:?}"
    );
    assert!(
        transcript.contains(&"RCPT TO:<rcpt@example.com> NOTIFY=SUCCESS,FAILURE".to_string()),
        "{transcript:?}"
    );
}

#[tokio::test]
async fn test_dsn_struct_config_without_extensions() {
    let dsn = Dsn::builder().ret("FULL").envid("plain-1").build();
    let mut config = config(RetryPolicy::Touchy, false);
    config.client.extensions = false;
    config.dsn = Some(dsn);

    let server = FakeServer::default();
    let mut submitter = Submitter::with_connector(config, server.clone()).unwrap();
    let (from, to) = addresses();

    let mut bodies = [Some(&b"hello\r\n"[..])];
    submitter
        .measured_submit(&from, &to, &mut bodies)
        .await
        .unwrap();

    let transcript = server.transcript();
    assert_eq!(transcript[0], "HELO client.local");
    assert_eq!(transcript[1], "MAIL FROM:<sender@example.com>");
}

#[tokio::test]
async fn test_dsn_envid_line_break_cannot_inject_commands() {
    let dsn = Dsn::builder().envid("x\r\nRSET").orcpt("a b@example.com").build();
    let mut config = config(RetryPolicy::Touchy, false);
    config.dsn = Some(dsn);

    let server = FakeServer::default();
    let mut submitter = Submitter::with_connector(config, server.clone()).unwrap();
    let (from, to) = addresses();

    let mut bodies = [Some(&b"hello\r\n"[..])];
    let outcome = submitter
        .measured_submit(&from, &to, &mut bodies)
        .await
        .unwrap();

    assert!(outcome.is_pass(), "{outcome:?}");
    let transcript = server.transcript();
    assert!(
        transcript.contains(&"MAIL FROM:<sender@example.com> ENVID=x+0D+0ARSET".to_string()),
        "{transcript:?}"
    );
    assert!(
        transcript.contains(&"RCPT TO:<rcpt@example.com> ORCPT=rfc822;a+20b@example.com".to_string()),
        "{transcript:?}"
    );
    assert_eq!(server.count("RSET"), 0);
}
