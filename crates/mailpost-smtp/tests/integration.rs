//! Integration tests for the SMTP client.
//!
//! A small scripted server runs on the far end of an in-memory duplex pipe,
//! so full sessions can be exercised without a network.

use std::future::Future;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

use mailpost_smtp::{
    Address, Client, ClientConfig, ConnectionState, Connector, Dsn, Error, ReplyCode,
};

/// Connector that hands out one pre-made duplex stream.
struct Pipe(Mutex<Option<DuplexStream>>);

impl Connector for Pipe {
    type Stream = DuplexStream;

    fn connect(
        &self,
        _host: &str,
        _port: u16,
    ) -> impl Future<Output = io::Result<DuplexStream>> + Send {
        let next = self.0.lock().unwrap().take();
        async move { next.ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "used")) }
    }
}

/// Replies the fake server gives.
#[derive(Clone, Copy)]
struct Script {
    greeting: &'static [u8],
    ehlo: &'static [u8],
    rcpt: &'static [u8],
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: b"220 fake.local ESMTP\r\n",
            ehlo: b"250-fake.local\r\n250-DSN\r\n250 SIZE 1000\r\n",
            rcpt: b"250 recipient ok\r\n",
        }
    }
}

/// Runs a fake server; resolves to every line it received.
fn serve(stream: DuplexStream, script: Script) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        let mut seen = Vec::new();

        if write.write_all(script.greeting).await.is_err() {
            return seen;
        }

        while let Ok(Some(line)) = lines.next_line().await {
            seen.push(line.clone());
            let verb = line
                .split([' ', ':'])
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();

            let reply: &[u8] = match verb.as_str() {
                "EHLO" => script.ehlo,
                "HELO" => b"250 fake.local\r\n",
                "MAIL" | "RSET" => b"250 ok\r\n",
                "RCPT" => script.rcpt,
                "DATA" => {
                    write.write_all(b"354 end with <CRLF>.<CRLF>\r\n").await.unwrap();
                    while let Ok(Some(body)) = lines.next_line().await {
                        let end = body == ".";
                        seen.push(body);
                        if end {
                            break;
                        }
                    }
                    b"250 queued as 7\r\n"
                }
                "QUIT" => {
                    let _ = write.write_all(b"221 bye\r\n").await;
                    break;
                }
                _ => b"500 unknown\r\n",
            };
            if write.write_all(reply).await.is_err() {
                break;
            }
        }
        seen
    })
}

fn client(extensions: bool, script: Script) -> (Client<Pipe>, JoinHandle<Vec<String>>) {
    let (near, far) = tokio::io::duplex(4096);
    let server = serve(far, script);
    let config = ClientConfig::builder()
        .timeout(Duration::from_secs(5))
        .extensions(extensions)
        .helo_host("client.local")
        .build();
    (
        Client::with_connector(config, Pipe(Mutex::new(Some(near)))),
        server,
    )
}

#[tokio::test]
async fn test_esmtp_session_with_dsn() {
    let (mut client, server) = client(true, Script::default());
    let dsn = Dsn::builder()
        .ret("FULL")
        .envid("batch-1")
        .notify_success(true)
        .notify_failure(true)
        .orcpt("rcpt@example.com")
        .build();

    client.connect("fake.local", 25).await.unwrap();
    let replies = client.login().await.unwrap();
    assert_eq!(replies.len(), 3);
    assert!(client.dsn_enabled());

    let from = Address::new("sender@example.com").unwrap();
    let to = Address::new("rcpt@example.com").unwrap();
    client.sender(&from, Some(&dsn)).await.unwrap();
    client.recipient(&to, Some(&dsn)).await.unwrap();

    let mut bodies = [
        Some(&b"Subject: hi\r\n\r\n"[..]),
        Some(&b".leading dot\r\nlast line"[..]),
    ];
    let reply = client.send_data(&mut bodies).await.unwrap();
    assert_eq!(reply.code(), ReplyCode::OK);
    assert_eq!(reply.text(), "queued as 7");
    assert!(reply.size().unwrap() > 0);

    client.done().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Fresh);

    let seen = server.await.unwrap();
    assert_eq!(seen[0], "EHLO client.local");
    assert_eq!(
        seen[1],
        "MAIL FROM:<sender@example.com> RET=FULL ENVID=batch-1"
    );
    assert_eq!(
        seen[2],
        "RCPT TO:<rcpt@example.com> NOTIFY=SUCCESS,FAILURE ORCPT=rfc822;rcpt@example.com"
    );
    assert!(seen.contains(&"..leading dot".to_string()));
    assert!(seen.contains(&"last line".to_string()));
    assert_eq!(seen.last().unwrap(), "QUIT");
}

#[tokio::test]
async fn test_helo_session_ignores_dsn() {
    let (mut client, server) = client(false, Script::default());
    let dsn = Dsn::builder().ret("HDRS").build();

    client.connect("fake.local", 25).await.unwrap();
    let replies = client.login().await.unwrap();
    assert_eq!(replies.len(), 1);
    assert!(!client.dsn_enabled());

    let from = Address::null();
    client.sender(&from, Some(&dsn)).await.unwrap();
    client.done().await.unwrap();

    let seen = server.await.unwrap();
    assert_eq!(seen, vec!["HELO client.local", "MAIL FROM:<>", "QUIT"]);
}

#[tokio::test]
async fn test_recipient_rejected_then_reset() {
    let script = Script {
        rcpt: b"550 5.1.1 no such user\r\n",
        ..Script::default()
    };
    let (mut client, server) = client(false, script);

    client.connect("fake.local", 25).await.unwrap();
    client.login().await.unwrap();
    let from = Address::new("sender@example.com").unwrap();
    let to = Address::new("ghost@example.com").unwrap();
    client.sender(&from, None).await.unwrap();

    let reply = client.recipient(&to, None).await.unwrap();
    assert!(reply.is_failure());
    assert_eq!(client.state(), ConnectionState::MailFromDone);

    client.reset().await.unwrap();
    assert_eq!(client.state(), ConnectionState::LoginComplete);
    client.done().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_thrashing_greeting_poisons_client() {
    let script = Script {
        greeting: b"220 hi\r\r\r\r\r\r\r\r\r\r\n",
        ..Script::default()
    };
    let (mut client, server) = client(false, script);

    let err = client.connect("fake.local", 25).await.unwrap_err();
    assert!(matches!(err, Error::ReplyThrashing(_)));
    assert_eq!(client.state(), ConnectionState::Bad);

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Fresh);
    server.await.unwrap();
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let (near, _far) = tokio::io::duplex(64);
    let config = ClientConfig::builder()
        .timeout(Duration::from_millis(30))
        .build();
    let mut client = Client::with_connector(config, Pipe(Mutex::new(Some(near))));

    let err = client.connect("fake.local", 25).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { transferred: 0, .. }));
    assert_eq!(client.state(), ConnectionState::Bad);
}
