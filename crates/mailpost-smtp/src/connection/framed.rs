//! Framed I/O for the SMTP protocol.
//!
//! Every network wait is bounded twice: by the configured timeout and by
//! the client's cancellation token. Reads are fed byte by byte into a
//! [`ReplyDecoder`]; writes go straight to the underlying stream.

#![allow(clippy::missing_errors_doc)]

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::ClientConfig;
use super::stuffing::{DotStuffer, TERMINATOR};
use crate::cancel::CancelToken;
use crate::error::{Error, Phase, Result};
use crate::parser::{Line, ReplyDecoder};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Body bytes read from a source per write.
const BODY_CHUNK_SIZE: usize = 16 * 1024;

/// Runs `op` under `limit` and `cancel`.
///
/// Returns `Ok(None)` when the limit elapses first.
pub async fn bounded<T, F>(cancel: &CancelToken, limit: Duration, op: F) -> Result<Option<T>>
where
    F: Future<Output = io::Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        outcome = tokio::time::timeout(limit, op) => match outcome {
            Ok(result) => Ok(Some(result?)),
            Err(_elapsed) => Ok(None),
        },
    }
}

/// Framed connection for the SMTP protocol.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    decoder: ReplyDecoder,
    cancel: CancelToken,
    timeout: Duration,
    read_retries: u32,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S, config: &ClientConfig, cancel: CancelToken) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            decoder: ReplyDecoder::new(config.tolerance),
            cancel,
            timeout: config.timeout,
            read_retries: config.read_retries,
        }
    }

    /// Reads the lines of one complete reply.
    ///
    /// A final line followed by already-buffered lines with the same code
    /// does not end the reply.
    pub async fn read_reply(&mut self, phase: Phase) -> Result<Vec<Line>> {
        self.decoder.reset();
        let mut lines = Vec::new();
        let mut transferred = 0u64;

        loop {
            let Some(byte) = self.read_byte(phase, transferred).await? else {
                return Err(Error::ConnectionClosed);
            };
            transferred += 1;

            if let Some(mut line) = self.decoder.push(byte)? {
                if self.decoder.resume(&mut line, self.reader.buffer())? {
                    tracing::warn!(code = %line.code, text = %line.text, "continuation dash missing");
                }
                tracing::trace!(code = %line.code, text = %line.text, last = line.last, "<<");
                let last = line.last;
                lines.push(line);
                if last {
                    return Ok(lines);
                }
            }
        }
    }

    /// Reads one byte, or `None` at end of stream.
    async fn read_byte(&mut self, phase: Phase, transferred: u64) -> Result<Option<u8>> {
        if let Some(&byte) = self.reader.buffer().first() {
            self.reader.consume(1);
            return Ok(Some(byte));
        }

        let mut retries = 0;
        loop {
            let next = bounded(&self.cancel, self.timeout, self.reader.fill_buf())
                .await?
                .map(|buf| buf.first().copied());

            match next {
                Some(Some(byte)) => {
                    self.reader.consume(1);
                    return Ok(Some(byte));
                }
                Some(None) => return Ok(None),
                None if retries < self.read_retries => {
                    retries += 1;
                    tracing::debug!(retries, transferred, %phase, "read timed out, retrying");
                }
                None => return Err(Error::Timeout { phase, transferred }),
            }
        }
    }

    /// Writes `data` in full.
    ///
    /// `sent` is the running tally reported if the write times out.
    pub async fn write_all(&mut self, data: &[u8], phase: Phase, sent: u64) -> Result<()> {
        let stream = self.reader.get_mut();
        match bounded(&self.cancel, self.timeout, stream.write_all(data)).await? {
            Some(()) => Ok(()),
            None => Err(Error::Timeout {
                phase,
                transferred: sent,
            }),
        }
    }

    /// Flushes buffered writes.
    pub async fn flush(&mut self, phase: Phase, sent: u64) -> Result<()> {
        let stream = self.reader.get_mut();
        match bounded(&self.cancel, self.timeout, stream.flush()).await? {
            Some(()) => Ok(()),
            None => Err(Error::Timeout {
                phase,
                transferred: sent,
            }),
        }
    }

    /// Writes a command line and flushes it.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        self.write_all(data, Phase::Reply, 0).await?;
        self.flush(Phase::Reply, data.len() as u64).await
    }

    /// Streams message bodies, dot-stuffed, followed by the end-of-data
    /// marker. Empty slots are skipped.
    ///
    /// Returns the number of bytes put on the wire.
    pub async fn write_body<R>(&mut self, bodies: &mut [Option<R>]) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut stuffer = DotStuffer::new();
        let mut chunk = vec![0u8; BODY_CHUNK_SIZE];
        let mut out = BytesMut::with_capacity(BODY_CHUNK_SIZE * 2);
        let mut sent = 0u64;

        for body in bodies.iter_mut().flatten() {
            loop {
                let Some(n) = bounded(&self.cancel, self.timeout, body.read(&mut chunk)).await?
                else {
                    return Err(Error::Timeout {
                        phase: Phase::Body,
                        transferred: sent,
                    });
                };
                if n == 0 {
                    break;
                }

                out.clear();
                stuffer.stuff(&chunk[..n], &mut out);
                self.write_all(&out, Phase::Body, sent).await?;
                sent += out.len() as u64;
            }
        }

        self.write_all(TERMINATOR, Phase::Body, sent).await?;
        sent += TERMINATOR.len() as u64;
        self.flush(Phase::Body, sent).await?;

        tracing::trace!(sent, "body written");
        Ok(sent)
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
    use tokio_test::io::Builder;

    fn config() -> ClientConfig {
        ClientConfig::builder()
            .timeout(Duration::from_millis(50))
            .build()
    }

    #[tokio::test]
    async fn test_read_reply_across_reads() {
        let mock = Builder::new().read(b"250-first\r\n").read(b"250 second\r\n").build();
        let mut framed = FramedStream::new(mock, &config(), CancelToken::never());

        let lines = framed.read_reply(Phase::Reply).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "second");
        assert!(lines[1].last);
    }

    #[tokio::test]
    async fn test_buffered_same_code_line_extends_reply() {
        let mock = Builder::new()
            .read(b"250-mx\r\n250 SIZE 100\r\n250 HELP\r\n354 go\r\n")
            .build();
        let mut framed = FramedStream::new(mock, &config(), CancelToken::never());

        let lines = framed.read_reply(Phase::Reply).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].broken);
        assert_eq!(lines[2].text, "HELP");

        let lines = framed.read_reply(Phase::Reply).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].code.as_u16(), 354);
    }

    #[tokio::test]
    async fn test_eof_mid_reply() {
        let mock = Builder::new().read(b"250-first\r\n250 sec").build();
        let mut framed = FramedStream::new(mock, &config(), CancelToken::never());

        let err = framed.read_reply(Phase::Reply).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_write_command() {
        let mock = Builder::new().write(b"RSET\r\n").build();
        let mut framed = FramedStream::new(mock, &config(), CancelToken::never());
        framed.write_command(b"RSET\r\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_body_stuffs_and_terminates() {
        let mock = Builder::new()
            .write(b"Subject: x\r\n\r\n..dot\r\n")
            .write(b"tail")
            .write(b"\r\n.\r\n")
            .build();
        let mut framed = FramedStream::new(mock, &config(), CancelToken::never());

        let mut bodies = [
            Some(&b"Subject: x\r\n\r\n.dot\r\n"[..]),
            None,
            Some(&b"tail"[..]),
        ];
        let sent = framed.write_body(&mut bodies).await.unwrap();
        assert_eq!(sent, 21 + 4 + 5);
    }

    #[tokio::test]
    async fn test_read_timeout_reports_tally() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(b"250-par").await.unwrap();
        let mut framed = FramedStream::new(client, &config(), CancelToken::never());

        let err = framed.read_reply(Phase::DataReply).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                phase: Phase::DataReply,
                transferred: 7
            }
        ));
    }

    #[tokio::test]
    async fn test_read_retry_outlasts_slow_server() {
        let config = ClientConfig::builder()
            .timeout(Duration::from_millis(50))
            .read_retries(4)
            .build();
        let mock = Builder::new()
            .wait(Duration::from_millis(120))
            .read(b"220 ready\r\n")
            .build();
        let mut framed = FramedStream::new(mock, &config, CancelToken::never());

        let lines = framed.read_reply(Phase::Reply).await.unwrap();
        assert_eq!(lines[0].code.as_u16(), 220);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_read() {
        let (canceller, token) = crate::cancel::pair();
        let (client, _server) = tokio::io::duplex(64);
        let config = ClientConfig::builder()
            .timeout(Duration::from_secs(30))
            .build();
        let mut framed = FramedStream::new(client, &config, token);

        canceller.cancel();
        let err = framed.read_reply(Phase::Reply).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
