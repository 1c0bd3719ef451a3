//! Socket establishment.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Opens byte streams to a server.
///
/// The client owns one connector and calls it on every `connect`, so tests
/// can hand out in-memory streams in place of sockets.
pub trait Connector {
    /// Stream type produced.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Opens a stream to `host:port`.
    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, host: &str, port: u16) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let addr = format!("{host}:{port}");
        async move {
            let stream = TcpStream::connect(&addr).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }
}
