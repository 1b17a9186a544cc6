//! TCP transport channel for LAN instruments.
//!
//! Most bench instruments with an Ethernet port accept raw SCPI on a plain
//! TCP socket (port 5025 by convention, 4000 on many Tektronix scopes).
//! [`TcpChannel`] holds the endpoint and connects lazily on
//! [`open`](TransportChannel::open).
//!
//! # Example
//!
//! ```no_run
//! use benchlib_core::TransportChannel;
//! use benchlib_transport::TcpChannel;
//! use std::time::Duration;
//!
//! # async fn example() -> benchlib_core::Result<()> {
//! let mut channel = TcpChannel::new("192.168.1.100", 5025);
//! channel.open().await?;
//! channel.write(b"*IDN?\n").await?;
//! let reply = channel.read(256, Duration::from_secs(2)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use benchlib_core::error::{Error, Result};
use benchlib_core::transport::{ChannelKind, DEFAULT_IO_TIMEOUT, TransportChannel};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// TCP channel to one instrument.
#[derive(Debug)]
pub struct TcpChannel {
    host: String,
    port: u16,
    /// `host:port`, used for connecting and logging.
    endpoint: String,
    /// The underlying TCP stream, `None` while closed.
    stream: Option<TcpStream>,
    /// Bound on connect and write; reads take their own timeout.
    io_timeout: Duration,
    last_error: Option<String>,
}

impl TcpChannel {
    /// Create a closed channel for `host:port`.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            endpoint: format!("{host}:{port}"),
            stream: None,
            io_timeout: DEFAULT_IO_TIMEOUT,
            last_error: None,
        }
    }

    /// Override the connect/write timeout (default 3 s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Wrap an already-connected `TcpStream`.
    ///
    /// Useful when the connection was accepted from a listener in tests.
    pub fn from_stream(stream: TcpStream, endpoint: String) -> Self {
        tracing::debug!(addr = %endpoint, "Wrapping existing TCP stream");
        let (host, port) = match stream.peer_addr() {
            Ok(peer) => (peer.ip().to_string(), peer.port()),
            Err(_) => (endpoint.clone(), 0),
        };
        Self {
            host,
            port,
            endpoint,
            stream: Some(stream),
            io_timeout: DEFAULT_IO_TIMEOUT,
            last_error: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Record `msg` as the last error and turn it into a transport error.
    fn fail(&mut self, msg: String) -> Error {
        tracing::warn!(addr = %self.endpoint, error = %msg, "TCP channel error");
        self.last_error = Some(msg.clone());
        Error::Transport(msg)
    }
}

#[async_trait]
impl TransportChannel for TcpChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Tcp
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            self.last_error = None;
            return Ok(());
        }

        tracing::debug!(
            addr = %self.endpoint,
            timeout_ms = self.io_timeout.as_millis(),
            "Connecting to TCP endpoint"
        );

        let result =
            tokio::time::timeout(self.io_timeout, TcpStream::connect(self.endpoint.as_str())).await;
        let cause = match result {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::warn!(
                        addr = %self.endpoint,
                        error = %e,
                        "Failed to set TCP_NODELAY (continuing anyway)"
                    );
                }
                tracing::info!(addr = %self.endpoint, "TCP connection established");
                self.stream = Some(stream);
                self.last_error = None;
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "connection timed out".to_string(),
        };

        Err(self.fail(format!(
            "TCP connect failed: {}:{} [{}]",
            self.host, self.port, cause
        )))
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };

        tracing::debug!(addr = %self.endpoint, "Closing TCP connection");

        if let Err(e) = stream.flush().await {
            tracing::warn!(
                addr = %self.endpoint,
                error = %e,
                "Failed to flush before closing (continuing anyway)"
            );
        }

        match stream.shutdown().await {
            Ok(()) => {
                tracing::info!(addr = %self.endpoint, "TCP connection closed");
                self.last_error = None;
                Ok(())
            }
            // The peer may already have gone; the socket is released either way.
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {
                self.last_error = None;
                Ok(())
            }
            Err(e) => Err(self.fail(format!("TCP close failed: {e}"))),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let timeout = self.io_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.fail("TCP socket not open".into()));
        };

        tracing::trace!(addr = %self.endpoint, bytes = data.len(), data = ?data, "Sending data");

        let result = tokio::time::timeout(timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.last_error = None;
                Ok(data.len())
            }
            Ok(Err(e)) => Err(self.fail(format!("TCP write failed: {e}"))),
            Err(_) => Err(self.fail("TCP write timeout".into())),
        }
    }

    async fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.fail("TCP socket not open".into()));
        };

        let mut buf = vec![0u8; max_len];
        let result = tokio::time::timeout(timeout, stream.read(&mut buf)).await;
        match result {
            Ok(Ok(0)) => {
                // Zero bytes on a TCP stream means the peer closed it.
                tracing::warn!(addr = %self.endpoint, "Peer closed connection (0 bytes read)");
                self.stream = None;
                Err(self.fail("TCP read failed or no data".into()))
            }
            Ok(Ok(n)) => {
                buf.truncate(n);
                tracing::trace!(addr = %self.endpoint, bytes = n, data = ?buf, "Received data");
                self.last_error = None;
                Ok(buf)
            }
            Ok(Err(e)) => Err(self.fail(format!("TCP read failed: {e}"))),
            Err(_) => Err(self.fail("TCP read timeout".into())),
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        if self.stream.is_some() {
            tracing::debug!(addr = %self.endpoint, "TcpChannel dropped, closing connection");
        }
    }
}
