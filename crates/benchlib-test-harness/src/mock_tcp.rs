//! Loopback SCPI peer for testing `TcpChannel` and the link over a real socket.
//!
//! [`MockTcpServer`] binds an ephemeral port on localhost, accepts one
//! client and then walks a script of line-oriented request/response pairs.
//!
//! # Example
//!
//! ```
//! use benchlib_test_harness::MockTcpServer;
//!
//! # async fn example() -> benchlib_core::Result<()> {
//! let mut server = MockTcpServer::new().await?;
//! server.expect("*IDN?", b"TEKTRONIX,DPO7254,B012345,CF:91.1CT\n");
//! server.start();
//! // connect a TcpChannel to server.host():server.port() ...
//! server.wait().await.expect("script completed");
//! # Ok(())
//! # }
//! ```

use benchlib_core::error::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct Step {
    /// Command line the client must send, without terminator.
    request: String,
    /// Bytes written back; empty for commands without a reply.
    response: Vec<u8>,
}

/// A scripted SCPI peer on a loopback socket.
pub struct MockTcpServer {
    listener: Option<TcpListener>,
    port: u16,
    script: Vec<Step>,
    task: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockTcpServer {
    /// Bind a listener on an ephemeral localhost port.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock TCP server: {e}")))?;
        let port = listener.local_addr().map_err(Error::Io)?.port();
        Ok(Self {
            listener: Some(listener),
            port,
            script: Vec::new(),
            task: None,
        })
    }

    /// Append a step: when the client sends the line `request`, reply with
    /// `response`.
    pub fn expect(&mut self, request: &str, response: &[u8]) {
        self.script.push(Step {
            request: request.to_string(),
            response: response.to_vec(),
        });
    }

    pub fn host(&self) -> &str {
        "127.0.0.1"
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address in the `TCPIP::<ip>:<port>` form accepted by the channel factory.
    pub fn address(&self) -> String {
        format!("TCPIP::127.0.0.1:{}", self.port)
    }

    /// Start serving the script to the first client that connects.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let script = std::mem::take(&mut self.script);

        self.task = Some(tokio::spawn(async move {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {e}"))?;
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            for (i, step) in script.iter().enumerate() {
                let mut line = String::new();
                let n = reader
                    .read_line(&mut line)
                    .await
                    .map_err(|e| format!("step {i}: read error: {e}"))?;
                if n == 0 {
                    return Err(format!("step {i}: client disconnected, expected {:?}", step.request));
                }

                let got = line.trim_end_matches(['\r', '\n']);
                if got != step.request {
                    return Err(format!(
                        "step {i}: request mismatch: expected {:?}, got {:?}",
                        step.request, got
                    ));
                }

                if !step.response.is_empty() {
                    write_half
                        .write_all(&step.response)
                        .await
                        .map_err(|e| format!("step {i}: write error: {e}"))?;
                    write_half
                        .flush()
                        .await
                        .map_err(|e| format!("step {i}: flush error: {e}"))?;
                }
            }
            Ok(())
        }));
    }

    /// Wait until the script has been served and report any mismatch.
    pub async fn wait(self) -> std::result::Result<(), String> {
        match self.task {
            Some(task) => task.await.map_err(|e| format!("server task panicked: {e}"))?,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_core::transport::TransportChannel;
    use benchlib_transport::TcpChannel;
    use std::time::Duration;

    #[tokio::test]
    async fn serves_script_to_tcp_channel() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect("*CLS", b"");
        server.expect("*IDN?", b"CHROMA,63600,0,1.0\n");
        server.start();

        let mut channel = TcpChannel::new(server.host(), server.port());
        channel.open().await.unwrap();
        channel.write(b"*CLS\n").await.unwrap();
        channel.write(b"*IDN?\n").await.unwrap();
        let reply = channel.read(256, Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply, b"CHROMA,63600,0,1.0\n");
        channel.close().await.unwrap();

        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn reports_mismatch() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect("OUTPut ON", b"");
        server.start();

        let mut channel = TcpChannel::new(server.host(), server.port());
        channel.open().await.unwrap();
        channel.write(b"OUTPut OFF\n").await.unwrap();

        let err = server.wait().await.unwrap_err();
        assert!(err.contains("request mismatch"));
    }
}
