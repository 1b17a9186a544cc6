//! Command/query link on top of a transport channel.
//!
//! Every failing call records a message in [`InstrumentLink::last_error`]
//! and returns an [`Error`] whose [`kind`](Error::kind) tells transport,
//! framing, and parse failures apart. A successful call clears the message.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::Mutex;

use benchlib_core::error::{Error, Result};
use benchlib_core::transport::{ChannelKind, DEFAULT_IO_TIMEOUT, TransportChannel};

use crate::block::{HeaderError, HeaderParse, parse_header};
use crate::response;

/// Default number of bytes requested by the first read of a binary block.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64;

/// Largest single payload read while receiving a binary block.
const PAYLOAD_CHUNK: usize = 64 * 1024;

/// Read bound for numeric replies.
const NUMERIC_REPLY_MAX: usize = 64;

/// Read bound for string replies.
const STRING_REPLY_MAX: usize = 256;

/// A link shared by the capabilities built on one connection.
pub type SharedLink = Arc<Mutex<InstrumentLink>>;

/// SCPI command/query protocol over one exclusively owned channel.
pub struct InstrumentLink {
    channel: Box<dyn TransportChannel>,
    timeout: Duration,
    last_error: Option<String>,
}

impl InstrumentLink {
    pub fn new(channel: Box<dyn TransportChannel>) -> Self {
        Self {
            channel,
            timeout: DEFAULT_IO_TIMEOUT,
            last_error: None,
        }
    }

    /// Override the per-read timeout (default 3 s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Wrap the link for sharing between capabilities.
    pub fn shared(self) -> SharedLink {
        Arc::new(Mutex::new(self))
    }

    pub fn endpoint(&self) -> &str {
        self.channel.endpoint()
    }

    pub fn kind(&self) -> ChannelKind {
        self.channel.kind()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_open()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn record(&mut self, err: Error) -> Error {
        let msg = match &err {
            Error::Transport(m) | Error::Protocol(m) | Error::Parse(m) | Error::Connection(m) => {
                m.clone()
            }
            other => other.to_string(),
        };
        tracing::debug!(addr = %self.channel.endpoint(), error = %msg, "Link error");
        self.last_error = Some(msg);
        err
    }

    /// Open the underlying channel.
    pub async fn connect(&mut self) -> Result<()> {
        let opened = self.channel.open().await;
        match opened {
            Ok(()) => {
                tracing::info!(addr = %self.channel.endpoint(), kind = %self.channel.kind(), "Instrument link connected");
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                let cause = self
                    .channel
                    .last_error()
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string());
                Err(self.record(Error::Connection(format!("Comm open failed: {cause}"))))
            }
        }
    }

    /// Close the underlying channel. A close error is recorded as a warning
    /// but the link is considered disconnected either way.
    pub async fn disconnect(&mut self) -> Result<()> {
        let closed = self.channel.close().await;
        if let Err(e) = closed {
            let msg = format!("Comm close warning: {e}");
            tracing::warn!(addr = %self.channel.endpoint(), "{}", msg);
            self.last_error = Some(msg);
            return Ok(());
        }
        tracing::info!(addr = %self.channel.endpoint(), "Instrument link disconnected");
        self.last_error = None;
        Ok(())
    }

    /// Send one command line.
    pub async fn write(&mut self, cmd: &str) -> Result<()> {
        tracing::debug!(addr = %self.channel.endpoint(), cmd = %cmd, "SCPI write");
        let mut line = Vec::with_capacity(cmd.len() + 1);
        line.extend_from_slice(cmd.as_bytes());
        if !cmd.ends_with('\n') {
            line.push(b'\n');
        }
        let written = self.channel.write(&line).await;
        match written {
            Ok(_) => {
                self.last_error = None;
                Ok(())
            }
            Err(_) => Err(self.record(Error::Transport(format!("Write failed: {cmd}")))),
        }
    }

    /// Read one reply line of at most `max_len` bytes.
    ///
    /// Reads continue until a newline arrives or `max_len` is reached. If a
    /// follow-up read fails after some data arrived, the partial line is
    /// returned.
    async fn read_line(&mut self, cmd: &str, max_len: usize) -> Result<String> {
        let first = self.channel.read(max_len, self.timeout).await;
        let mut buf = match first {
            Ok(data) => data,
            Err(_) => return Err(self.record(Error::Transport(format!("Read failed for: {cmd}")))),
        };
        while !buf.contains(&b'\n') && buf.len() < max_len {
            let more = self.channel.read(max_len - buf.len(), self.timeout).await;
            match more {
                Ok(more) => buf.extend_from_slice(&more),
                Err(_) => break,
            }
        }
        let reply = String::from_utf8_lossy(&buf).into_owned();
        tracing::debug!(addr = %self.channel.endpoint(), cmd = %cmd, reply = %reply.trim_end(), "SCPI reply");
        Ok(reply)
    }

    /// Send `cmd` and parse the reply as a floating-point number.
    pub async fn query_double(&mut self, cmd: &str) -> Result<f64> {
        self.write(cmd).await?;
        let reply = self.read_line(cmd, NUMERIC_REPLY_MAX).await?;
        match response::parse_f64(&reply) {
            Some(v) => {
                self.last_error = None;
                Ok(v)
            }
            None => Err(self.record(Error::Parse(format!(
                "Parse failed (not a number): '{}' from {cmd}",
                reply.trim()
            )))),
        }
    }

    /// Send `cmd` and parse the reply as an integer.
    pub async fn query_int(&mut self, cmd: &str) -> Result<i64> {
        self.write(cmd).await?;
        let reply = self.read_line(cmd, NUMERIC_REPLY_MAX).await?;
        match response::parse_i64(&reply) {
            Some(v) => {
                self.last_error = None;
                Ok(v)
            }
            None => Err(self.record(Error::Parse(format!(
                "Parse failed (not an int): '{}' from {cmd}",
                response::simplified(&reply)
            )))),
        }
    }

    /// Send `cmd` and return the trimmed reply.
    pub async fn query_string(&mut self, cmd: &str) -> Result<String> {
        self.write(cmd).await?;
        let reply = self.read_line(cmd, STRING_REPLY_MAX).await?;
        self.last_error = None;
        Ok(reply.trim().to_string())
    }

    /// [`query_binary_block`](Self::query_binary_block) with the default
    /// header read size.
    pub async fn query_block(&mut self, cmd: &str) -> Result<Bytes> {
        self.query_binary_block(cmd, DEFAULT_MAX_HEADER_BYTES).await
    }

    /// Send `cmd` and receive a definite-length binary block reply.
    ///
    /// On success the returned buffer holds exactly the declared payload;
    /// bytes past the payload (usually a trailing newline) are discarded.
    /// On failure nothing partial is returned.
    pub async fn query_binary_block(&mut self, cmd: &str, max_header_bytes: usize) -> Result<Bytes> {
        self.write(cmd).await?;

        let first_read = max_header_bytes.max(2);
        let first = self.channel.read(first_read, self.timeout).await;
        let mut head = match first {
            Ok(data) => data,
            Err(_) => return Err(self.record(Error::Transport(format!("Read failed for: {cmd}")))),
        };

        let header = loop {
            match parse_header(&head) {
                Ok(HeaderParse::Complete(header)) => break header,
                Ok(HeaderParse::NeedMore(needed)) => {
                    let missing = needed - head.len();
                    let more = self.channel.read(missing, self.timeout).await;
                    match more {
                        Ok(more) => head.extend_from_slice(&more),
                        Err(_) => {
                            return Err(self.record(Error::Transport(
                                "Read failed while completing length digits".into(),
                            )));
                        }
                    }
                }
                Err(HeaderError::NotABlock) => {
                    return Err(self.record(Error::Protocol(format!(
                        "Unexpected response (not a binary block) for: {cmd}"
                    ))));
                }
                Err(e) => return Err(self.record(Error::Protocol(e.to_string()))),
            }
        };

        let total = header.payload_len;
        let mut payload = payload_buffer(total);
        let in_hand = &head[header.header_len()..];
        payload.extend_from_slice(&in_hand[..in_hand.len().min(total)]);

        tracing::debug!(
            addr = %self.channel.endpoint(),
            cmd = %cmd,
            payload_len = total,
            in_hand = payload.len(),
            "Receiving binary block"
        );

        while payload.len() < total {
            let remain = total - payload.len();
            let chunk = self.channel.read(remain.min(PAYLOAD_CHUNK), self.timeout).await;
            match chunk {
                Ok(chunk) => {
                    let take = chunk.len().min(remain);
                    payload.extend_from_slice(&chunk[..take]);
                }
                Err(_) => {
                    return Err(self.record(Error::Transport(format!(
                        "Read failed while receiving payload, remain={remain}"
                    ))));
                }
            }
        }

        self.last_error = None;
        Ok(payload.freeze())
    }
}

/// Buffer for a block payload of `total` bytes. The length comes from the
/// device, so the buffer starts at one chunk and grows as data arrives.
fn payload_buffer(total: usize) -> BytesMut {
    BytesMut::with_capacity(total.min(PAYLOAD_CHUNK))
}

impl std::fmt::Debug for InstrumentLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentLink")
            .field("endpoint", &self.channel.endpoint())
            .field("kind", &self.channel.kind())
            .field("open", &self.channel.is_open())
            .field("last_error", &self.last_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::encode_block;
    use benchlib_core::error::ErrorKind;
    use benchlib_test_harness::{MockChannel, MockHandle, MockTcpServer};
    use benchlib_transport::TcpChannel;

    async fn connected(channel: MockChannel) -> (InstrumentLink, MockHandle) {
        let handle = channel.handle();
        let mut link = InstrumentLink::new(Box::new(channel));
        link.connect().await.unwrap();
        (link, handle)
    }

    #[tokio::test]
    async fn connect_failure_reports_channel_cause() {
        let channel = MockChannel::new("GPIB0::5::INSTR");
        channel.handle().set_fail_open(true);
        let mut link = InstrumentLink::new(Box::new(channel));

        let err = link.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(link.last_error(), Some("Comm open failed: Mock open refused"));
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn write_appends_newline() {
        let (mut link, handle) = connected(MockChannel::lenient("mock")).await;
        link.write("LOAD ON").await.unwrap();
        link.write("LOAD OFF\n").await.unwrap();
        assert_eq!(
            handle.sent_data(),
            vec![b"LOAD ON\n".to_vec(), b"LOAD OFF\n".to_vec()]
        );
    }

    #[tokio::test]
    async fn write_failure_names_command() {
        let (mut link, handle) = connected(MockChannel::lenient("mock")).await;
        handle.fail_writes_containing("CHAN");
        let err = link.write("CHAN 3").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(link.last_error(), Some("Write failed: CHAN 3"));

        handle.clear_write_failures();
        link.write("CHAN 3").await.unwrap();
        assert_eq!(link.last_error(), None);
    }

    #[tokio::test]
    async fn numeric_queries() {
        let channel = MockChannel::new("mock");
        let handle = channel.handle();
        handle.expect(b"MEAS:VOLT:AC?", b"229.87\n");
        handle.expect(b"*OPC?", b" 1 \r\n");
        handle.expect(b"TRIGger:A:MODe?", b"NORMAL\n");
        let (mut link, _) = connected(channel).await;

        assert_eq!(link.query_double("MEAS:VOLT:AC?").await.unwrap(), 229.87);
        assert_eq!(link.query_int("*OPC?").await.unwrap(), 1);
        assert_eq!(link.query_string("TRIGger:A:MODe?").await.unwrap(), "NORMAL");
    }

    #[tokio::test]
    async fn parse_failure_is_distinct_from_transport_failure() {
        let channel = MockChannel::new("mock");
        let handle = channel.handle();
        handle.expect(b"MEAS:FREQuency?", b"N/A\n");
        handle.expect(b"MEAS:FREQuency?", b"");
        let (mut link, _) = connected(channel).await;

        let err = link.query_double("MEAS:FREQuency?").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(
            link.last_error(),
            Some("Parse failed (not a number): 'N/A' from MEAS:FREQuency?")
        );

        let err = link.query_double("MEAS:FREQuency?").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(link.last_error(), Some("Read failed for: MEAS:FREQuency?"));
    }

    #[tokio::test]
    async fn reply_split_across_reads_is_joined() {
        let channel = MockChannel::new("mock");
        let handle = channel.handle();
        handle.set_read_chunk(2);
        handle.expect(b"SOURce:FREQuency?", b"50.000\n");
        let (mut link, _) = connected(channel).await;
        assert_eq!(link.query_double("SOURce:FREQuency?").await.unwrap(), 50.0);
    }

    async fn block_round_trip(len: usize, chunk: Option<usize>) -> Bytes {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut framed = encode_block(&payload).unwrap();
        framed.push(b'\n');

        let channel = MockChannel::new("mock");
        let handle = channel.handle();
        if let Some(n) = chunk {
            handle.set_read_chunk(n);
        }
        handle.expect(b"CURVe?", &framed);
        let (mut link, _) = connected(channel).await;

        let data = link.query_block("CURVe?").await.unwrap();
        assert_eq!(&data[..], &payload[..]);
        data
    }

    #[test_log::test(tokio::test)]
    async fn binary_block_lengths() {
        for len in [0usize, 9, 10, 99, 100, 12345] {
            assert_eq!(block_round_trip(len, None).await.len(), len);
        }
    }

    #[tokio::test]
    async fn binary_block_with_fragmented_header() {
        // One byte per read forces the digit-completion path.
        assert_eq!(block_round_trip(1000, Some(1)).await.len(), 1000);
        assert_eq!(block_round_trip(70_000, Some(3)).await.len(), 70_000);
    }

    #[tokio::test]
    async fn binary_block_header_errors() {
        let cases: [(&[u8], &str); 3] = [
            (b"1.0\n", "Unexpected response (not a binary block) for: CURVe?"),
            (b"#X12\n", "Malformed binary header: ndig not a digit"),
            (b"#0abc\n", "Indefinite-length block (#0) not supported"),
        ];
        for (reply, expected) in cases {
            let channel = MockChannel::new("mock");
            channel.handle().expect(b"CURVe?", reply);
            let (mut link, _) = connected(channel).await;
            let err = link.query_block("CURVe?").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Protocol);
            assert_eq!(link.last_error(), Some(expected));
        }
    }

    #[tokio::test]
    async fn truncated_block_reports_remaining_bytes() {
        let channel = MockChannel::new("mock");
        channel.handle().expect(b"CURVe?", b"#210abcd");
        let (mut link, _) = connected(channel).await;

        let err = link.query_block("CURVe?").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(
            link.last_error(),
            Some("Read failed while receiving payload, remain=6")
        );
    }

    #[tokio::test]
    async fn oversized_declared_length_is_not_preallocated() {
        assert!(payload_buffer(10).capacity() >= 10);
        assert!(payload_buffer(999_999_999).capacity() <= PAYLOAD_CHUNK);

        let channel = MockChannel::new("mock");
        channel.handle().expect(b"CURVe?", b"#9999999999abc");
        let (mut link, _) = connected(channel).await;

        let err = link.query_block("CURVe?").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(
            link.last_error(),
            Some("Read failed while receiving payload, remain=999999995")
        );
    }

    #[tokio::test]
    async fn truncated_length_digits() {
        let channel = MockChannel::new("mock");
        channel.handle().expect(b"CURVe?", b"#41");
        let (mut link, _) = connected(channel).await;

        assert!(link.query_block("CURVe?").await.is_err());
        assert_eq!(
            link.last_error(),
            Some("Read failed while completing length digits")
        );
    }

    #[tokio::test]
    async fn disconnect_always_succeeds() {
        let (mut link, handle) = connected(MockChannel::lenient("mock")).await;
        link.disconnect().await.unwrap();
        assert!(!handle.is_open());
        link.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn block_over_tcp() {
        let payload = vec![0x5Au8; 4096];
        let mut framed = encode_block(&payload).unwrap();
        framed.push(b'\n');

        let mut server = MockTcpServer::new().await.unwrap();
        server.expect("HARDCopy:DATA?", &framed);
        server.start();

        let channel = TcpChannel::new(server.host(), server.port());
        let mut link = InstrumentLink::new(Box::new(channel));
        link.connect().await.unwrap();
        let data = link.query_block("HARDCopy:DATA?").await.unwrap();
        assert_eq!(data.len(), 4096);
        link.disconnect().await.unwrap();

        server.wait().await.unwrap();
    }
}
