//! Mock transport channel for deterministic testing of the protocol layer.
//!
//! [`MockChannel`] implements [`TransportChannel`] in memory. It runs in one
//! of two modes:
//!
//! - **strict** ([`MockChannel::new`]): every write must match the next
//!   queued expectation; its response becomes readable.
//! - **lenient** ([`MockChannel::lenient`]): writes are always accepted and
//!   logged; writes that match a canned reply make that reply readable.
//!
//! Requests are compared with trailing line terminators stripped, so
//! expectations can be written as `b"*IDN?"` even though the link sends
//! `b"*IDN?\n"`.
//!
//! The state lives behind a shared [`MockHandle`], which stays usable after
//! the channel has been moved into an `InstrumentLink`.
//!
//! # Example
//!
//! ```
//! use benchlib_test_harness::MockChannel;
//!
//! let channel = MockChannel::new("GPIB0::5::INSTR");
//! let handle = channel.handle();
//! handle.expect(b"MEAS:VOLT:AC?", b"230.1\n");
//! assert_eq!(handle.remaining_expectations(), 1);
//! ```

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use benchlib_core::error::{Error, Result};
use benchlib_core::transport::{ChannelKind, TransportChannel};
use benchlib_transport::ChannelProvider;

#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    response: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    strict: bool,
    expectations: VecDeque<Expectation>,
    replies: HashMap<Vec<u8>, Vec<u8>>,
    /// Bytes waiting to be read.
    pending: VecDeque<u8>,
    /// Largest number of bytes a single read returns.
    read_chunk: Option<usize>,
    open: bool,
    open_calls: usize,
    close_calls: usize,
    fail_open: bool,
    fail_read: bool,
    /// Writes containing any of these substrings fail.
    fail_writes: Vec<Vec<u8>>,
    sent: Vec<Vec<u8>>,
}

fn strip_terminator(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|b| !matches!(b, b'\n' | b'\r'))
        .map_or(0, |i| i + 1);
    &data[..end]
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Shared view of a [`MockChannel`]'s state.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue an ordered request/response pair.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.lock().expectations.push_back(Expectation {
            request: strip_terminator(request).to_vec(),
            response: response.to_vec(),
        });
    }

    /// Register a reply returned every time `request` is written (lenient mode).
    pub fn reply(&self, request: &[u8], response: &[u8]) {
        self.lock()
            .replies
            .insert(strip_terminator(request).to_vec(), response.to_vec());
    }

    /// Make `data` readable without a preceding write.
    pub fn push_response(&self, data: &[u8]) {
        self.lock().pending.extend(data.iter().copied());
    }

    /// Limit how many bytes a single read returns.
    pub fn set_read_chunk(&self, max: usize) {
        self.lock().read_chunk = Some(max.max(1));
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn set_fail_read(&self, fail: bool) {
        self.lock().fail_read = fail;
    }

    /// Fail every write whose bytes contain `pattern`.
    pub fn fail_writes_containing(&self, pattern: &str) {
        self.lock().fail_writes.push(pattern.as_bytes().to_vec());
    }

    /// Stop failing writes.
    pub fn clear_write_failures(&self) {
        self.lock().fail_writes.clear();
    }

    /// Every successful write, in order.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Every successful write as text, without its line terminator.
    pub fn sent_text(&self) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .map(|s| String::from_utf8_lossy(strip_terminator(s)).into_owned())
            .collect()
    }

    pub fn remaining_expectations(&self) -> usize {
        self.lock().expectations.len()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn open_calls(&self) -> usize {
        self.lock().open_calls
    }

    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    /// Whether the channel itself still exists somewhere.
    ///
    /// Only meaningful when exactly one handle is held, as
    /// [`MockChannelProvider`] does.
    pub fn channel_alive(&self) -> bool {
        Arc::strong_count(&self.state) > 1
    }
}

/// A mock [`TransportChannel`] for testing without hardware.
#[derive(Debug)]
pub struct MockChannel {
    endpoint: String,
    handle: MockHandle,
    last_error: Option<String>,
}

impl MockChannel {
    /// Create a closed strict channel.
    pub fn new(endpoint: &str) -> Self {
        Self::with_mode(endpoint, true)
    }

    /// Create a closed lenient channel.
    pub fn lenient(endpoint: &str) -> Self {
        Self::with_mode(endpoint, false)
    }

    fn with_mode(endpoint: &str, strict: bool) -> Self {
        let state = MockState {
            strict,
            ..Default::default()
        };
        Self {
            endpoint: endpoint.to_string(),
            handle: MockHandle {
                state: Arc::new(Mutex::new(state)),
            },
            last_error: None,
        }
    }

    /// A handle sharing this channel's state.
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    fn fail(&mut self, msg: &str) -> Error {
        self.last_error = Some(msg.to_string());
        Error::Transport(msg.to_string())
    }
}

#[async_trait]
impl TransportChannel for MockChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Mock
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn open(&mut self) -> Result<()> {
        let refused = {
            let mut state = self.handle.lock();
            state.open_calls += 1;
            if !state.fail_open {
                state.open = true;
            }
            state.fail_open
        };
        if refused {
            return Err(self.fail("Mock open refused"));
        }
        self.last_error = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.handle.lock();
        if state.open {
            state.close_calls += 1;
        }
        state.open = false;
        state.pending.clear();
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let outcome = {
            let mut state = self.handle.lock();
            let request = strip_terminator(data).to_vec();
            if !state.open {
                Err("Mock channel not open".to_string())
            } else if state.fail_writes.iter().any(|p| contains(data, p)) {
                Err("Mock write failed".to_string())
            } else if state.strict {
                match state.expectations.pop_front() {
                    Some(exp) if exp.request == request => {
                        state.sent.push(data.to_vec());
                        state.pending.extend(exp.response);
                        Ok(data.len())
                    }
                    Some(exp) => Err(format!(
                        "unexpected write: expected {:?}, got {:?}",
                        String::from_utf8_lossy(&exp.request),
                        String::from_utf8_lossy(&request)
                    )),
                    None => Err("no more expectations in mock channel".to_string()),
                }
            } else {
                state.sent.push(data.to_vec());
                let front_matches = state
                    .expectations
                    .front()
                    .is_some_and(|exp| exp.request == request);
                let matched = if front_matches {
                    state.expectations.pop_front()
                } else {
                    None
                };
                if let Some(exp) = matched {
                    state.pending.extend(exp.response);
                } else if let Some(reply) = state.replies.get(&request).cloned() {
                    state.pending.extend(reply);
                }
                Ok(data.len())
            }
        };

        match outcome {
            Ok(n) => {
                self.last_error = None;
                Ok(n)
            }
            Err(msg) => Err(self.fail(&msg)),
        }
    }

    async fn read(&mut self, max_len: usize, _timeout: Duration) -> Result<Vec<u8>> {
        let outcome = {
            let mut state = self.handle.lock();
            if !state.open {
                Err("Mock channel not open")
            } else if state.fail_read {
                Err("Mock read failed")
            } else if state.pending.is_empty() {
                Err("Mock read timeout")
            } else {
                let n = max_len
                    .min(state.read_chunk.unwrap_or(usize::MAX))
                    .min(state.pending.len());
                Ok(state.pending.drain(..n).collect::<Vec<u8>>())
            }
        };

        match outcome {
            Ok(data) => {
                self.last_error = None;
                Ok(data)
            }
            Err(msg) => Err(self.fail(msg)),
        }
    }

    fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[derive(Debug, Default)]
struct AddressScript {
    reject: bool,
    fail_open: bool,
    replies: Vec<(Vec<u8>, Vec<u8>)>,
    fail_writes: Vec<String>,
}

#[derive(Debug, Default)]
struct ProviderState {
    scripts: HashMap<String, AddressScript>,
    created: Vec<(String, MockHandle)>,
}

/// A [`ChannelProvider`] handing out lenient [`MockChannel`]s.
///
/// Every address is accepted unless [`reject`](Self::reject)ed. The provider
/// keeps one handle per channel it created, so tests can check afterwards
/// what was sent and whether anything was leaked.
#[derive(Debug, Default)]
pub struct MockChannelProvider {
    inner: Mutex<ProviderState>,
}

impl MockChannelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Treat `address` as unrecognized.
    pub fn reject(&self, address: &str) {
        self.lock().scripts.entry(address.to_string()).or_default().reject = true;
    }

    /// Channels for `address` refuse to open.
    pub fn fail_open(&self, address: &str) {
        self.lock().scripts.entry(address.to_string()).or_default().fail_open = true;
    }

    /// Channels for `address` answer `request` with `response`.
    pub fn reply(&self, address: &str, request: &[u8], response: &[u8]) {
        self.lock()
            .scripts
            .entry(address.to_string())
            .or_default()
            .replies
            .push((request.to_vec(), response.to_vec()));
    }

    /// Channels for `address` fail writes containing `pattern`.
    pub fn fail_writes_containing(&self, address: &str, pattern: &str) {
        self.lock()
            .scripts
            .entry(address.to_string())
            .or_default()
            .fail_writes
            .push(pattern.to_string());
    }

    /// Number of channels created so far.
    pub fn created_count(&self) -> usize {
        self.lock().created.len()
    }

    /// Number of created channels that are currently open.
    pub fn open_count(&self) -> usize {
        self.lock().created.iter().filter(|(_, h)| h.is_open()).count()
    }

    /// Number of created channels that have not been dropped.
    pub fn live_count(&self) -> usize {
        self.lock()
            .created
            .iter()
            .filter(|(_, h)| h.channel_alive())
            .count()
    }

    /// Handles of the channels created for `address`, oldest first.
    pub fn handles_for(&self, address: &str) -> Vec<MockHandle> {
        self.lock()
            .created
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, h)| h.clone())
            .collect()
    }

    /// Everything written to channels for `address`, oldest channel first.
    pub fn sent_to(&self, address: &str) -> Vec<String> {
        self.handles_for(address)
            .iter()
            .flat_map(MockHandle::sent_text)
            .collect()
    }
}

impl ChannelProvider for MockChannelProvider {
    fn create(&self, address: &str) -> Option<Box<dyn TransportChannel>> {
        let mut inner = self.lock();
        let channel = MockChannel::lenient(address);
        let handle = channel.handle();

        if let Some(script) = inner.scripts.get(address) {
            if script.reject {
                return None;
            }
            handle.set_fail_open(script.fail_open);
            for (request, response) in &script.replies {
                handle.reply(request, response);
            }
            for pattern in &script.fail_writes {
                handle.fail_writes_containing(pattern);
            }
        }

        tracing::debug!(address = %address, "Mock channel created");
        inner.created.push((address.to_string(), handle));
        Some(Box::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn strict_write_then_read() {
        let mut channel = MockChannel::new("mock");
        channel.handle().expect(b"*IDN?", b"TEKTRONIX,DPO7254\n");
        channel.open().await.unwrap();

        channel.write(b"*IDN?\n").await.unwrap();
        let reply = channel.read(256, T).await.unwrap();
        assert_eq!(reply, b"TEKTRONIX,DPO7254\n");
        assert_eq!(channel.handle().remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn strict_mismatch_is_an_error() {
        let mut channel = MockChannel::new("mock");
        channel.handle().expect(b"LOAD ON", b"");
        channel.open().await.unwrap();

        assert!(channel.write(b"LOAD OFF\n").await.is_err());
        assert!(channel.last_error().unwrap().contains("unexpected write"));
        assert!(channel.write(b"LOAD ON\n").await.is_err());
        assert!(
            channel
                .last_error()
                .unwrap()
                .contains("no more expectations")
        );
    }

    #[tokio::test]
    async fn closed_channel_rejects_io() {
        let mut channel = MockChannel::lenient("mock");
        assert!(channel.write(b"X\n").await.is_err());
        assert_eq!(channel.last_error(), Some("Mock channel not open"));
        assert!(channel.read(4, T).await.is_err());
    }

    #[tokio::test]
    async fn read_without_data_times_out() {
        let mut channel = MockChannel::lenient("mock");
        channel.open().await.unwrap();
        assert!(channel.read(4, T).await.is_err());
        assert_eq!(channel.last_error(), Some("Mock read timeout"));
    }

    #[tokio::test]
    async fn chunked_reads() {
        let mut channel = MockChannel::lenient("mock");
        let handle = channel.handle();
        handle.set_read_chunk(3);
        handle.push_response(b"abcdefg");
        channel.open().await.unwrap();

        assert_eq!(channel.read(100, T).await.unwrap(), b"abc");
        assert_eq!(channel.read(2, T).await.unwrap(), b"de");
        assert_eq!(channel.read(100, T).await.unwrap(), b"fg");
    }

    #[tokio::test]
    async fn lenient_replies_and_logging() {
        let mut channel = MockChannel::lenient("mock");
        let handle = channel.handle();
        handle.reply(b"MEAS:FREQuency?", b"50.0\n");
        channel.open().await.unwrap();

        channel.write(b"OUTPut ON\n").await.unwrap();
        channel.write(b"MEAS:FREQuency?\n").await.unwrap();
        assert_eq!(channel.read(64, T).await.unwrap(), b"50.0\n");
        assert_eq!(handle.sent_text(), vec!["OUTPut ON", "MEAS:FREQuency?"]);
    }

    #[tokio::test]
    async fn injected_failures() {
        let mut channel = MockChannel::lenient("mock");
        let handle = channel.handle();
        handle.set_fail_open(true);
        assert!(channel.open().await.is_err());
        assert!(!channel.is_open());

        handle.set_fail_open(false);
        channel.open().await.unwrap();
        handle.fail_writes_containing("TRIGger:A:LEVel");
        assert!(channel.write(b"TRIGger:A:LEVel 1.0\n").await.is_err());
        channel.write(b"TRIGger:A:MODe NORMal\n").await.unwrap();
        assert_eq!(handle.sent_text(), vec!["TRIGger:A:MODe NORMal"]);

        handle.push_response(b"1");
        handle.set_fail_read(true);
        assert!(channel.read(1, T).await.is_err());
    }

    #[tokio::test]
    async fn provider_tracks_lifetimes() {
        let provider = MockChannelProvider::new();
        provider.reject("bad");
        provider.fail_open("GPIB0::3::INSTR");
        assert!(provider.create("bad").is_none());

        let mut a = provider.create("GPIB0::1::INSTR").unwrap();
        let mut b = provider.create("GPIB0::3::INSTR").unwrap();
        a.open().await.unwrap();
        assert!(b.open().await.is_err());
        assert_eq!(provider.created_count(), 2);
        assert_eq!(provider.open_count(), 1);
        assert_eq!(provider.live_count(), 2);

        a.write(b"LOAD ON\n").await.unwrap();
        a.close().await.unwrap();
        drop(a);
        drop(b);
        assert_eq!(provider.open_count(), 0);
        assert_eq!(provider.live_count(), 0);
        assert_eq!(provider.sent_to("GPIB0::1::INSTR"), vec!["LOAD ON"]);
    }
}
