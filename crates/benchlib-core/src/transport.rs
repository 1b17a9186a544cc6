//! Transport channel trait for instrument communication.
//!
//! The [`TransportChannel`] trait abstracts over the physical link to one
//! instrument port. Implementations exist for GPIB sessions, TCP sockets
//! (raw SCPI on port 5025 and similar), serial ports, and mock channels for
//! testing.
//!
//! A channel is created closed: parsing an address never touches hardware.
//! The protocol layer (`InstrumentLink` in `benchlib-scpi`) calls
//! [`open`](TransportChannel::open) when the instrument connects.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Default per-operation timeout for channel reads, writes, and connects.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(3000);

/// The physical kind of a [`TransportChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Gpib,
    Tcp,
    Serial,
    Mock,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelKind::Gpib => "GPIB",
            ChannelKind::Tcp => "TCP",
            ChannelKind::Serial => "Serial",
            ChannelKind::Mock => "Mock",
        };
        f.write_str(s)
    }
}

/// Asynchronous byte-level channel to one instrument.
///
/// Every failing call also records a human-readable cause that stays
/// available through [`last_error`](TransportChannel::last_error) until the
/// next successful call clears it.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// The physical kind of this channel.
    fn kind(&self) -> ChannelKind;

    /// Endpoint description for logging (resource string, `ip:port`, port name).
    fn endpoint(&self) -> &str;

    /// Open the channel.
    ///
    /// Opening an already-open channel succeeds and clears the last error.
    async fn open(&mut self) -> Result<()>;

    /// Close the channel.
    ///
    /// Closing is idempotent. A residual error reported by the driver while
    /// closing is recorded in `last_error` and returned, but the channel is
    /// considered closed either way.
    async fn close(&mut self) -> Result<()>;

    /// Write all of `data`, returning the number of bytes written.
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read up to `max_len` bytes, waiting at most `timeout` for data.
    ///
    /// Fails when the channel is not open, the timeout elapses, or the read
    /// yields zero bytes.
    async fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;

    /// The cause of the most recent failure, if the last call failed.
    fn last_error(&self) -> Option<&str>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_kind_display() {
        assert_eq!(ChannelKind::Gpib.to_string(), "GPIB");
        assert_eq!(ChannelKind::Tcp.to_string(), "TCP");
        assert_eq!(ChannelKind::Serial.to_string(), "Serial");
    }

    #[test]
    fn default_timeout_is_three_seconds() {
        assert_eq!(DEFAULT_IO_TIMEOUT, Duration::from_secs(3));
    }
}
