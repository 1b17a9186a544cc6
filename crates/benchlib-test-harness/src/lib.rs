//! benchlib-test-harness: scripted transport channels and instrument peers
//! for testing benchlib without bench hardware.
//!
//! - [`MockChannel`]: an in-memory [`TransportChannel`](benchlib_core::TransportChannel)
//!   with ordered request/response expectations and failure injection.
//! - [`MockChannelProvider`]: hands out mock channels by address and keeps
//!   track of how many are open or still alive.
//! - [`MockTcpServer`]: a loopback SCPI peer for exercising `TcpChannel`.

pub mod mock_channel;
pub mod mock_tcp;

pub use mock_channel::{MockChannel, MockChannelProvider, MockHandle};
pub use mock_tcp::MockTcpServer;
