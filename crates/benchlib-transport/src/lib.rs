//! Transport channels for benchlib.
//!
//! This crate provides concrete implementations of the
//! [`TransportChannel`](benchlib_core::TransportChannel) trait from
//! `benchlib-core` for the connection types found on a test bench:
//!
//! - [`GpibChannel`]: IEEE-488 instruments behind a GPIB controller
//! - [`TcpChannel`]: LAN instruments speaking raw SCPI over a socket
//! - [`SerialChannel`]: RS-232 and USB virtual COM port instruments
//!
//! Channels are normally created from an address string through
//! [`ChannelFactory`]; see [`parse_address`] for the accepted grammar.
//!
//! # Example
//!
//! ```no_run
//! use benchlib_transport::{ChannelFactory, ChannelProvider};
//! use benchlib_core::TransportChannel;
//! use std::time::Duration;
//!
//! # async fn example() -> benchlib_core::Result<()> {
//! let factory = ChannelFactory::default();
//! let mut channel = factory
//!     .create("TCPIP::192.168.1.100:5025")
//!     .expect("supported address");
//!
//! channel.open().await?;
//! channel.write(b"*IDN?\n").await?;
//! let reply = channel.read(256, Duration::from_secs(3)).await?;
//! # Ok(())
//! # }
//! ```

pub mod factory;
pub mod gpib;
pub mod serial;
pub mod tcp;

pub use factory::{AddressSpec, ChannelFactory, ChannelProvider, DEFAULT_SERIAL_BAUD, parse_address};
pub use gpib::{GpibBackend, GpibChannel, GpibSession, PrologixBackend};
pub use serial::{DataBits, FlowControl, Parity, SerialChannel, SerialConfig, StopBits};
pub use tcp::TcpChannel;
