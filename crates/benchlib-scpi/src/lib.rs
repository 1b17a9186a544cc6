//! SCPI protocol layer for benchlib.
//!
//! [`InstrumentLink`] owns one [`TransportChannel`](benchlib_core::TransportChannel)
//! and adds line-oriented command/query helpers plus definite-length binary
//! block transfers (`#<d><len><payload>`), used for screenshots and
//! waveform files.
//!
//! Capability implementations hold the link as a [`SharedLink`] so that
//! several channels of one instrument can share a single connection.

pub mod block;
pub mod link;
pub mod response;

pub use block::{BlockHeader, HeaderError, HeaderParse, encode_block, parse_header};
pub use link::{DEFAULT_MAX_HEADER_BYTES, InstrumentLink, SharedLink};
