//! benchlib-core: Core traits, types, and error definitions for benchlib.
//!
//! This crate defines the vendor-agnostic abstractions shared by every
//! benchlib backend. Test sequencers and bench automation depend on these
//! types without pulling in any particular transport or instrument driver.
//!
//! # Key types
//!
//! - [`TransportChannel`] -- byte-level link to one physical instrument port
//! - [`Oscilloscope`], [`DcLoad`], [`AcSource`] -- instrument capabilities
//! - [`ConfigSnapshot`] / [`InstrumentRecord`] -- bench configuration
//! - [`TriggerEvent`], [`OrchestratorEvent`], [`MessageSink`] -- notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use capability::{AcSource, Capability, DcLoad, Instrument, Oscilloscope};
pub use config::{
    BenchConfig, ChannelBinding, ConfigSnapshot, DataRow, DynamicMeta, InputRow, InstrumentRecord,
    InstrumentRole, LoadMeta, Timings, TransportConfig,
};
pub use error::{Error, ErrorKind, Result};
pub use events::{LoadKind, MessageSink, OrchestratorEvent, TracingSink, TriggerEvent};
pub use transport::{ChannelKind, TransportChannel};
pub use types::*;
