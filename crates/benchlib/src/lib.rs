//! # benchlib -- asynchronous bench instrument control
//!
//! `benchlib` drives the instruments of a power-electronics test bench over
//! SCPI: oscilloscopes, electronic DC loads and programmable AC sources. It
//! is meant for test sequencers and bench automation where the same
//! configuration file describes which instrument sits at which address.
//!
//! ## Quick Start
//!
//! ```no_run
//! use benchlib::{Instrument, Oscilloscope};
//! use benchlib::tektronix::{TektronixBuilder, models::dpo7254};
//!
//! #[tokio::main]
//! async fn main() -> benchlib::Result<()> {
//!     let scope = TektronixBuilder::new(dpo7254())
//!         .address("TCPIP::192.168.1.100:4000")
//!         .build()?;
//!     scope.connect().await?;
//!     scope.set_trigger_level(1.5).await?;
//!     println!("trigger state: {}", scope.trigger_state().await?);
//!     scope.disconnect().await
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                  | Purpose                                           |
//! |------------------------|---------------------------------------------------|
//! | `benchlib-core`        | Capability traits, configuration, events, errors  |
//! | `benchlib-transport`   | GPIB, TCP and serial channels; address parsing    |
//! | `benchlib-scpi`        | Command/query link and IEEE-488.2 binary blocks   |
//! | `benchlib-tektronix`   | Tektronix DPO7000 oscilloscopes                   |
//! | `benchlib-chroma`      | Chroma 6310 DC load modules                       |
//! | `benchlib-delta`       | Delta A3000 AC source                             |
//! | `benchlib-control`     | Model registry, trigger control, orchestration    |
//! | **`benchlib`**         | This facade crate -- re-exports everything        |
//!
//! Every driver implements [`Instrument`] plus one role trait
//! ([`Oscilloscope`], [`DcLoad`] or [`AcSource`]), so application code works
//! with trait objects chosen once by model name through [`ModelRegistry`].

pub use benchlib_core::*;

pub use benchlib_control::{
    ApplyPhase, BenchParameters, DEFAULT_TOLERANCE, DyLoadAction, InputAction,
    InstrumentOrchestrator, LoadAction, ModelInfo, ModelRegistry, Selections,
    TriggerLevelController, TriggerSession, operator_message, supported_models,
};

/// Byte-level channels and the address grammar.
pub mod transport {
    pub use benchlib_transport::*;
}

/// The SCPI link and binary block codec.
pub mod scpi {
    pub use benchlib_scpi::*;
}

/// Tektronix DPO7000-series oscilloscopes.
pub mod tektronix {
    pub use benchlib_tektronix::*;
}

/// Chroma 6310-series DC load modules, including automatic range selection.
pub mod chroma {
    pub use benchlib_chroma::*;
}

/// Delta A3000-series AC source.
pub mod delta {
    pub use benchlib_delta::*;
}

/// Control-layer modules for callers that need more than the re-exports.
pub mod control {
    pub use benchlib_control::*;
}
