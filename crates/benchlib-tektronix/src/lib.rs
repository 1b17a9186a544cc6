//! Tektronix oscilloscope backend for benchlib.
//!
//! - **Model definitions** ([`models`]): the supported DPO7000-family
//!   scopes and vendor detection from a model-name prefix.
//! - **Driver** ([`dpo7000`]): [`Dpo7000`], an
//!   [`Oscilloscope`](benchlib_core::Oscilloscope) implementation speaking
//!   Tektronix SCPI over an [`InstrumentLink`](benchlib_scpi::InstrumentLink).
//! - **Builder** ([`builder`]): [`TektronixBuilder`] for constructing a
//!   driver from an address string or a caller-provided channel.
//!
//! # Example
//!
//! ```no_run
//! use benchlib_core::{Instrument, Oscilloscope};
//! use benchlib_tektronix::{TektronixBuilder, models::dpo7000};
//!
//! # async fn example() -> benchlib_core::Result<()> {
//! let scope = TektronixBuilder::new(dpo7000())
//!     .address("TCPIP::192.168.1.100:4000")
//!     .build()?;
//! scope.connect().await?;
//! scope.normal().await?;
//! scope.set_trigger_level(1.5).await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod dpo7000;
pub mod models;

pub use builder::TektronixBuilder;
pub use dpo7000::Dpo7000;
pub use models::TektronixModel;
