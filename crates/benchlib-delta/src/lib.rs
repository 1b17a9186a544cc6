//! Delta A3000-series programmable AC source backend for benchlib.
//!
//! [`DeltaA3000`] implements [`AcSource`](benchlib_core::AcSource):
//! output voltage, frequency and phase angles are programmed with three
//! decimals, and every measurement is a single numeric query.
//!
//! # Example
//!
//! ```no_run
//! use benchlib_core::{AcSource, Instrument};
//! use benchlib_delta::DeltaBuilder;
//!
//! # async fn example() -> benchlib_core::Result<()> {
//! let source = DeltaBuilder::new().address("GPIB0::10::INSTR").build()?;
//! source.connect().await?;
//! source.set_voltage(230.0).await?;
//! source.set_frequency(50.0).await?;
//! source.set_output(true).await?;
//! let m = source.measure_all().await?;
//! println!("{:.1} V {:.2} A pf={:.3}", m.voltage, m.current, m.power_factor);
//! # Ok(())
//! # }
//! ```

pub mod a3000;
pub mod builder;

pub use a3000::{DeltaA3000, MODEL_NAME};
pub use builder::DeltaBuilder;
