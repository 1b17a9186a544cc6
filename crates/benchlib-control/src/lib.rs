//! benchlib-control: the control layer that sits between a bench operator
//! interface and the instrument drivers.
//!
//! - [`ModelRegistry`] -- turns a configured model name into a capability
//! - [`TriggerLevelController`] -- steps a scope's trigger level to a target
//! - [`InstrumentOrchestrator`] -- debounced configuration apply and
//!   all-or-nothing hardware actions
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use benchlib_control::{InstrumentOrchestrator, LoadAction};
//! use benchlib_core::{LoadKind, Timings, TracingSink};
//! use benchlib_transport::ChannelFactory;
//!
//! # async fn example(config: benchlib_core::ConfigSnapshot) -> benchlib_core::Result<()> {
//! let orchestrator = InstrumentOrchestrator::new(
//!     Arc::new(ChannelFactory::default()),
//!     Arc::new(TracingSink),
//!     Timings::default(),
//! );
//! orchestrator.submit_config(config);
//! orchestrator.select(LoadKind::Load, "Full load");
//! orchestrator.execute_load(LoadAction::LoadOn).await?;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod orchestrator;
pub mod registry;
pub mod trigger;

pub use actions::{BenchParameters, DyLoadAction, InputAction, LoadAction, Selections};
pub use orchestrator::{ApplyPhase, InstrumentOrchestrator, operator_message};
pub use registry::{ModelInfo, ModelRegistry, supported_models};
pub use trigger::{DEFAULT_TOLERANCE, TriggerLevelController, TriggerSession};
