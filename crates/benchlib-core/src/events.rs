//! Asynchronous notifications from the control layer.
//!
//! The trigger controller and the orchestrator publish events through
//! [`tokio::sync::broadcast`] channels. Operator-facing messages
//! additionally go to an injected [`MessageSink`], which replaces a
//! process-wide message box with something the owner controls.

use std::fmt;

/// An event emitted by a trigger-level convergence session.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerEvent {
    /// One step was applied.
    Progress {
        /// Trigger level now programmed, in volts.
        current_level: f64,
        /// Number of steps applied in this session.
        step_count: u32,
    },

    /// The trigger level is within tolerance of the target.
    TargetReached {
        /// Final level in volts.
        level: f64,
    },

    /// The session ended. `success` is `false` when it was stopped early.
    Completed { success: bool, message: String },

    /// The session stopped because of an error.
    Error { message: String },
}

/// The hardware group a toggle in the owner's interface controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadKind {
    Input,
    Relay,
    Load,
    DyLoad,
}

impl fmt::Display for LoadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadKind::Input => "Input",
            LoadKind::Relay => "Relay",
            LoadKind::Load => "Load",
            LoadKind::DyLoad => "DyLoad",
        };
        f.write_str(s)
    }
}

/// An event emitted by the instrument orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    /// A debounced configuration apply started.
    ApplyStarted,

    /// A debounced configuration apply finished.
    ApplyFinished {
        success: bool,
        /// Number of instruments now held.
        instruments: usize,
    },

    /// A hardware action finished successfully.
    ActionCompleted { kind: LoadKind },

    /// A hardware action failed; the owner should switch `kind` back to off.
    ForceOff { kind: LoadKind },

    /// A background task ended abnormally.
    Error { message: String },
}

/// Receives operator-facing messages.
///
/// Implementations must not block: messages are delivered from background
/// tasks while hardware actions are in flight.
pub trait MessageSink: Send + Sync {
    fn info(&self, title: &str, message: &str);
    fn warning(&self, title: &str, message: &str);
    fn error(&self, title: &str, message: &str);
}

/// A [`MessageSink`] that forwards every message to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn info(&self, title: &str, message: &str) {
        tracing::info!(title = %title, "{}", message);
    }

    fn warning(&self, title: &str, message: &str) {
        tracing::warn!(title = %title, "{}", message);
    }

    fn error(&self, title: &str, message: &str) {
        tracing::error!(title = %title, "{}", message);
    }
}
