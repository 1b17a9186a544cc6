//! Bench configuration snapshot types.
//!
//! The configuration layer (an editor, a JSON file, a test sequencer) hands
//! benchlib an ordered list of [`InstrumentRecord`]s plus per-channel
//! electrical parameter tables. Field names serialize in camelCase so that
//! files written by the bench editor load unchanged.
//!
//! Electrical parameters are kept as strings exactly as the operator typed
//! them; they are parsed at the point of use, and an unparseable cell
//! simply skips that one setting.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::DEFAULT_IO_TIMEOUT;

/// What an instrument is used for on the bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentRole {
    Load,
    Relay,
    Oscilloscope,
    InputSource,
    Template,
}

/// Binds one channel of a multi-channel instrument to a parameter-table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelBinding {
    /// Sub-model of the plug-in module in this slot (e.g. `"63103"`).
    pub sub_model: String,
    /// 1-based row in the parameter tables; `<= 0` means unbound.
    #[serde(rename = "index")]
    pub ui_index: i32,
}

/// One instrument in the bench configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentRecord {
    #[serde(default)]
    pub enabled: bool,
    pub name: String,
    #[serde(rename = "type")]
    pub role: InstrumentRole,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub channels: Vec<ChannelBinding>,
    /// Hardware channel number for each entry of `channels`, position-aligned.
    #[serde(default)]
    pub channel_numbers: Vec<i32>,
}

impl InstrumentRecord {
    /// Both a model name and an address are present.
    pub fn is_fully_specified(&self) -> bool {
        !self.model_name.trim().is_empty() && !self.address.trim().is_empty()
    }

    /// Hardware channel number for binding `i`, or `-1` if none was configured.
    pub fn hardware_channel(&self, i: usize) -> i32 {
        self.channel_numbers.get(i).copied().unwrap_or(-1)
    }
}

/// The instrument list plus bench-level output counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub load_outputs: u32,
    #[serde(default)]
    pub relay_outputs: u32,
    #[serde(default)]
    pub instruments: Vec<InstrumentRecord>,
}

impl ConfigSnapshot {
    /// Enabled, fully specified records with the given role, in order.
    pub fn active(&self, role: InstrumentRole) -> impl Iterator<Item = &InstrumentRecord> {
        self.instruments
            .iter()
            .filter(move |r| r.enabled && r.role == role && r.is_fully_specified())
    }
}

/// One row of the AC input table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRow {
    pub vin: String,
    pub frequency: String,
    pub phase: String,
}

impl InputRow {
    /// The row in the `"V/F/P"` form used for input selections.
    pub fn setpoint_text(&self) -> String {
        format!("{}/{}/{}", self.vin, self.frequency, self.phase)
    }
}

/// Per-channel static load parameters, each list indexed by `ui_index - 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadMeta {
    pub modes: Vec<String>,
    pub names: Vec<String>,
    pub vo: Vec<String>,
    pub von: Vec<String>,
    #[serde(rename = "riseSlopeCCH")]
    pub rise_slope_cch: Vec<String>,
    #[serde(rename = "fallSlopeCCH")]
    pub fall_slope_cch: Vec<String>,
    #[serde(rename = "riseSlopeCCL")]
    pub rise_slope_ccl: Vec<String>,
    #[serde(rename = "fallSlopeCCL")]
    pub fall_slope_ccl: Vec<String>,
}

/// Per-channel dynamic load parameters, each list indexed by `ui_index - 1`
/// except `t1t2`, which is aligned with the dynamic data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DynamicMeta {
    pub vo: Vec<String>,
    pub von: Vec<String>,
    #[serde(rename = "riseSlopeCCDH")]
    pub rise_slope_ccdh: Vec<String>,
    #[serde(rename = "fallSlopeCCDH")]
    pub fall_slope_ccdh: Vec<String>,
    #[serde(rename = "riseSlopeCCDL")]
    pub rise_slope_ccdl: Vec<String>,
    #[serde(rename = "fallSlopeCCDL")]
    pub fall_slope_ccdl: Vec<String>,
    pub t1t2: Vec<String>,
}

/// A labelled row of per-channel values (one value per `ui_index`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRow {
    pub label: String,
    pub values: Vec<String>,
}

/// Parse cell `index - 1` of a parameter list as a number.
///
/// Returns `None` for a missing cell, a non-positive index, or text that is
/// not a number.
pub fn cell_f64(cells: &[String], index: i32) -> Option<f64> {
    let i = usize::try_from(index).ok()?.checked_sub(1)?;
    cells.get(i)?.trim().parse::<f64>().ok()
}

/// Timing knobs for the control layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub transport_timeout_ms: u64,
    pub tick_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub debounce_ms: u64,
    pub opc_timeout_ms: u64,
    pub opc_poll_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            transport_timeout_ms: DEFAULT_IO_TIMEOUT.as_millis() as u64,
            tick_interval_ms: 800,
            settle_delay_ms: 300,
            debounce_ms: 500,
            opc_timeout_ms: 5000,
            opc_poll_ms: 50,
        }
    }
}

impl Timings {
    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn opc_timeout(&self) -> Duration {
        Duration::from_millis(self.opc_timeout_ms)
    }

    pub fn opc_poll(&self) -> Duration {
        Duration::from_millis(self.opc_poll_ms)
    }
}

/// Transport-level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Serial port of a Prologix-style GPIB controller used for `GPIB` addresses.
    pub gpib_adapter: Option<String>,
}

/// Everything benchlib reads from a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub timings: Timings,
    pub transport: TransportConfig,
    pub snapshot: ConfigSnapshot,
}

impl BenchConfig {
    /// Parse a configuration from JSON text. Missing sections take defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid configuration: {e}")))
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "Loaded bench configuration");
        Self::from_json(&text)
    }
}
