//! Instrument capability traits.
//!
//! Every driver implements [`Instrument`] plus exactly one role trait:
//! [`Oscilloscope`], [`DcLoad`], or [`AcSource`]. Application code holds
//! `Arc<dyn Oscilloscope>` (etc.) and never needs to know which vendor's
//! command set is in use.
//!
//! Role traits provide default bodies for every operation. Setters that a
//! model does not support are no-ops returning `Ok(())`; queries that a
//! model cannot answer return [`Error::Unsupported`]. A driver overrides
//! only what its instrument actually does.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::types::*;

/// Behaviour shared by every instrument regardless of role.
#[async_trait]
pub trait Instrument: Send + Sync {
    /// Model name as it appears in the bench configuration (e.g. `"DPO7000"`).
    fn model(&self) -> &str;

    /// Manufacturer name.
    fn vendor(&self) -> &str;

    /// Open the underlying channel.
    async fn connect(&self) -> Result<()>;

    /// Close the underlying channel. Close-time warnings are logged, not returned.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the underlying channel is open.
    async fn is_connected(&self) -> bool;

    /// The most recent error recorded by the instrument's link.
    async fn last_error(&self) -> Option<String>;
}

fn unsupported<T>(model: &str, op: &str) -> Result<T> {
    Err(Error::Unsupported(format!("{op} on {model}")))
}

/// Oscilloscope role.
#[async_trait]
pub trait Oscilloscope: Instrument {
    // -- vertical / horizontal ------------------------------------------------

    async fn set_channel_position(&self, _channel: u8, _divisions: f64) -> Result<()> {
        Ok(())
    }

    async fn channel_position(&self, _channel: u8) -> Result<f64> {
        unsupported(self.model(), "channel_position")
    }

    async fn set_channel_scale(&self, _channel: u8, _volts_per_div: f64) -> Result<()> {
        Ok(())
    }

    async fn channel_scale(&self, _channel: u8) -> Result<f64> {
        unsupported(self.model(), "channel_scale")
    }

    async fn set_channel_coupling(&self, _channel: u8, _coupling: Coupling) -> Result<()> {
        Ok(())
    }

    async fn enable_channel(&self, _channel: u8, _enabled: bool) -> Result<()> {
        Ok(())
    }

    async fn is_channel_enabled(&self, _channel: u8) -> Result<bool> {
        unsupported(self.model(), "is_channel_enabled")
    }

    async fn set_timebase(&self, _seconds_per_div: f64) -> Result<()> {
        Ok(())
    }

    async fn timebase(&self) -> Result<f64> {
        unsupported(self.model(), "timebase")
    }

    async fn set_horizontal_position(&self, _percent: f64) -> Result<()> {
        Ok(())
    }

    async fn horizontal_position(&self) -> Result<f64> {
        unsupported(self.model(), "horizontal_position")
    }

    // -- trigger --------------------------------------------------------------

    async fn set_trigger_type(&self, _trigger_type: &str) -> Result<()> {
        Ok(())
    }

    async fn trigger_type(&self) -> Result<String> {
        unsupported(self.model(), "trigger_type")
    }

    async fn set_trigger_source(&self, _source: &str) -> Result<()> {
        Ok(())
    }

    async fn trigger_source(&self) -> Result<String> {
        unsupported(self.model(), "trigger_source")
    }

    async fn set_trigger_slope(&self, _slope: TriggerSlope) -> Result<()> {
        Ok(())
    }

    async fn trigger_slope(&self) -> Result<String> {
        unsupported(self.model(), "trigger_slope")
    }

    async fn set_trigger_level(&self, _volts: f64) -> Result<()> {
        Ok(())
    }

    async fn trigger_level(&self) -> Result<f64> {
        unsupported(self.model(), "trigger_level")
    }

    async fn trigger_mode(&self) -> Result<String> {
        unsupported(self.model(), "trigger_mode")
    }

    async fn trigger_state(&self) -> Result<String> {
        unsupported(self.model(), "trigger_state")
    }

    /// Free-running trigger mode.
    async fn auto_mode(&self) -> Result<()> {
        Ok(())
    }

    /// Trigger only on a qualifying event.
    async fn normal(&self) -> Result<()> {
        Ok(())
    }

    async fn force_trigger(&self) -> Result<()> {
        Ok(())
    }

    async fn auto_setup(&self) -> Result<()> {
        Ok(())
    }

    // -- acquisition ----------------------------------------------------------

    async fn run(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn single(&self) -> Result<()> {
        Ok(())
    }

    async fn continuous(&self) -> Result<()> {
        Ok(())
    }

    async fn is_running(&self) -> Result<bool> {
        unsupported(self.model(), "is_running")
    }

    async fn acquisition_state(&self) -> Result<String> {
        unsupported(self.model(), "acquisition_state")
    }

    /// Wait for pending operations to finish. Returns `false` on timeout.
    async fn wait_for_operation_complete(&self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }

    // -- housekeeping ---------------------------------------------------------

    async fn system_error(&self) -> Result<String> {
        unsupported(self.model(), "system_error")
    }

    async fn clear_errors(&self) -> Result<()> {
        Ok(())
    }

    async fn measure(&self, _channel: u8, _measurement: &str) -> Result<f64> {
        unsupported(self.model(), "measure")
    }

    // -- data retrieval -------------------------------------------------------

    async fn capture_screenshot(&self, _format: ImageFormat) -> Result<Bytes> {
        unsupported(self.model(), "capture_screenshot")
    }

    /// Save a channel's waveform to `scope_path` on the instrument and read
    /// the file back.
    async fn capture_waveform(
        &self,
        _channel: u8,
        _format: WaveformFormat,
        _scope_path: &str,
        _range: RecordRange,
    ) -> Result<Bytes> {
        unsupported(self.model(), "capture_waveform")
    }
}

/// Electronic DC load role.
///
/// One value of this trait drives one load channel. Several channels of the
/// same mainframe share a link; [`set_channel`](DcLoad::set_channel) selects
/// which one subsequent commands address.
#[async_trait]
pub trait DcLoad: Instrument {
    /// Hardware channel number on the mainframe.
    fn real_channel(&self) -> i32;

    /// 1-based row index this channel occupies in the parameter tables.
    fn channel_index(&self) -> i32;

    /// Number of current levels a program can hold.
    fn num_segments(&self) -> usize {
        2
    }

    async fn set_channel(&self, _channel: i32) -> Result<()> {
        Ok(())
    }

    async fn set_load_on(&self) -> Result<()> {
        Ok(())
    }

    async fn set_load_off(&self) -> Result<()> {
        Ok(())
    }

    async fn set_load_mode(&self, _mode: LoadMode) -> Result<()> {
        Ok(())
    }

    /// Set the mode from its mnemonic. Unknown mnemonics are logged and ignored.
    async fn set_load_mode_named(&self, mode: &str) -> Result<()> {
        match mode.parse::<LoadMode>() {
            Ok(m) => self.set_load_mode(m).await,
            Err(_) => {
                tracing::warn!(model = %self.model(), mode = %mode, "Invalid load mode, ignoring");
                Ok(())
            }
        }
    }

    /// Sink-on threshold voltage.
    async fn set_von(&self, _volts: f64) -> Result<()> {
        Ok(())
    }

    async fn set_static_rise_slope(&self, _amps_per_us: f64) -> Result<()> {
        Ok(())
    }

    async fn set_static_fall_slope(&self, _amps_per_us: f64) -> Result<()> {
        Ok(())
    }

    async fn set_dynamic_rise_slope(&self, _amps_per_us: f64) -> Result<()> {
        Ok(())
    }

    async fn set_dynamic_fall_slope(&self, _amps_per_us: f64) -> Result<()> {
        Ok(())
    }

    async fn set_static_current(&self, _param: &StaticCurrentParam) -> Result<()> {
        Ok(())
    }

    async fn set_dynamic_current(&self, _param: &DynamicCurrentParam) -> Result<()> {
        Ok(())
    }
}

/// Programmable AC source role.
#[async_trait]
pub trait AcSource: Instrument {
    async fn set_voltage(&self, _volts: f64) -> Result<()> {
        Ok(())
    }

    async fn set_frequency(&self, _hz: f64) -> Result<()> {
        Ok(())
    }

    /// Output turn-on phase angle in degrees.
    async fn set_phase_on(&self, _degrees: f64) -> Result<()> {
        Ok(())
    }

    async fn set_phase_off(&self, _degrees: f64) -> Result<()> {
        Ok(())
    }

    async fn set_output(&self, _on: bool) -> Result<()> {
        Ok(())
    }

    async fn measure_voltage(&self) -> Result<f64> {
        unsupported(self.model(), "measure_voltage")
    }

    async fn measure_current(&self) -> Result<f64> {
        unsupported(self.model(), "measure_current")
    }

    async fn measure_real_power(&self) -> Result<f64> {
        unsupported(self.model(), "measure_real_power")
    }

    async fn measure_reactive_power(&self) -> Result<f64> {
        unsupported(self.model(), "measure_reactive_power")
    }

    async fn measure_apparent_power(&self) -> Result<f64> {
        unsupported(self.model(), "measure_apparent_power")
    }

    async fn measure_power_factor(&self) -> Result<f64> {
        unsupported(self.model(), "measure_power_factor")
    }

    async fn measure_frequency(&self) -> Result<f64> {
        unsupported(self.model(), "measure_frequency")
    }

    /// Read every measurement in one pass.
    async fn measure_all(&self) -> Result<AcMeasurement> {
        Ok(AcMeasurement {
            voltage: self.measure_voltage().await?,
            current: self.measure_current().await?,
            real_power: self.measure_real_power().await?,
            reactive_power: self.measure_reactive_power().await?,
            apparent_power: self.measure_apparent_power().await?,
            power_factor: self.measure_power_factor().await?,
            frequency: self.measure_frequency().await?,
        })
    }
}

/// A constructed instrument, tagged by role.
///
/// Produced once by the model registry; callers match on the tag and keep
/// the typed handle from then on.
#[derive(Clone)]
pub enum Capability {
    Oscilloscope(Arc<dyn Oscilloscope>),
    DcLoad(Arc<dyn DcLoad>),
    AcSource(Arc<dyn AcSource>),
}

impl Capability {
    pub fn model(&self) -> &str {
        match self {
            Capability::Oscilloscope(i) => i.model(),
            Capability::DcLoad(i) => i.model(),
            Capability::AcSource(i) => i.model(),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        match self {
            Capability::Oscilloscope(i) => i.connect().await,
            Capability::DcLoad(i) => i.connect().await,
            Capability::AcSource(i) => i.connect().await,
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        match self {
            Capability::Oscilloscope(i) => i.disconnect().await,
            Capability::DcLoad(i) => i.disconnect().await,
            Capability::AcSource(i) => i.disconnect().await,
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self {
            Capability::Oscilloscope(i) => i.is_connected().await,
            Capability::DcLoad(i) => i.is_connected().await,
            Capability::AcSource(i) => i.is_connected().await,
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = match self {
            Capability::Oscilloscope(_) => "Oscilloscope",
            Capability::DcLoad(_) => "DcLoad",
            Capability::AcSource(_) => "AcSource",
        };
        f.debug_tuple(role).field(&self.model()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    #[async_trait]
    impl Instrument for Bare {
        fn model(&self) -> &str {
            "BARE"
        }
        fn vendor(&self) -> &str {
            "Nobody"
        }
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn is_connected(&self) -> bool {
            true
        }
        async fn last_error(&self) -> Option<String> {
            None
        }
    }

    impl Oscilloscope for Bare {}
    impl AcSource for Bare {}

    #[tokio::test]
    async fn unsupported_setters_are_noops() {
        let scope = Bare;
        scope.set_trigger_level(1.0).await.unwrap();
        scope.run().await.unwrap();
        AcSource::set_voltage(&scope, 10.0).await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_queries_report_model() {
        let scope = Bare;
        let err = scope.trigger_level().await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(ref m) if m.contains("BARE")));
        assert!(AcSource::measure_all(&scope).await.is_err());
    }

    #[tokio::test]
    async fn capability_delegates_to_role() {
        let cap = Capability::Oscilloscope(Arc::new(Bare));
        assert_eq!(cap.model(), "BARE");
        assert!(cap.is_connected().await);
        assert_eq!(format!("{cap:?}"), "Oscilloscope(\"BARE\")");
    }
}
