//! Tektronix DPO7000-family driver.
//!
//! Translates [`Oscilloscope`] calls into Tektronix SCPI. The trigger type
//! last programmed through [`set_trigger_type`](Oscilloscope::set_trigger_type)
//! is remembered because source and slope commands are addressed per
//! trigger type (`TRIGger:A:EDGE:SOUrce`, `TRIGger:A:PULse:SOUrce`, ...).
//!
//! Screenshots and waveforms are written to a file on the scope's own disk,
//! read back with `FILESystem:READFile` as a binary block, and deleted.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use benchlib_core::capability::{Instrument, Oscilloscope};
use benchlib_core::error::{Error, Result};
use benchlib_core::types::{Coupling, ImageFormat, RecordRange, TriggerSlope, WaveformFormat};
use benchlib_scpi::{InstrumentLink, SharedLink};

use crate::models::TektronixModel;

/// Default `*OPC?` polling interval.
pub const DEFAULT_OPC_POLL: Duration = Duration::from_millis(50);

/// Default time allowed for an operation to complete.
pub const DEFAULT_OPC_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default screenshot file on the scope, without extension.
pub const DEFAULT_SCREENSHOT_PATH: &str = "C:/Temp/benchlib_screenshot";

/// A DPO7000-family oscilloscope.
pub struct Dpo7000 {
    model: TektronixModel,
    link: SharedLink,
    trigger_type: Mutex<String>,
    screenshot_path: String,
    opc_poll: Duration,
    opc_timeout: Duration,
}

impl Dpo7000 {
    pub fn new(model: TektronixModel, link: SharedLink) -> Self {
        Self {
            model,
            link,
            trigger_type: Mutex::new("EDGE".to_string()),
            screenshot_path: DEFAULT_SCREENSHOT_PATH.to_string(),
            opc_poll: DEFAULT_OPC_POLL,
            opc_timeout: DEFAULT_OPC_TIMEOUT,
        }
    }

    pub(crate) fn with_opc_timing(mut self, poll: Duration, timeout: Duration) -> Self {
        self.opc_poll = poll;
        self.opc_timeout = timeout;
        self
    }

    pub(crate) fn with_screenshot_path(mut self, path: &str) -> Self {
        self.screenshot_path = path.to_string();
        self
    }

    /// The link this driver talks through.
    pub fn link(&self) -> SharedLink {
        self.link.clone()
    }

    fn cached_trigger_type(&self) -> MutexGuard<'_, String> {
        self.trigger_type.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn send(&self, cmd: &str) -> Result<()> {
        self.link.lock().await.write(cmd).await
    }

    async fn query_string(&self, cmd: &str) -> Result<String> {
        self.link.lock().await.query_string(cmd).await
    }

    async fn query_double(&self, cmd: &str) -> Result<f64> {
        self.link.lock().await.query_double(cmd).await
    }

    /// The `ACQuire:STOPAfter` mode (`RUNSTOP` or `SEQUENCE`).
    pub async fn stop_after_mode(&self) -> Result<String> {
        self.query_string("ACQuire:STOPAfter?").await
    }

    /// Capture a waveform file and write it to `host_path`.
    pub async fn capture_waveform_to_host(
        &self,
        channel: u8,
        host_path: impl AsRef<Path>,
        format: WaveformFormat,
        scope_path: &str,
        range: RecordRange,
    ) -> Result<()> {
        let data = self
            .capture_waveform(channel, format, scope_path, range)
            .await?;
        let host_path = host_path.as_ref();
        tokio::fs::write(host_path, &data).await?;
        tracing::info!(
            path = %host_path.display(),
            bytes = data.len(),
            "Waveform saved to host"
        );
        Ok(())
    }
}

/// Poll `*OPC?` until it reports `1` or `timeout` elapses.
async fn wait_opc(link: &mut InstrumentLink, poll: Duration, timeout: Duration) -> Result<bool> {
    link.write("*OPC").await?;
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(reply) = link.query_string("*OPC?").await {
            if reply == "1" {
                return Ok(true);
            }
        }
        tokio::time::sleep(poll).await;
    }
    tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Operation complete wait timed out");
    Ok(false)
}

/// Read a file from the scope's disk and delete it.
async fn fetch_file(link: &mut InstrumentLink, quoted_path: &str) -> Result<Bytes> {
    let data = link
        .query_block(&format!("FILESystem:READFile {quoted_path}"))
        .await?;
    link.write(&format!("FILESystem:DELEte {quoted_path}"))
        .await?;
    Ok(data)
}

fn slope_keyword(slope: TriggerSlope) -> &'static str {
    match slope {
        TriggerSlope::Rising => "RISe",
        TriggerSlope::Falling => "FALL",
        TriggerSlope::Either => "EITher",
    }
}

#[async_trait]
impl Instrument for Dpo7000 {
    fn model(&self) -> &str {
        self.model.name
    }

    fn vendor(&self) -> &str {
        "Tektronix"
    }

    async fn connect(&self) -> Result<()> {
        self.link.lock().await.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.link.lock().await.disconnect().await
    }

    async fn is_connected(&self) -> bool {
        self.link.lock().await.is_connected()
    }

    async fn last_error(&self) -> Option<String> {
        self.link.lock().await.last_error().map(str::to_string)
    }
}

#[async_trait]
impl Oscilloscope for Dpo7000 {
    // -- vertical -------------------------------------------------------------

    async fn set_channel_position(&self, channel: u8, divisions: f64) -> Result<()> {
        self.send(&format!("CH{channel}:POSITION {divisions}")).await
    }

    async fn channel_position(&self, channel: u8) -> Result<f64> {
        self.query_double(&format!("CH{channel}:POSITION?")).await
    }

    async fn set_channel_scale(&self, channel: u8, volts_per_div: f64) -> Result<()> {
        self.send(&format!("CH{channel}:SCALe {volts_per_div}")).await
    }

    async fn channel_scale(&self, channel: u8) -> Result<f64> {
        self.query_double(&format!("CH{channel}:SCALe?")).await
    }

    async fn set_channel_coupling(&self, channel: u8, coupling: Coupling) -> Result<()> {
        self.send(&format!("CH{channel}:COUPling {}", coupling.as_str()))
            .await
    }

    async fn enable_channel(&self, channel: u8, enabled: bool) -> Result<()> {
        let state = if enabled { "ON" } else { "OFF" };
        self.send(&format!("CH{channel}:STATe {state}")).await
    }

    async fn is_channel_enabled(&self, channel: u8) -> Result<bool> {
        let state = self.query_string(&format!("CH{channel}:STATe?")).await?;
        Ok(state == "1" || state.eq_ignore_ascii_case("ON"))
    }

    // -- horizontal -----------------------------------------------------------

    async fn set_timebase(&self, seconds_per_div: f64) -> Result<()> {
        self.send(&format!("HORizontal:SCALe {seconds_per_div}")).await
    }

    async fn timebase(&self) -> Result<f64> {
        self.query_double("HORizontal:SCALe?").await
    }

    async fn set_horizontal_position(&self, percent: f64) -> Result<()> {
        self.send(&format!("HORizontal:POSition {percent}")).await
    }

    async fn horizontal_position(&self) -> Result<f64> {
        self.query_double("HORizontal:POSition?").await
    }

    // -- trigger --------------------------------------------------------------

    async fn set_trigger_type(&self, trigger_type: &str) -> Result<()> {
        let upper = trigger_type.trim().to_ascii_uppercase();
        *self.cached_trigger_type() = upper.clone();
        self.send(&format!("TRIGger:A:TYPe {upper}")).await
    }

    async fn trigger_type(&self) -> Result<String> {
        self.query_string("TRIGger:A:TYPe?").await
    }

    async fn set_trigger_source(&self, source: &str) -> Result<()> {
        let kind = self.cached_trigger_type().clone();
        let source = source.trim().to_ascii_uppercase();
        self.send(&format!("TRIGger:A:{kind}:SOUrce {source}")).await
    }

    async fn trigger_source(&self) -> Result<String> {
        let kind = self.cached_trigger_type().clone();
        self.query_string(&format!("TRIGger:A:{kind}:SOUrce?")).await
    }

    async fn set_trigger_slope(&self, slope: TriggerSlope) -> Result<()> {
        let kind = self.cached_trigger_type().clone();
        if kind != "EDGE" {
            tracing::warn!(trigger_type = %kind, "Trigger slope only applies to EDGE triggers");
            return Ok(());
        }
        self.send(&format!("TRIGger:A:EDGE:SLOpe {}", slope_keyword(slope)))
            .await
    }

    async fn trigger_slope(&self) -> Result<String> {
        let kind = self.cached_trigger_type().clone();
        if kind != "EDGE" {
            return Err(Error::Unsupported(format!(
                "trigger slope query for trigger type {kind}"
            )));
        }
        self.query_string("TRIGger:A:EDGE:SLOpe?").await
    }

    async fn set_trigger_level(&self, volts: f64) -> Result<()> {
        self.send(&format!("TRIGger:A:LEVel {volts}")).await
    }

    async fn trigger_level(&self) -> Result<f64> {
        self.query_double("TRIGger:A:LEVel?").await
    }

    async fn trigger_mode(&self) -> Result<String> {
        self.query_string("TRIGger:A:MODe?").await
    }

    async fn trigger_state(&self) -> Result<String> {
        self.query_string("TRIGger:STATE?").await
    }

    async fn auto_mode(&self) -> Result<()> {
        self.send("TRIGger:A:MODe AUTO").await
    }

    async fn normal(&self) -> Result<()> {
        self.send("TRIGger:A:MODe NORMal").await
    }

    async fn force_trigger(&self) -> Result<()> {
        self.send("TRIGger FORCe").await
    }

    async fn auto_setup(&self) -> Result<()> {
        self.send("AUTOSet EXECute").await
    }

    // -- acquisition ----------------------------------------------------------

    /// Resume acquisition, keeping single-sequence mode if it was selected.
    async fn run(&self) -> Result<()> {
        let stop_after = self.stop_after_mode().await.unwrap_or_default();
        tracing::debug!(stop_after = %stop_after, "DPO7000 run");
        if !stop_after.to_ascii_uppercase().contains("SEQUENCE") {
            self.send("ACQuire:STOPAfter RUNSTop").await?;
        }
        self.send("ACQuire:STATE RUN").await
    }

    async fn stop(&self) -> Result<()> {
        self.send("ACQuire:STATE STOP").await
    }

    async fn single(&self) -> Result<()> {
        self.send("ACQuire:STOPAfter SEQuence").await?;
        self.send("ACQuire:STATE RUN").await
    }

    async fn continuous(&self) -> Result<()> {
        self.send("ACQuire:STOPAfter RUNSTop").await?;
        self.send("ACQuire:STATE ON").await
    }

    async fn is_running(&self) -> Result<bool> {
        let state = self.query_string("ACQuire:STATE?").await?.to_ascii_uppercase();
        Ok(state == "1" || state.contains("RUN") || state.contains("ON"))
    }

    async fn acquisition_state(&self) -> Result<String> {
        self.query_string("ACQuire:STATE?").await
    }

    // -- system ---------------------------------------------------------------

    async fn wait_for_operation_complete(&self, timeout: Duration) -> Result<bool> {
        let mut link = self.link.lock().await;
        wait_opc(&mut link, self.opc_poll, timeout).await
    }

    async fn system_error(&self) -> Result<String> {
        self.query_string("SYSTem:ERRor?").await
    }

    async fn clear_errors(&self) -> Result<()> {
        self.send("*CLS").await
    }

    async fn measure(&self, channel: u8, measurement: &str) -> Result<f64> {
        let mut link = self.link.lock().await;
        link.write(&format!("MEASUrement:IMMed:SOUrce CH{channel}"))
            .await?;
        link.write(&format!(
            "MEASUrement:IMMed:TYPe {}",
            measurement.trim().to_ascii_uppercase()
        ))
        .await?;
        link.query_double("MEASUrement:IMMed:VALue?").await
    }

    // -- data retrieval -------------------------------------------------------

    async fn capture_screenshot(&self, format: ImageFormat) -> Result<Bytes> {
        let quoted = format!("\"{}.{}\"", self.screenshot_path, format.extension());
        let mut link = self.link.lock().await;

        link.write("HARDCopy:PORT FILE").await?;
        link.write(&format!("HARDCopy:FORMat {}", format.as_str()))
            .await?;
        link.write(&format!("HARDCopy:FILEName {quoted}")).await?;
        link.write("HARDCopy STARt").await?;

        if !wait_opc(&mut link, self.opc_poll, self.opc_timeout).await? {
            return Err(Error::Transport("Screenshot did not complete".into()));
        }

        let data = fetch_file(&mut link, &quoted).await?;
        tracing::info!(bytes = data.len(), format = format.as_str(), "Screenshot captured");
        Ok(data)
    }

    async fn capture_waveform(
        &self,
        channel: u8,
        format: WaveformFormat,
        scope_path: &str,
        range: RecordRange,
    ) -> Result<Bytes> {
        let quoted = format!("\"{scope_path}\"");
        let mut link = self.link.lock().await;

        link.write(&format!("DATa:SOUrce CH{channel}")).await?;
        if format == WaveformFormat::Csv {
            link.write("HEADer ON").await?;
        }
        link.write(&format!("SAVe:WAVEform:FORMat {}", format.as_str()))
            .await?;
        if let Some(start) = range.start.filter(|&p| p > 0) {
            link.write(&format!("SAVe:WAVEform:DATa:STARt {start}"))
                .await?;
        }
        if let Some(stop) = range.stop.filter(|&p| p > 0) {
            link.write(&format!("SAVe:WAVEform:DATa:STOP {stop}"))
                .await?;
        }
        link.write(&format!("SAVe:WAVEform:FILe {quoted}")).await?;
        link.write("SAVe:WAVEform:DATa").await?;

        let data = fetch_file(&mut link, &quoted).await?;
        tracing::info!(channel, bytes = data.len(), "Waveform captured");
        Ok(data)
    }
}
