//! Chroma 6310-series load channel driver.
//!
//! One [`Chroma6310`] drives one module slot of a 6310 mainframe. Several
//! slots share the mainframe's link; each command sequence should start with
//! [`set_channel`](DcLoad::set_channel) so the mainframe addresses the right
//! module.

use async_trait::async_trait;

use benchlib_core::capability::{DcLoad, Instrument};
use benchlib_core::error::Result;
use benchlib_core::types::{DynamicCurrentParam, LoadMode, StaticCurrentParam, segment_enabled};
use benchlib_scpi::SharedLink;

use crate::models::select_load_mode;

/// Mainframe family name reported by [`Instrument::model`].
pub const MAINFRAME_MODEL: &str = "6310";

/// One channel of a Chroma 6310-series mainframe.
pub struct Chroma6310 {
    sub_model: String,
    link: SharedLink,
    real_channel: i32,
    channel_index: i32,
}

impl Chroma6310 {
    /// `sub_model` is the plug-in module (e.g. `"63103"`) and selects the
    /// rating table used for automatic range selection.
    pub fn new(sub_model: &str, link: SharedLink, real_channel: i32, channel_index: i32) -> Self {
        Self {
            sub_model: sub_model.trim().to_string(),
            link,
            real_channel,
            channel_index,
        }
    }

    pub fn sub_model(&self) -> &str {
        &self.sub_model
    }

    /// The link this channel talks through.
    pub fn link(&self) -> SharedLink {
        self.link.clone()
    }

    async fn send(&self, cmd: &str) -> Result<()> {
        tracing::debug!(sub_model = %self.sub_model, cmd = %cmd, "Chroma6310 command");
        self.link.lock().await.write(cmd).await
    }
}

fn segment_name(i: usize) -> &'static str {
    if i == 0 { "L1" } else { "L2" }
}

#[async_trait]
impl Instrument for Chroma6310 {
    fn model(&self) -> &str {
        MAINFRAME_MODEL
    }

    fn vendor(&self) -> &str {
        "Chroma"
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
impl DcLoad for Chroma6310 {
    fn real_channel(&self) -> i32 {
        self.real_channel
    }

    fn channel_index(&self) -> i32 {
        self.channel_index
    }

    async fn set_channel(&self, channel: i32) -> Result<()> {
        self.send(&format!("CHAN {channel}")).await
    }

    async fn set_load_on(&self) -> Result<()> {
        self.send("LOAD ON").await
    }

    async fn set_load_off(&self) -> Result<()> {
        self.send("LOAD OFF").await
    }

    async fn set_load_mode(&self, mode: LoadMode) -> Result<()> {
        self.send(&format!("MODE {mode}")).await
    }

    async fn set_von(&self, volts: f64) -> Result<()> {
        self.send(&format!("CONF:VOLT:ON {volts}")).await
    }

    async fn set_static_rise_slope(&self, amps_per_us: f64) -> Result<()> {
        self.send(&format!("CURR:STAT:RISE {amps_per_us}")).await
    }

    async fn set_static_fall_slope(&self, amps_per_us: f64) -> Result<()> {
        self.send(&format!("CURR:STAT:FALL {amps_per_us}")).await
    }

    async fn set_dynamic_rise_slope(&self, amps_per_us: f64) -> Result<()> {
        self.send(&format!("CURR:DYN:RISE {amps_per_us}")).await
    }

    async fn set_dynamic_fall_slope(&self, amps_per_us: f64) -> Result<()> {
        self.send(&format!("CURR:DYN:FALL {amps_per_us}")).await
    }

    async fn set_static_current(&self, param: &StaticCurrentParam) -> Result<()> {
        let Some(&first) = param.levels.first() else {
            return Ok(());
        };
        let mode = select_load_mode(&self.sub_model, first, param.expected_voltage);
        self.set_load_mode(mode).await?;

        let segments = self.num_segments();
        for (i, level) in param.levels.iter().enumerate().take(segments) {
            if segment_enabled(&param.enabled_mask, i) {
                self.send(&format!("CURR:STAT:{} {level}", segment_name(i)))
                    .await?;
            }
        }
        if param.levels.len() > segments {
            tracing::warn!(
                levels = param.levels.len(),
                "Only L1/L2 are supported, ignoring extra static levels"
            );
        }
        Ok(())
    }

    async fn set_dynamic_current(&self, param: &DynamicCurrentParam) -> Result<()> {
        if param.levels.is_empty() {
            return Ok(());
        }
        let max_current = param.levels.iter().copied().fold(f64::MIN, f64::max);
        let mode = select_load_mode(&self.sub_model, max_current, param.expected_voltage);
        self.set_load_mode(mode.to_dynamic()).await?;

        let segments = self.num_segments();
        for (i, level) in param.levels.iter().enumerate().take(segments) {
            if segment_enabled(&param.enabled_mask, i) {
                self.send(&format!("CURR:DYN:{} {level}", segment_name(i)))
                    .await?;
            }
        }
        if let Some(t1) = param.timings.first() {
            self.send(&format!("CURR:DYN:T1 {t1}")).await?;
        }
        if let Some(t2) = param.timings.get(1) {
            self.send(&format!("CURR:DYN:T2 {t2}")).await?;
        }
        if param.levels.len() > segments {
            tracing::warn!(
                levels = param.levels.len(),
                "Only L1/L2 are supported, ignoring extra dynamic levels"
            );
        }
        Ok(())
    }
}
