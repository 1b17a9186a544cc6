//! Delta A3000 AC source driver.

use async_trait::async_trait;

use benchlib_core::capability::{AcSource, Instrument};
use benchlib_core::error::Result;
use benchlib_scpi::SharedLink;

/// Model name used in bench configurations.
pub const MODEL_NAME: &str = "DE-A3000AB";

/// A Delta A3000-series AC source.
pub struct DeltaA3000 {
    link: SharedLink,
}

impl DeltaA3000 {
    pub fn new(link: SharedLink) -> Self {
        Self { link }
    }

    pub fn link(&self) -> SharedLink {
        self.link.clone()
    }

    async fn send(&self, cmd: &str) -> Result<()> {
        tracing::debug!(model = MODEL_NAME, cmd = %cmd, "AC source command");
        self.link.lock().await.write(cmd).await
    }

    async fn query(&self, cmd: &str) -> Result<f64> {
        self.link.lock().await.query_double(cmd).await
    }
}

#[async_trait]
impl Instrument for DeltaA3000 {
    fn model(&self) -> &str {
        MODEL_NAME
    }

    fn vendor(&self) -> &str {
        "Delta"
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
impl AcSource for DeltaA3000 {
    async fn set_voltage(&self, volts: f64) -> Result<()> {
        self.send(&format!("SOURce:VOLTage:AC {volts:.3}")).await
    }

    /// The A3000 does not regulate below 30 Hz; lower values are passed
    /// through and rejected by the instrument.
    async fn set_frequency(&self, hz: f64) -> Result<()> {
        self.send(&format!("SOURce:FREQuency {hz:.3}")).await
    }

    async fn set_phase_on(&self, degrees: f64) -> Result<()> {
        self.send(&format!("SOURce:PHASe:ON {degrees:.3}")).await
    }

    async fn set_phase_off(&self, degrees: f64) -> Result<()> {
        self.send(&format!("SOURce:PHASe:OFF {degrees:.3}")).await
    }

    async fn set_output(&self, on: bool) -> Result<()> {
        self.send(if on { "OUTPut ON" } else { "OUTPut OFF" }).await
    }

    async fn measure_voltage(&self) -> Result<f64> {
        self.query("MEAS:VOLT:AC?").await
    }

    async fn measure_current(&self) -> Result<f64> {
        self.query("MEAS:CURR:AC?").await
    }

    async fn measure_real_power(&self) -> Result<f64> {
        self.query("MEAS:POWer:REAL?").await
    }

    async fn measure_reactive_power(&self) -> Result<f64> {
        self.query("MEAS:POWer:REACtive?").await
    }

    async fn measure_apparent_power(&self) -> Result<f64> {
        self.query("MEAS:POWer:APParent?").await
    }

    async fn measure_power_factor(&self) -> Result<f64> {
        self.query("MEAS:POWer:PFACtor?").await
    }

    async fn measure_frequency(&self) -> Result<f64> {
        self.query("MEAS:FREQuency?").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_core::error::ErrorKind;
    use benchlib_core::types::AcMeasurement;
    use benchlib_scpi::InstrumentLink;
    use benchlib_test_harness::{MockChannel, MockHandle};

    async fn source(channel: MockChannel) -> (DeltaA3000, MockHandle) {
        let handle = channel.handle();
        let source = DeltaA3000::new(InstrumentLink::new(Box::new(channel)).shared());
        source.connect().await.unwrap();
        (source, handle)
    }

    #[tokio::test]
    async fn setpoints_use_three_decimals() {
        let (source, handle) = source(MockChannel::lenient("10")).await;
        source.set_voltage(90.0).await.unwrap();
        source.set_frequency(60.0).await.unwrap();
        source.set_phase_on(12.34567).await.unwrap();
        source.set_phase_off(0.0).await.unwrap();
        source.set_output(true).await.unwrap();
        source.set_output(false).await.unwrap();

        assert_eq!(
            handle.sent_text(),
            vec![
                "SOURce:VOLTage:AC 90.000",
                "SOURce:FREQuency 60.000",
                "SOURce:PHASe:ON 12.346",
                "SOURce:PHASe:OFF 0.000",
                "OUTPut ON",
                "OUTPut OFF",
            ]
        );
    }

    #[tokio::test]
    async fn measure_all_queries_each_value() {
        let channel = MockChannel::new("10");
        let handle = channel.handle();
        handle.expect(b"MEAS:VOLT:AC?", b"230.1\n");
        handle.expect(b"MEAS:CURR:AC?", b"1.25\n");
        handle.expect(b"MEAS:POWer:REAL?", b"280\n");
        handle.expect(b"MEAS:POWer:REACtive?", b"30\n");
        handle.expect(b"MEAS:POWer:APParent?", b"287.6\n");
        handle.expect(b"MEAS:POWer:PFACtor?", b"0.974\n");
        handle.expect(b"MEAS:FREQuency?", b"50.01\n");
        let (source, handle) = source(channel).await;

        let m = source.measure_all().await.unwrap();
        assert_eq!(
            m,
            AcMeasurement {
                voltage: 230.1,
                current: 1.25,
                real_power: 280.0,
                reactive_power: 30.0,
                apparent_power: 287.6,
                power_factor: 0.974,
                frequency: 50.01,
            }
        );
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn garbled_measurement_is_parse_error() {
        let channel = MockChannel::new("10");
        channel.handle().expect(b"MEAS:VOLT:AC?", b"N/A\n");
        let (source, _) = source(channel).await;

        let err = source.measure_voltage().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(source.last_error().await.unwrap().contains("MEAS:VOLT:AC?"));
    }

    #[tokio::test]
    async fn identity() {
        let (source, _) = source(MockChannel::lenient("10")).await;
        assert_eq!(source.model(), "DE-A3000AB");
        assert_eq!(source.vendor(), "Delta");
        assert!(source.is_connected().await);
        source.disconnect().await.unwrap();
        assert!(!source.is_connected().await);
    }
}
