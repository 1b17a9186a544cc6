//! Fluent builder for [`DeltaA3000`].

use std::time::Duration;

use benchlib_core::error::{Error, Result};
use benchlib_core::transport::{DEFAULT_IO_TIMEOUT, TransportChannel};
use benchlib_scpi::{InstrumentLink, SharedLink};
use benchlib_transport::{ChannelFactory, ChannelProvider};

use crate::a3000::DeltaA3000;

pub struct DeltaBuilder {
    address: Option<String>,
    io_timeout: Duration,
}

impl Default for DeltaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaBuilder {
    pub fn new() -> Self {
        Self {
            address: None,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn build_with_link(self, link: SharedLink) -> DeltaA3000 {
        DeltaA3000::new(link)
    }

    pub fn build_with_channel(self, channel: Box<dyn TransportChannel>) -> DeltaA3000 {
        let link = InstrumentLink::new(channel)
            .with_timeout(self.io_timeout)
            .shared();
        self.build_with_link(link)
    }

    pub fn build(self) -> Result<DeltaA3000> {
        let address = self
            .address
            .as_deref()
            .ok_or_else(|| Error::Config("address is required for build()".into()))?;
        let channel = ChannelFactory::default()
            .with_timeout(self.io_timeout)
            .create(address)
            .ok_or_else(|| Error::Config(format!("unsupported address: {address}")))?;
        Ok(self.build_with_channel(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_core::capability::Instrument;

    #[test]
    fn missing_or_bad_address() {
        assert!(matches!(DeltaBuilder::new().build(), Err(Error::Config(_))));
        assert!(matches!(
            DeltaBuilder::new().address("USB0::1").build(),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn serial_address_builds_closed_source() {
        let source = DeltaBuilder::new().address("COM4").build().unwrap();
        assert!(!source.is_connected().await);
        assert_eq!(source.link().lock().await.endpoint(), "COM4");
    }
}
