//! Fluent builder for [`Chroma6310`] load channels.

use std::time::Duration;

use benchlib_core::error::{Error, Result};
use benchlib_core::transport::{DEFAULT_IO_TIMEOUT, TransportChannel};
use benchlib_scpi::{InstrumentLink, SharedLink};
use benchlib_transport::{ChannelFactory, ChannelProvider};

use crate::load::Chroma6310;

pub struct ChromaBuilder {
    sub_model: String,
    address: Option<String>,
    io_timeout: Duration,
    real_channel: i32,
    channel_index: i32,
}

impl ChromaBuilder {
    /// Start a builder for module `sub_model`, e.g. `"63103"`.
    pub fn new(sub_model: &str) -> Self {
        Self {
            sub_model: sub_model.to_string(),
            address: None,
            io_timeout: DEFAULT_IO_TIMEOUT,
            real_channel: -1,
            channel_index: 0,
        }
    }

    /// Mainframe address, usually a GPIB number such as `"7"`.
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Hardware channel on the mainframe and its parameter-table row.
    pub fn channel(mut self, real_channel: i32, channel_index: i32) -> Self {
        self.real_channel = real_channel;
        self.channel_index = channel_index;
        self
    }

    /// Build on a link shared with other channels of the same mainframe.
    pub fn build_with_link(self, link: SharedLink) -> Chroma6310 {
        Chroma6310::new(&self.sub_model, link, self.real_channel, self.channel_index)
    }

    pub fn build_with_channel(self, channel: Box<dyn TransportChannel>) -> Chroma6310 {
        let link = InstrumentLink::new(channel)
            .with_timeout(self.io_timeout)
            .shared();
        self.build_with_link(link)
    }

    pub fn build(self) -> Result<Chroma6310> {
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
    use benchlib_core::capability::{DcLoad, Instrument};
    use benchlib_test_harness::MockChannel;

    #[test]
    fn build_requires_address() {
        assert!(matches!(
            ChromaBuilder::new("63103").build(),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn gpib_number_address() {
        let load = ChromaBuilder::new("63103")
            .address("7")
            .channel(2, 1)
            .build()
            .unwrap();
        assert_eq!(load.real_channel(), 2);
        assert!(!load.is_connected().await);
        assert_eq!(load.link().lock().await.endpoint(), "GPIB0::7::INSTR");
    }

    #[tokio::test]
    async fn channels_share_one_link() {
        let channel = MockChannel::lenient("7");
        let handle = channel.handle();
        let first = ChromaBuilder::new("63101")
            .channel(1, 1)
            .build_with_channel(Box::new(channel));
        let second = ChromaBuilder::new("63102")
            .channel(2, 2)
            .build_with_link(first.link());

        first.connect().await.unwrap();
        assert!(second.is_connected().await);
        second.set_channel(second.real_channel()).await.unwrap();
        second.set_load_on().await.unwrap();
        assert_eq!(handle.sent_text(), vec!["CHAN 2", "LOAD ON"]);
    }
}
