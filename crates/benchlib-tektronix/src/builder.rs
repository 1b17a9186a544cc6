//! TektronixBuilder -- fluent builder for [`Dpo7000`] instances.
//!
//! Nothing is opened by the builder; call
//! [`Instrument::connect`](benchlib_core::Instrument::connect) on the result.

use std::time::Duration;

use benchlib_core::error::{Error, Result};
use benchlib_core::transport::{DEFAULT_IO_TIMEOUT, TransportChannel};
use benchlib_scpi::{InstrumentLink, SharedLink};
use benchlib_transport::{ChannelFactory, ChannelProvider};

use crate::dpo7000::{DEFAULT_OPC_POLL, DEFAULT_OPC_TIMEOUT, DEFAULT_SCREENSHOT_PATH, Dpo7000};
use crate::models::TektronixModel;

/// Fluent builder for [`Dpo7000`].
pub struct TektronixBuilder {
    model: TektronixModel,
    address: Option<String>,
    io_timeout: Duration,
    opc_poll: Duration,
    opc_timeout: Duration,
    screenshot_path: String,
}

impl TektronixBuilder {
    pub fn new(model: TektronixModel) -> Self {
        Self {
            model,
            address: None,
            io_timeout: DEFAULT_IO_TIMEOUT,
            opc_poll: DEFAULT_OPC_POLL,
            opc_timeout: DEFAULT_OPC_TIMEOUT,
            screenshot_path: DEFAULT_SCREENSHOT_PATH.to_string(),
        }
    }

    /// Instrument address, e.g. `TCPIP::192.168.1.100:4000` or `GPIB0::1::INSTR`.
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    /// Per-operation transport timeout (default 3 s).
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// `*OPC?` polling interval and overall wait used by screenshots.
    pub fn opc_timing(mut self, poll: Duration, timeout: Duration) -> Self {
        self.opc_poll = poll;
        self.opc_timeout = timeout;
        self
    }

    /// Screenshot file on the scope's disk, without extension.
    pub fn screenshot_path(mut self, path: &str) -> Self {
        self.screenshot_path = path.to_string();
        self
    }

    /// Build on an existing shared link.
    pub fn build_with_link(self, link: SharedLink) -> Dpo7000 {
        Dpo7000::new(self.model, link)
            .with_opc_timing(self.opc_poll, self.opc_timeout)
            .with_screenshot_path(&self.screenshot_path)
    }

    /// Build on a caller-provided channel, e.g. a `MockChannel`.
    pub fn build_with_channel(self, channel: Box<dyn TransportChannel>) -> Dpo7000 {
        let link = InstrumentLink::new(channel)
            .with_timeout(self.io_timeout)
            .shared();
        self.build_with_link(link)
    }

    /// Build using a channel created from [`address`](Self::address).
    pub fn build(self) -> Result<Dpo7000> {
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
