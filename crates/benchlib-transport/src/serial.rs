//! Serial port transport channel.
//!
//! Many bench instruments (electronic loads, AC sources, older scopes) are
//! controlled over RS-232 or a USB virtual COM port. [`SerialChannel`]
//! keeps the port name and line settings and opens the device lazily.
//!
//! # Example
//!
//! ```no_run
//! use benchlib_core::TransportChannel;
//! use benchlib_transport::{SerialChannel, SerialConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> benchlib_core::Result<()> {
//! let mut channel = SerialChannel::new("/dev/ttyUSB0", SerialConfig::default());
//! channel.open().await?;
//! channel.write(b"MEAS:VOLT:AC?\n").await?;
//! let reply = channel.read(64, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use benchlib_core::error::{Error, Result};
use benchlib_core::transport::{ChannelKind, DEFAULT_IO_TIMEOUT, TransportChannel};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Serial line settings. The default is 9600 baud, 8N1, no flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Default line settings at the given baud rate.
    pub fn with_baud(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Seven,
    Eight,
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// Serial channel to one instrument.
pub struct SerialChannel {
    port_name: String,
    config: SerialConfig,
    port: Option<SerialStream>,
    write_timeout: Duration,
    last_error: Option<String>,
}

impl SerialChannel {
    /// Create a closed channel for `port_name` (e.g. `COM7`, `/dev/ttyUSB0`).
    pub fn new(port_name: &str, config: SerialConfig) -> Self {
        Self {
            port_name: port_name.to_string(),
            config,
            port: None,
            write_timeout: DEFAULT_IO_TIMEOUT,
            last_error: None,
        }
    }

    /// Override the write timeout (default 3 s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn fail(&mut self, msg: String) -> Error {
        tracing::warn!(port = %self.port_name, error = %msg, "Serial channel error");
        self.last_error = Some(msg.clone());
        Error::Transport(msg)
    }
}

#[async_trait]
impl TransportChannel for SerialChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Serial
    }

    fn endpoint(&self) -> &str {
        &self.port_name
    }

    async fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            self.last_error = None;
            return Ok(());
        }

        tracing::debug!(
            port = %self.port_name,
            baud_rate = self.config.baud_rate,
            data_bits = ?self.config.data_bits,
            stop_bits = ?self.config.stop_bits,
            parity = ?self.config.parity,
            flow_control = ?self.config.flow_control,
            "Opening serial port"
        );

        let opened = tokio_serial::new(&self.port_name, self.config.baud_rate)
            .data_bits(self.config.data_bits.into())
            .stop_bits(self.config.stop_bits.into())
            .parity(self.config.parity.into())
            .flow_control(self.config.flow_control.into())
            .open_native_async();

        match opened {
            Ok(stream) => {
                tracing::info!(
                    port = %self.port_name,
                    baud_rate = self.config.baud_rate,
                    "Serial port opened"
                );
                self.port = Some(stream);
                self.last_error = None;
                Ok(())
            }
            Err(e) => Err(self.fail(format!("Serial port open failed: {e}"))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut port) = self.port.take() else {
            return Ok(());
        };

        tracing::debug!(port = %self.port_name, "Closing serial port");

        // Dropping the stream releases the device; a failed flush only means
        // queued bytes may be lost.
        if let Err(e) = port.flush().await {
            return Err(self.fail(format!("Serial port close failed: {e}")));
        }

        tracing::info!(port = %self.port_name, "Serial port closed");
        self.last_error = None;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let timeout = self.write_timeout;
        let Some(port) = self.port.as_mut() else {
            return Err(self.fail("Serial port not open".into()));
        };

        tracing::trace!(port = %self.port_name, bytes = data.len(), data = ?data, "Sending data");

        let result = tokio::time::timeout(timeout, async {
            port.write_all(data).await?;
            port.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.last_error = None;
                Ok(data.len())
            }
            Ok(Err(e)) => Err(self.fail(format!("Serial write failed: {e}"))),
            Err(_) => Err(self.fail("Serial write timeout".into())),
        }
    }

    async fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let Some(port) = self.port.as_mut() else {
            return Err(self.fail("Serial port not open".into()));
        };

        let mut buf = vec![0u8; max_len];
        let result = tokio::time::timeout(timeout, port.read(&mut buf)).await;
        match result {
            Ok(Ok(0)) => Err(self.fail("Serial read failed or no data".into())),
            Ok(Ok(n)) => {
                buf.truncate(n);
                tracing::trace!(port = %self.port_name, bytes = n, data = ?buf, "Received data");
                self.last_error = None;
                Ok(buf)
            }
            Ok(Err(e)) => Err(self.fail(format!("Serial read failed: {e}"))),
            Err(_) => Err(self.fail("Serial read timeout".into())),
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        if self.port.is_some() {
            tracing::debug!(port = %self.port_name, "SerialChannel dropped, closing port");
        }
    }
}
