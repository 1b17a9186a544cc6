//! GPIB transport channel.
//!
//! GPIB instruments are addressed by VISA-style resource strings such as
//! `GPIB0::5::INSTR` (board 0, primary address 5). The bus itself is driven
//! by a controller, so [`GpibChannel`] delegates the actual I/O to a
//! [`GpibBackend`] that opens one [`GpibSession`] per resource.
//!
//! [`PrologixBackend`] drives a Prologix-style USB/serial GPIB controller.
//! Several instruments on the same bus share one adapter; every transaction
//! re-selects the target address before talking to it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use benchlib_core::error::{Error, Result};
use benchlib_core::transport::{ChannelKind, DEFAULT_IO_TIMEOUT, TransportChannel};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Mutex;

use crate::serial::{SerialChannel, SerialConfig};

/// An open conversation with one GPIB device.
#[async_trait]
pub trait GpibSession: Send + Sync {
    async fn write(&mut self, data: &[u8]) -> Result<usize>;
    async fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>>;
    async fn close(&mut self) -> Result<()>;
}

/// Opens GPIB sessions by resource string.
#[async_trait]
pub trait GpibBackend: Send + Sync {
    async fn open(&self, resource: &str, timeout: Duration) -> Result<Box<dyn GpibSession>>;
}

/// GPIB channel to one instrument.
pub struct GpibChannel {
    resource: String,
    backend: Option<Arc<dyn GpibBackend>>,
    session: Option<Box<dyn GpibSession>>,
    timeout: Duration,
    last_error: Option<String>,
}

impl GpibChannel {
    /// Create a closed channel for `resource` (e.g. `GPIB0::5::INSTR`).
    ///
    /// Without a backend, [`open`](TransportChannel::open) fails; see
    /// [`with_backend`](Self::with_backend).
    pub fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            backend: None,
            session: None,
            timeout: DEFAULT_IO_TIMEOUT,
            last_error: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn GpibBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    fn fail(&mut self, msg: String) -> Error {
        tracing::warn!(resource = %self.resource, error = %msg, "GPIB channel error");
        self.last_error = Some(msg.clone());
        Error::Transport(msg)
    }
}

#[async_trait]
impl TransportChannel for GpibChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Gpib
    }

    fn endpoint(&self) -> &str {
        &self.resource
    }

    async fn open(&mut self) -> Result<()> {
        if self.session.is_some() {
            self.last_error = None;
            return Ok(());
        }

        let Some(backend) = self.backend.clone() else {
            return Err(self.fail(format!(
                "GPIB: no controller configured for [{}]",
                self.resource
            )));
        };

        tracing::debug!(resource = %self.resource, "Opening GPIB session");
        match backend.open(&self.resource, self.timeout).await {
            Ok(session) => {
                tracing::info!(resource = %self.resource, "GPIB session opened");
                self.session = Some(session);
                self.last_error = None;
                Ok(())
            }
            Err(e) => Err(self.fail(format!("GPIB: open failed [{}] {}", self.resource, e))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        match session.close().await {
            Ok(()) => {
                tracing::info!(resource = %self.resource, "GPIB session closed");
                self.last_error = None;
                Ok(())
            }
            Err(e) => Err(self.fail(format!("GPIB: close failed: {e}"))),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let Some(session) = self.session.as_mut() else {
            return Err(self.fail("GPIB not opened".into()));
        };
        tracing::trace!(resource = %self.resource, bytes = data.len(), data = ?data, "Sending data");
        let result = session.write(data).await;
        match result {
            Ok(n) => {
                self.last_error = None;
                Ok(n)
            }
            Err(e) => Err(self.fail(format!("GPIB write failed: {e}"))),
        }
    }

    async fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let Some(session) = self.session.as_mut() else {
            return Err(self.fail("GPIB not opened".into()));
        };
        let result = session.read(max_len, timeout).await;
        match result {
            Ok(data) if data.is_empty() => Err(self.fail("GPIB read failed or no data".into())),
            Ok(data) => {
                tracing::trace!(resource = %self.resource, bytes = data.len(), "Received data");
                self.last_error = None;
                Ok(data)
            }
            Err(e) => Err(self.fail(format!("GPIB read failed: {e}"))),
        }
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

static GPIB_RESOURCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^GPIB(\d*)::(\d+)(?:::(\d+))?(?:::INSTR)?$").expect("valid GPIB resource regex")
});

/// Extract `(primary, secondary)` addresses from a GPIB resource string.
pub fn gpib_addresses(resource: &str) -> Option<(u8, Option<u8>)> {
    let caps = GPIB_RESOURCE.captures(resource.trim())?;
    let primary: u8 = caps.get(2)?.as_str().parse().ok()?;
    if primary > 30 {
        return None;
    }
    let secondary = match caps.get(3) {
        Some(m) => Some(m.as_str().parse::<u8>().ok()?),
        None => None,
    };
    Some((primary, secondary))
}

/// GPIB backend for a Prologix-style USB/serial controller.
///
/// The adapter is a serial device; it is opened on first use and configured
/// for controller mode with explicit read requests.
pub struct PrologixBackend {
    port: Arc<Mutex<SerialChannel>>,
}

impl PrologixBackend {
    pub fn new(port_name: &str) -> Self {
        // USB adapters ignore the line rate; 115200 suits RS-232 models.
        let channel = SerialChannel::new(port_name, SerialConfig::with_baud(115_200));
        Self {
            port: Arc::new(Mutex::new(channel)),
        }
    }
}

#[async_trait]
impl GpibBackend for PrologixBackend {
    async fn open(&self, resource: &str, _timeout: Duration) -> Result<Box<dyn GpibSession>> {
        let (primary, secondary) = gpib_addresses(resource)
            .ok_or_else(|| Error::InvalidParameter(format!("bad GPIB resource: {resource}")))?;

        {
            let mut port = self.port.lock().await;
            if !port.is_open() {
                port.open().await?;
                port.write(b"++mode 1\n++auto 0\n++eoi 1\n++eos 3\n").await?;
            }
        }

        let select = match secondary {
            Some(sad) => format!("++addr {primary} {}\n", 96 + u16::from(sad)),
            None => format!("++addr {primary}\n"),
        };

        Ok(Box::new(PrologixSession {
            port: self.port.clone(),
            select,
            awaiting_reply: false,
        }))
    }
}

struct PrologixSession {
    port: Arc<Mutex<SerialChannel>>,
    /// `++addr` command selecting this device.
    select: String,
    /// Set by a write; the next read asks the adapter to fetch a reply.
    awaiting_reply: bool,
}

#[async_trait]
impl GpibSession for PrologixSession {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut port = self.port.lock().await;
        port.write(self.select.as_bytes()).await?;
        let n = port.write(data).await?;
        self.awaiting_reply = true;
        Ok(n)
    }

    async fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut port = self.port.lock().await;
        if self.awaiting_reply {
            port.write(self.select.as_bytes()).await?;
            port.write(b"++read eoi\n").await?;
            self.awaiting_reply = false;
        }
        port.read(max_len, timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        // The adapter stays open for other devices on the bus.
        Ok(())
    }
}
