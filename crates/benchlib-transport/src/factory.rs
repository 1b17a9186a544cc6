//! Address parsing and channel construction.
//!
//! Bench configurations identify instruments by free-form address strings.
//! [`parse_address`] classifies them without touching hardware;
//! [`ChannelFactory`] turns the result into a closed [`TransportChannel`].
//!
//! | Address                      | Channel                          |
//! |------------------------------|----------------------------------|
//! | `5`                          | GPIB `GPIB0::5::INSTR`           |
//! | `GPIB1::7::INSTR`            | GPIB, resource used verbatim     |
//! | `TCPIP::192.168.1.100:5025`  | TCP to 192.168.1.100 port 5025   |
//! | `COM7`, `/dev/ttyUSB0`       | Serial at 9600 baud              |

use std::sync::Arc;
use std::time::Duration;

use benchlib_core::config::TransportConfig;
use benchlib_core::transport::{DEFAULT_IO_TIMEOUT, TransportChannel};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::gpib::{GpibBackend, GpibChannel, PrologixBackend};
use crate::serial::{SerialChannel, SerialConfig};
use crate::tcp::TcpChannel;

/// Baud rate used for serial addresses.
pub const DEFAULT_SERIAL_BAUD: u32 = 9600;

static NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").expect("valid regex"));

static TCPIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^TCPIP::([\d\.]+):(\d+)").expect("valid regex"));

/// A classified instrument address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
    /// GPIB resource string.
    Gpib(String),
    Tcp { host: String, port: u16 },
    Serial { port: String, baud: u32 },
}

/// Classify an address string. The first matching rule wins; anything
/// unrecognized yields `None`.
pub fn parse_address(address: &str) -> Option<AddressSpec> {
    let address = address.trim();

    if NUMERIC.is_match(address) {
        return Some(AddressSpec::Gpib(format!("GPIB0::{address}::INSTR")));
    }

    if starts_with_ignore_case(address, "GPIB") {
        return Some(AddressSpec::Gpib(address.to_string()));
    }

    if starts_with_ignore_case(address, "TCPIP") {
        let caps = TCPIP.captures(address)?;
        let host = caps.get(1)?.as_str().to_string();
        // Out-of-range ports are rejected here rather than at connect time.
        let port = caps.get(2)?.as_str().parse::<u16>().ok()?;
        return Some(AddressSpec::Tcp { host, port });
    }

    if starts_with_ignore_case(address, "COM") || starts_with_ignore_case(address, "/dev/tty") {
        return Some(AddressSpec::Serial {
            port: address.to_string(),
            baud: DEFAULT_SERIAL_BAUD,
        });
    }

    None
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Creates transport channels from address strings.
///
/// The orchestrator depends on this trait rather than on [`ChannelFactory`]
/// so that tests can hand out scripted channels.
pub trait ChannelProvider: Send + Sync {
    /// Build a closed channel for `address`, or `None` if the address is
    /// not recognized.
    fn create(&self, address: &str) -> Option<Box<dyn TransportChannel>>;
}

/// The hardware [`ChannelProvider`].
#[derive(Clone)]
pub struct ChannelFactory {
    timeout: Duration,
    gpib: Option<Arc<dyn GpibBackend>>,
}

impl Default for ChannelFactory {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_IO_TIMEOUT,
            gpib: None,
        }
    }
}

impl ChannelFactory {
    /// Build a factory from transport settings. A configured GPIB adapter
    /// becomes a [`PrologixBackend`] shared by every GPIB channel.
    pub fn from_config(config: &TransportConfig, timeout: Duration) -> Self {
        let gpib = config
            .gpib_adapter
            .as_deref()
            .map(|port| Arc::new(PrologixBackend::new(port)) as Arc<dyn GpibBackend>);
        Self { timeout, gpib }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_gpib_backend(mut self, backend: Arc<dyn GpibBackend>) -> Self {
        self.gpib = Some(backend);
        self
    }

    /// Build a closed channel for an already classified address.
    pub fn build(&self, spec: AddressSpec) -> Box<dyn TransportChannel> {
        match spec {
            AddressSpec::Gpib(resource) => {
                let mut channel = GpibChannel::new(&resource).with_timeout(self.timeout);
                if let Some(backend) = &self.gpib {
                    channel = channel.with_backend(backend.clone());
                }
                Box::new(channel)
            }
            AddressSpec::Tcp { host, port } => {
                Box::new(TcpChannel::new(&host, port).with_timeout(self.timeout))
            }
            AddressSpec::Serial { port, baud } => Box::new(
                SerialChannel::new(&port, SerialConfig::with_baud(baud)).with_timeout(self.timeout),
            ),
        }
    }
}

impl ChannelProvider for ChannelFactory {
    fn create(&self, address: &str) -> Option<Box<dyn TransportChannel>> {
        let spec = parse_address(address);
        if spec.is_none() {
            tracing::warn!(address = %address, "Unsupported instrument address");
        }
        spec.map(|spec| self.build(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_core::transport::ChannelKind;

    #[test]
    fn numeric_address_is_gpib_board_zero() {
        assert_eq!(
            parse_address("5"),
            Some(AddressSpec::Gpib("GPIB0::5::INSTR".into()))
        );
        assert_eq!(
            parse_address("12"),
            Some(AddressSpec::Gpib("GPIB0::12::INSTR".into()))
        );
    }

    #[test]
    fn gpib_prefix_is_kept_verbatim() {
        assert_eq!(
            parse_address("GPIB1::7::INSTR"),
            Some(AddressSpec::Gpib("GPIB1::7::INSTR".into()))
        );
        assert_eq!(
            parse_address("gpib0::3::INSTR"),
            Some(AddressSpec::Gpib("gpib0::3::INSTR".into()))
        );
    }

    #[test]
    fn tcpip_address() {
        assert_eq!(
            parse_address("TCPIP::192.168.1.100:5025"),
            Some(AddressSpec::Tcp {
                host: "192.168.1.100".into(),
                port: 5025
            })
        );
        assert_eq!(
            parse_address("tcpip::10.0.0.2:4000"),
            Some(AddressSpec::Tcp {
                host: "10.0.0.2".into(),
                port: 4000
            })
        );
    }

    #[test]
    fn malformed_tcpip_is_rejected() {
        assert_eq!(parse_address("TCPIP::scope.lab:5025"), None);
        assert_eq!(parse_address("TCPIP::192.168.1.100"), None);
    }

    #[test]
    fn tcpip_port_must_fit_u16() {
        assert!(parse_address("TCPIP::192.168.1.100:65535").is_some());
        assert_eq!(parse_address("TCPIP::192.168.1.100:65536"), None);
        assert_eq!(parse_address("TCPIP::192.168.1.100:70000"), None);
        assert!(ChannelFactory::default().create("TCPIP::10.0.0.1:99999").is_none());
    }

    #[test]
    fn serial_addresses() {
        assert_eq!(
            parse_address("COM7"),
            Some(AddressSpec::Serial {
                port: "COM7".into(),
                baud: 9600
            })
        );
        assert_eq!(
            parse_address("/dev/ttyUSB0"),
            Some(AddressSpec::Serial {
                port: "/dev/ttyUSB0".into(),
                baud: 9600
            })
        );
    }

    #[test]
    fn unknown_addresses() {
        assert_eq!(parse_address("foo"), None);
        assert_eq!(parse_address(""), None);
        assert_eq!(parse_address("USB0::0x0699::0x0401::INSTR"), None);
        assert_eq!(parse_address("/dev/usbtmc0"), None);
    }

    #[test]
    fn factory_builds_closed_channels() {
        let factory = ChannelFactory::default();

        let tcp = factory.create("TCPIP::127.0.0.1:5025").unwrap();
        assert_eq!(tcp.kind(), ChannelKind::Tcp);
        assert_eq!(tcp.endpoint(), "127.0.0.1:5025");
        assert!(!tcp.is_open());

        let gpib = factory.create("5").unwrap();
        assert_eq!(gpib.kind(), ChannelKind::Gpib);
        assert_eq!(gpib.endpoint(), "GPIB0::5::INSTR");

        let serial = factory.create("COM3").unwrap();
        assert_eq!(serial.kind(), ChannelKind::Serial);
        assert_eq!(serial.endpoint(), "COM3");

        assert!(factory.create("foo").is_none());
    }

    #[tokio::test]
    async fn gpib_without_adapter_fails_on_open() {
        let factory = ChannelFactory::from_config(&TransportConfig::default(), DEFAULT_IO_TIMEOUT);
        let mut channel = factory.create("5").unwrap();
        assert!(channel.open().await.is_err());
        assert!(channel.last_error().is_some());
    }
}
