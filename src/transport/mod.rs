//! Byte-oriented connections used by the Modbus client.
//!
//! A [`TransportChannel`] moves raw ADU bytes; it knows nothing about framing
//! beyond reporting which framing its peer speaks.

pub mod configurator;
pub mod serial;
pub mod tcp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::modbus::frame::Framing;
use crate::utils::error::{ModbusError, TransportError};

pub use configurator::SerialConfigurator;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

pub const DEFAULT_TCP_PORT: u16 = 502;
pub const DEFAULT_DEVICE_PATH: &str = "/dev/ttyAMA0";
pub const DEFAULT_BAUD_RATE: u32 = 9600;

#[async_trait]
pub trait TransportChannel: Send {
    /// Opening an already open channel fails with `TransportError::AlreadyOpen`.
    async fn open(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    async fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Waits up to `timeout` for data and returns whatever arrived, at most
    /// `max_bytes`. Never returns an empty buffer.
    async fn receive(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    fn is_open(&self) -> bool;

    fn framing(&self) -> Framing;

    /// Human readable peer, used in logs.
    fn target(&self) -> String;

    /// Drops bytes left over from an abandoned exchange.
    async fn discard_pending(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl TryFrom<f32> for StopBits {
    type Error = String;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        if value == 1.0 {
            Ok(Self::One)
        } else if value == 1.5 {
            Ok(Self::OnePointFive)
        } else if value == 2.0 {
            Ok(Self::Two)
        } else {
            Err(format!("unsupported stop bits {}, expected 1, 1.5 or 2", value))
        }
    }
}

impl From<StopBits> for f32 {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => 1.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", f32::from(*self))
    }
}

fn default_device_path() -> String {
    DEFAULT_DEVICE_PATH.to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_data_bits() -> u8 {
    8
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialLineSettings {
    #[serde(default = "default_device_path")]
    pub device_path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub flow_control: bool,
}

impl Default for SerialLineSettings {
    fn default() -> Self {
        Self {
            device_path: default_device_path(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: StopBits::default(),
            parity: Parity::default(),
            flow_control: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpSettings {
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TransportConfiguration {
    Rtu(SerialLineSettings),
    Tcp(TcpSettings),
}

impl Default for TransportConfiguration {
    fn default() -> Self {
        Self::Rtu(SerialLineSettings::default())
    }
}

impl TransportConfiguration {
    pub fn framing(&self) -> Framing {
        match self {
            Self::Rtu(_) => Framing::Rtu,
            Self::Tcp(_) => Framing::Tcp,
        }
    }

    pub fn target(&self) -> String {
        match self {
            Self::Rtu(settings) => settings.device_path.clone(),
            Self::Tcp(settings) => format!("{}:{}", settings.host, settings.port),
        }
    }

    pub fn validate(&self) -> Result<(), ModbusError> {
        match self {
            Self::Rtu(settings) => {
                if settings.device_path.trim().is_empty() {
                    return Err(ModbusError::ConfigError("serial device path is empty".to_string()));
                }
                if settings.baud_rate == 0 {
                    return Err(ModbusError::ConfigError("baud rate must be positive".to_string()));
                }
                if !(5..=8).contains(&settings.data_bits) {
                    return Err(ModbusError::ConfigError(format!(
                        "data bits {} outside 5..=8",
                        settings.data_bits
                    )));
                }
            }
            Self::Tcp(settings) => {
                if settings.host.trim().is_empty() {
                    return Err(ModbusError::ConfigError("TCP host is empty".to_string()));
                }
                if settings.port == 0 {
                    return Err(ModbusError::ConfigError("TCP port must be positive".to_string()));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for TransportConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rtu(s) => write!(
                f,
                "RTU {} @ {} baud, {} data bits, {} stop bits, parity {:?}, flow control {}",
                s.device_path,
                s.baud_rate,
                s.data_bits,
                s.stop_bits,
                s.parity,
                if s.flow_control { "on" } else { "off" }
            ),
            Self::Tcp(s) => write!(f, "TCP {}:{}", s.host, s.port),
        }
    }
}

/// Builds the channel matching `configuration`. Nothing is opened yet.
pub fn create_transport(configuration: &TransportConfiguration, connect_timeout: Duration) -> Box<dyn TransportChannel> {
    match configuration {
        TransportConfiguration::Rtu(settings) => {
            Box::new(SerialTransport::new(settings.clone(), SerialConfigurator::detect()))
        }
        TransportConfiguration::Tcp(settings) => Box::new(TcpTransport::new(settings.clone(), connect_timeout)),
    }
}
