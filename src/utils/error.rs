use std::fmt;
use thiserror::Error;

/// Failures at the OS / socket boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Serial line configuration failed: {0}")]
    Configure(String),

    #[error("Unable to open the connection {target}: {reason}")]
    Open { target: String, reason: String },

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Connection is not open")]
    NotOpen,

    #[error("Connection {0} is already open")]
    AlreadyOpen(String),

    #[error("Timed out waiting for data")]
    Timeout,
}

/// Modbus exception codes carried by `function | 0x80` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    Undefined(u8),
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::ServerDeviceBusy,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayPathUnavailable,
            0x0B => Self::GatewayTargetFailedToRespond,
            other => Self::Undefined(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
            Self::Acknowledge => 0x05,
            Self::ServerDeviceBusy => 0x06,
            Self::MemoryParityError => 0x08,
            Self::GatewayPathUnavailable => 0x0A,
            Self::GatewayTargetFailedToRespond => 0x0B,
            Self::Undefined(code) => *code,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::IllegalFunction => "Illegal function",
            Self::IllegalDataAddress => "Illegal data address",
            Self::IllegalDataValue => "Illegal data value",
            Self::ServerDeviceFailure => "Server device failure",
            Self::Acknowledge => "Acknowledge",
            Self::ServerDeviceBusy => "Server device busy",
            Self::MemoryParityError => "Memory parity error",
            Self::GatewayPathUnavailable => "Gateway path unavailable",
            Self::GatewayTargetFailedToRespond => "Gateway target device failed to respond",
            Self::Undefined(_) => "Undefined failure code",
        };
        write!(f, "{}", message)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Timeout occurred")]
    Timeout,

    #[error("CRC checksum mismatch (expected 0x{expected:04X}, received 0x{received:04X})")]
    CrcMismatch { expected: u16, received: u16 },

    #[error("Malformed frame: {0}")]
    FrameMalformed(String),

    #[error("Device answered function 0x{function:02X} with exception: {code}")]
    Exception { function: u8, code: ExceptionCode },

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ModbusError {
    /// Timeouts and discarded frames may be re-attempted by the caller; everything else
    /// is a definitive answer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModbusError::Timeout | ModbusError::CrcMismatch { .. } | ModbusError::FrameMalformed(_)
        )
    }
}

impl From<TransportError> for ModbusError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ModbusError::Timeout,
            TransportError::AlreadyOpen(target) => {
                ModbusError::ContractViolation(format!("connection {} is already open", target))
            }
            other => ModbusError::Transport(other),
        }
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        ModbusError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for ModbusError {
    fn from(err: toml::de::Error) -> Self {
        ModbusError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for ModbusError {
    fn from(err: toml::ser::Error) -> Self {
        ModbusError::SerializationError(format!("TOML error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ModbusError::Timeout
    }
}
