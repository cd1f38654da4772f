use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::modbus::client::DEFAULT_RESPONSE_TIMEOUT;
use crate::modbus::planner::RequestPlanner;
use crate::modbus::protocol::{AddressSpan, DataType, RegisterRegion, Station, BROADCAST_STATION};
use crate::modbus::retry::RetryPolicy;
use crate::modbus::transformer::ByteOrder;
use crate::transport::{SerialLineSettings, TransportConfiguration};
use crate::utils::error::ModbusError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default = "default_connector_name")]
    pub name: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Consecutive failed polls before a device is reported lost.
    #[serde(default = "default_max_read_attempts")]
    pub max_read_attempts: u32,
    /// Pause before a lost device is polled again.
    #[serde(default = "default_lost_delay_seconds")]
    pub lost_delay_seconds: u64,
    #[serde(default)]
    pub transport: TransportConfiguration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub identifier: String,
    pub station: Station,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Overrides the connector transport, usually a per-device TCP host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportConfiguration>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub identifier: String,
    pub region: RegisterRegion,
    pub address: u16,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_decimals: Option<u32>,
    #[serde(default)]
    pub settable: bool,
}

fn default_connector_name() -> String {
    "modbus".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_max_read_attempts() -> u32 {
    5
}

fn default_lost_delay_seconds() -> u64 {
    5
}

fn default_enabled() -> bool {
    true
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            name: default_connector_name(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_read_attempts: default_max_read_attempts(),
            lost_delay_seconds: default_lost_delay_seconds(),
            transport: TransportConfiguration::Rtu(SerialLineSettings::default()),
        }
    }
}

impl ConnectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn lost_delay(&self) -> Duration {
        Duration::from_secs(self.lost_delay_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn planner(&self) -> RequestPlanner {
        RequestPlanner::default()
    }
}

impl ChannelConfig {
    pub fn span(&self) -> AddressSpan {
        AddressSpan {
            identifier: self.identifier.clone(),
            region: self.region,
            address: self.address,
            data_type: self.data_type,
            number_of_decimals: self.number_of_decimals,
        }
    }
}

impl DeviceConfig {
    pub fn channel(&self, identifier: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.identifier == identifier)
    }
}

impl Default for Config {
    fn default() -> Self {
        let channel = |identifier: &str, region, address, data_type, settable| ChannelConfig {
            identifier: identifier.to_string(),
            region,
            address,
            data_type,
            number_of_decimals: None,
            settable,
        };

        let mut temperature = channel("temperature", RegisterRegion::InputRegister, 4, DataType::Short, false);
        temperature.number_of_decimals = Some(1);

        Self {
            connector: ConnectorConfig::default(),
            devices: vec![DeviceConfig {
                identifier: "energy-meter".to_string(),
                station: 1,
                enabled: true,
                byte_order: ByteOrder::BigEndian,
                transport: None,
                channels: vec![
                    channel("voltage", RegisterRegion::InputRegister, 0, DataType::Float, false),
                    channel("current", RegisterRegion::InputRegister, 2, DataType::Float, false),
                    temperature,
                    channel("power_limit", RegisterRegion::HoldingRegister, 100, DataType::Float, true),
                    channel("relay", RegisterRegion::Coil, 0, DataType::Boolean, true),
                ],
            }],
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModbusError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::ConfigError(format!("unable to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        info!("📋 Loaded configuration from {} ({} devices)", path.display(), config.devices.len());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ModbusError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ModbusError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ModbusError::ConfigError(format!("unable to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| ModbusError::ConfigError(format!("unable to write {}: {}", path.display(), e)))?;
        debug!("Configuration written to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ModbusError> {
        self.connector.transport.validate()?;
        if self.connector.timeout_ms == 0 {
            return Err(ModbusError::ConfigError("timeout_ms must be positive".to_string()));
        }

        let mut identifiers = HashSet::new();
        for device in &self.devices {
            if !identifiers.insert(device.identifier.as_str()) {
                return Err(ModbusError::ConfigError(format!(
                    "device '{}' is defined twice",
                    device.identifier
                )));
            }

            let transport = self.transport_for(device);
            transport.validate()?;

            if device.enabled
                && device.station == BROADCAST_STATION
                && matches!(transport, TransportConfiguration::Rtu(_))
            {
                return Err(ModbusError::ConfigError(format!(
                    "device '{}' uses broadcast station 0, which cannot be polled over RTU",
                    device.identifier
                )));
            }

            let mut channels = HashSet::new();
            for channel in &device.channels {
                if !channels.insert(channel.identifier.as_str()) {
                    return Err(ModbusError::ConfigError(format!(
                        "channel '{}' is defined twice on device '{}'",
                        channel.identifier, device.identifier
                    )));
                }
                if channel.region.is_bit() && channel.data_type != DataType::Boolean {
                    return Err(ModbusError::ConfigError(format!(
                        "channel '{}' on {} must be boolean, not {}",
                        channel.identifier, channel.region, channel.data_type
                    )));
                }
                if channel.settable && !channel.region.is_writable() {
                    return Err(ModbusError::ConfigError(format!(
                        "channel '{}' is settable but {} is read-only",
                        channel.identifier, channel.region
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn transport_for<'a>(&'a self, device: &'a DeviceConfig) -> &'a TransportConfiguration {
        device.transport.as_ref().unwrap_or(&self.connector.transport)
    }

    pub fn enabled_devices(&self) -> Vec<&DeviceConfig> {
        self.devices.iter().filter(|d| d.enabled).collect()
    }

    pub fn device(&self, identifier: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.identifier == identifier)
    }
}
