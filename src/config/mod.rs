pub mod providers;
pub mod settings;

pub use providers::{ChannelConfigurationProvider, DeviceConfigurationProvider, DeviceDescriptor};
pub use settings::{ChannelConfig, Config, ConnectorConfig, DeviceConfig};
