//! Boundaries through which the engine learns what to poll.

use crate::modbus::protocol::{AddressSpan, Station};
use crate::modbus::transformer::ByteOrder;
use crate::transport::TransportConfiguration;

use super::settings::Config;

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub identifier: String,
    pub station: Station,
    pub transport: TransportConfiguration,
    pub byte_order: ByteOrder,
}

pub trait DeviceConfigurationProvider {
    /// Devices that should be polled.
    fn devices(&self) -> Vec<DeviceDescriptor>;
}

pub trait ChannelConfigurationProvider {
    fn spans(&self, device: &str) -> Vec<AddressSpan>;
}

impl DeviceConfigurationProvider for Config {
    fn devices(&self) -> Vec<DeviceDescriptor> {
        self.enabled_devices()
            .into_iter()
            .map(|device| DeviceDescriptor {
                identifier: device.identifier.clone(),
                station: device.station,
                transport: self.transport_for(device).clone(),
                byte_order: device.byte_order,
            })
            .collect()
    }
}

impl ChannelConfigurationProvider for Config {
    fn spans(&self, device: &str) -> Vec<AddressSpan> {
        self.device(device)
            .map(|d| d.channels.iter().map(|c| c.span()).collect())
            .unwrap_or_default()
    }
}
