use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::providers::{ChannelConfigurationProvider, DeviceConfigurationProvider, DeviceDescriptor};
use crate::config::settings::ConnectorConfig;
use crate::modbus::client::{ModbusClient, ModbusClientTrait};
use crate::modbus::planner::RequestPlanner;
use crate::modbus::protocol::ReadRequest;
use crate::modbus::retry::RetryPolicy;
use crate::services::message_queue::{ConnectionState, DecodedMessage, MessageQueue};
use crate::transport::{TransportChannel, TransportConfiguration};
use crate::utils::error::ModbusError;

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub max_read_attempts: u32,
    pub lost_delay: Duration,
    pub planner: RequestPlanner,
}

impl From<&ConnectorConfig> for PollSettings {
    fn from(connector: &ConnectorConfig) -> Self {
        Self {
            timeout: connector.timeout(),
            retry: connector.retry_policy(),
            max_read_attempts: connector.max_read_attempts.max(1),
            lost_delay: connector.lost_delay(),
            planner: connector.planner(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PollSummary {
    pub devices_polled: usize,
    pub devices_skipped: usize,
    pub values_read: usize,
    pub errors: Vec<(String, ModbusError)>,
}

#[derive(Debug, Default)]
struct DeviceHealth {
    failures: u32,
    state: Option<ConnectionState>,
    lost_at: Option<Instant>,
}

struct PolledDevice {
    descriptor: DeviceDescriptor,
    requests: Vec<ReadRequest>,
    client: Arc<ModbusClient>,
}

/// Drives one read cycle over every configured device. Cadence belongs to the caller.
pub struct PollService {
    devices: Vec<PolledDevice>,
    clients: Vec<Arc<ModbusClient>>,
    queue: Arc<MessageQueue>,
    settings: PollSettings,
    health: HashMap<String, DeviceHealth>,
}

impl PollService {
    /// Plans every device's reads up front and shares one client per distinct transport.
    pub fn new<P, F>(
        provider: &P,
        settings: PollSettings,
        queue: Arc<MessageQueue>,
        mut open_transport: F,
    ) -> Result<Self, ModbusError>
    where
        P: DeviceConfigurationProvider + ChannelConfigurationProvider,
        F: FnMut(&TransportConfiguration) -> Box<dyn TransportChannel>,
    {
        let mut by_target: HashMap<String, Arc<ModbusClient>> = HashMap::new();
        let mut clients = Vec::new();
        let mut devices = Vec::new();

        for descriptor in provider.devices() {
            let spans = provider.spans(&descriptor.identifier);
            if spans.is_empty() {
                debug!("Device {} has no channels, skipping", descriptor.identifier);
                continue;
            }

            let requests = settings
                .planner
                .plan_device(descriptor.station, &spans, descriptor.byte_order)?;

            let client = by_target
                .entry(descriptor.transport.target())
                .or_insert_with(|| {
                    let client = Arc::new(ModbusClient::new(
                        open_transport(&descriptor.transport),
                        Arc::clone(&queue),
                        settings.timeout,
                    ));
                    clients.push(Arc::clone(&client));
                    client
                })
                .clone();

            info!(
                "📋 Device {} (station {}) on {}: {} channels in {} requests",
                descriptor.identifier,
                descriptor.station,
                client.target(),
                spans.len(),
                requests.len()
            );
            devices.push(PolledDevice { descriptor, requests, client });
        }

        Ok(Self {
            devices,
            clients,
            queue,
            settings,
            health: HashMap::new(),
        })
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn connection_state(&self, device: &str) -> Option<ConnectionState> {
        self.health.get(device).and_then(|h| h.state)
    }

    pub async fn poll_once(&mut self) -> PollSummary {
        let mut summary = PollSummary::default();
        let retry = self.settings.retry;

        for device in &self.devices {
            let identifier = &device.descriptor.identifier;
            let health = self.health.entry(identifier.clone()).or_default();

            if let (Some(ConnectionState::Lost), Some(lost_at)) = (health.state, health.lost_at) {
                if lost_at.elapsed() < self.settings.lost_delay {
                    debug!("Device {} is lost, waiting before polling again", identifier);
                    summary.devices_skipped += 1;
                    continue;
                }
            }

            summary.devices_polled += 1;
            let mut reachable = false;

            for request in &device.requests {
                let client = &*device.client;
                match retry.run(move || client.read_request(request)).await {
                    Ok(values) => {
                        reachable = true;
                        summary.values_read += values.len();
                    }
                    Err(e @ ModbusError::Exception { .. }) => {
                        // the device answered, it is only this range that is rejected
                        reachable = true;
                        warn!(
                            "⚠️ Device {} rejected {} {}..{}: {}",
                            identifier,
                            request.region,
                            request.start_address,
                            request.end(),
                            e
                        );
                        summary.errors.push((identifier.clone(), e));
                    }
                    Err(e) => {
                        error!("❌ Reading device {} failed: {}", identifier, e);
                        summary.errors.push((identifier.clone(), e));
                        break;
                    }
                }
            }

            Self::record_outcome(&self.queue, &self.settings, device, health, reachable);
        }

        summary
    }

    fn record_outcome(
        queue: &MessageQueue,
        settings: &PollSettings,
        device: &PolledDevice,
        health: &mut DeviceHealth,
        reachable: bool,
    ) {
        let descriptor = &device.descriptor;

        if reachable {
            health.failures = 0;
            health.lost_at = None;
            if health.state != Some(ConnectionState::Connected) {
                info!("✅ Device {} is connected", descriptor.identifier);
                health.state = Some(ConnectionState::Connected);
                queue.append(DecodedMessage::connection(
                    descriptor.identifier.clone(),
                    descriptor.station,
                    ConnectionState::Connected,
                ));
            }
            return;
        }

        health.failures += 1;
        if health.state == Some(ConnectionState::Lost) {
            health.lost_at = Some(Instant::now());
            return;
        }

        if health.failures >= settings.max_read_attempts {
            warn!(
                "⚠️ Device {} did not answer {} times, marking it lost",
                descriptor.identifier, health.failures
            );
            health.state = Some(ConnectionState::Lost);
            health.lost_at = Some(Instant::now());
            queue.append(DecodedMessage::connection(
                descriptor.identifier.clone(),
                descriptor.station,
                ConnectionState::Lost,
            ));
        }
    }

    pub async fn shutdown(&self) {
        for client in &self.clients {
            if let Err(e) = client.close().await {
                warn!("⚠️ Closing {} failed: {}", client.target(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::modbus::crc::append_crc;
    use crate::modbus::frame::Framing;
    use crate::utils::error::TransportError;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Answers every request with the next canned frame, or times out.
    struct CannedTransport {
        open: bool,
        replies: VecDeque<Vec<u8>>,
    }

    #[async_trait]
    impl TransportChannel for CannedTransport {
        async fn open(&mut self) -> Result<(), TransportError> {
            self.open = true;
            Ok(())
        }
        async fn close(&mut self) -> Result<(), TransportError> {
            self.open = false;
            Ok(())
        }
        async fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
            Ok(bytes.len())
        }
        async fn receive(&mut self, _max: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
            self.replies.pop_front().ok_or(TransportError::Timeout)
        }
        fn is_open(&self) -> bool {
            self.open
        }
        fn framing(&self) -> Framing {
            Framing::Rtu
        }
        fn target(&self) -> String {
            "canned".to_string()
        }
    }

    fn single_channel_config() -> Config {
        let mut config = Config::default();
        config.devices[0].channels.truncate(1);
        config
    }

    fn settings(max_read_attempts: u32, lost_delay: Duration) -> PollSettings {
        PollSettings {
            timeout: Duration::from_millis(50),
            retry: RetryPolicy::no_retry(),
            max_read_attempts,
            lost_delay,
            planner: RequestPlanner::default(),
        }
    }

    fn voltage_reply() -> Vec<u8> {
        let mut frame = vec![0x01, 0x04, 0x04, 0x43, 0x66, 0x00, 0x00];
        append_crc(&mut frame);
        frame
    }

    #[tokio::test]
    async fn successful_poll_reports_values_and_connection() {
        let queue = Arc::new(MessageQueue::new());
        let mut service = PollService::new(
            &single_channel_config(),
            settings(5, Duration::from_secs(5)),
            Arc::clone(&queue),
            |_| Box::new(CannedTransport { open: false, replies: vec![voltage_reply()].into() }),
        )
        .unwrap();

        let summary = service.poll_once().await;
        assert_eq!(summary.devices_polled, 1);
        assert_eq!(summary.values_read, 1);
        assert!(summary.errors.is_empty());
        assert_eq!(service.connection_state("energy-meter"), Some(ConnectionState::Connected));

        let messages = queue.drain();
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0],
            DecodedMessage::ChannelPropertyState { identifier, .. } if identifier == "voltage"
        ));
        assert!(matches!(
            messages[1],
            DecodedMessage::DeviceConnectionState { state: ConnectionState::Connected, .. }
        ));
    }

    #[tokio::test]
    async fn device_is_lost_after_repeated_failures_and_then_skipped() {
        let queue = Arc::new(MessageQueue::new());
        let mut service = PollService::new(
            &single_channel_config(),
            settings(2, Duration::from_secs(60)),
            Arc::clone(&queue),
            |_| Box::new(CannedTransport { open: false, replies: VecDeque::new() }),
        )
        .unwrap();

        let first = service.poll_once().await;
        assert_eq!(first.errors.len(), 1);
        assert_eq!(service.connection_state("energy-meter"), None);

        service.poll_once().await;
        assert_eq!(service.connection_state("energy-meter"), Some(ConnectionState::Lost));
        assert!(matches!(
            queue.dequeue(),
            Some(DecodedMessage::DeviceConnectionState { state: ConnectionState::Lost, .. })
        ));

        let third = service.poll_once().await;
        assert_eq!(third.devices_skipped, 1);
        assert_eq!(third.devices_polled, 0);
    }

    #[tokio::test]
    async fn devices_sharing_a_line_share_a_client() {
        let mut config = Config::default();
        let mut second = config.devices[0].clone();
        second.identifier = "second-meter".to_string();
        second.station = 2;
        config.devices.push(second);

        let mut opened = 0;
        let service = PollService::new(
            &config,
            settings(5, Duration::from_secs(5)),
            Arc::new(MessageQueue::new()),
            |_| {
                opened += 1;
                Box::new(CannedTransport { open: false, replies: VecDeque::new() })
            },
        )
        .unwrap();

        assert_eq!(service.device_count(), 2);
        assert_eq!(opened, 1);
    }
}
