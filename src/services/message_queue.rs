use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::modbus::protocol::{DataType, DecodedValue, RegisterRegion, Station, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Lost,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Lost => write!(f, "lost"),
        }
    }
}

/// Outbound event for the state writer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodedMessage {
    ChannelPropertyState {
        station: Station,
        identifier: String,
        region: RegisterRegion,
        address: u16,
        data_type: DataType,
        value: Value,
        timestamp: DateTime<Utc>,
    },
    DeviceConnectionState {
        device: String,
        station: Station,
        state: ConnectionState,
        timestamp: DateTime<Utc>,
    },
}

impl DecodedMessage {
    pub fn property(station: Station, decoded: &DecodedValue) -> Self {
        Self::ChannelPropertyState {
            station,
            identifier: decoded.span.identifier.clone(),
            region: decoded.span.region,
            address: decoded.span.address,
            data_type: decoded.span.data_type,
            value: decoded.value,
            timestamp: Utc::now(),
        }
    }

    pub fn connection(device: impl Into<String>, station: Station, state: ConnectionState) -> Self {
        Self::DeviceConnectionState {
            device: device.into(),
            station,
            state,
            timestamp: Utc::now(),
        }
    }

    pub fn station(&self) -> Station {
        match self {
            Self::ChannelPropertyState { station, .. } | Self::DeviceConnectionState { station, .. } => *station,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ChannelPropertyState { timestamp, .. } | Self::DeviceConnectionState { timestamp, .. } => {
                *timestamp
            }
        }
    }
}

/// FIFO between the client (producer) and an external consumer. The lock only
/// guards the deque itself.
#[derive(Debug, Default)]
pub struct MessageQueue {
    queue: Mutex<VecDeque<DecodedMessage>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, message: DecodedMessage) {
        debug!("📥 Queued {:?}", message);
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(message);
    }

    pub fn dequeue(&self) -> Option<DecodedMessage> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    /// Takes everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<DecodedMessage> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::protocol::AddressSpan;
    use std::sync::Arc;

    fn decoded(address: u16) -> DecodedValue {
        DecodedValue {
            span: AddressSpan::new(format!("r{}", address), RegisterRegion::HoldingRegister, address, DataType::UShort),
            value: Value::Unsigned(address as u32),
        }
    }

    #[test]
    fn first_in_first_out() {
        let queue = MessageQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);

        queue.append(DecodedMessage::property(1, &decoded(10)));
        queue.append(DecodedMessage::connection("boiler", 1, ConnectionState::Lost));
        queue.append(DecodedMessage::property(1, &decoded(11)));
        assert_eq!(queue.len(), 3);

        assert!(matches!(
            queue.dequeue(),
            Some(DecodedMessage::ChannelPropertyState { address: 10, .. })
        ));
        assert!(matches!(
            queue.dequeue(),
            Some(DecodedMessage::DeviceConnectionState { state: ConnectionState::Lost, .. })
        ));
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn producer_and_consumer_on_separate_threads() {
        let queue = Arc::new(MessageQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for address in 0..500 {
                    queue.append(DecodedMessage::property(1, &decoded(address)));
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 500 {
            if let Some(DecodedMessage::ChannelPropertyState { address, .. }) = queue.dequeue() {
                received.push(address);
            }
        }
        producer.join().unwrap();

        assert_eq!(received, (0..500).collect::<Vec<u16>>());
    }

    #[test]
    fn serializes_with_type_tag() {
        let message = DecodedMessage::property(4, &decoded(7));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "channel_property_state");
        assert_eq!(json["identifier"], "r7");
        assert_eq!(json["region"], "holding_register");
        assert_eq!(json["value"], 7);
    }
}
