use async_trait::async_trait;
use bytes::BytesMut;
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::frame::{self, FrameCodec, Framing, MAX_ADU_LENGTH};
use super::protocol::{
    AddressSpan, DataType, DecodedValue, FunctionCode, ReadRequest, RegisterRegion, ResponseFrame, Station, Value,
    WriteRequest, BROADCAST_STATION,
};
use super::transformer;
use crate::services::message_queue::{DecodedMessage, MessageQueue};
use crate::transport::TransportChannel;
use crate::utils::error::ModbusError;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait ModbusClientTrait: Send + Sync {
    async fn read_request(&self, request: &ReadRequest) -> Result<Vec<DecodedValue>, ModbusError>;

    async fn write_request(&self, request: &WriteRequest) -> Result<(), ModbusError>;

    /// Raw 16-bit words, one per register.
    async fn read_holding_registers(&self, station: Station, start: u16, count: u16) -> Result<Vec<u16>, ModbusError> {
        let request = ReadRequest::new(station, RegisterRegion::HoldingRegister, start, count);
        let values = self.read_request(&request).await?;
        Ok(values.iter().map(|decoded| decoded.value.as_f64() as u16).collect())
    }

    async fn write_single_coil(&self, station: Station, address: u16, value: bool) -> Result<(), ModbusError> {
        self.write_request(&WriteRequest::SingleCoil { station, address, value }).await
    }
}

/// Phase of the exchange currently owning the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Sending,
    AwaitingResponse,
    Parsed,
    TimedOut,
    Invalid,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One client per connector. The transport lock keeps a single exchange in
/// flight; the state lock is never held across an await.
pub struct ModbusClient {
    transport: Mutex<Box<dyn TransportChannel>>,
    codec: FrameCodec,
    queue: Arc<MessageQueue>,
    timeout: Duration,
    target: String,
    transaction_id: AtomicU16,
    state: StdMutex<ExchangeState>,
}

impl ModbusClient {
    pub fn new(transport: Box<dyn TransportChannel>, queue: Arc<MessageQueue>, timeout: Duration) -> Self {
        let codec = FrameCodec::new(transport.framing());
        let target = transport.target();
        Self {
            transport: Mutex::new(transport),
            codec,
            queue,
            timeout,
            target,
            transaction_id: AtomicU16::new(1),
            state: StdMutex::new(ExchangeState::Idle),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn framing(&self) -> Framing {
        self.codec.framing()
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    pub fn state(&self) -> ExchangeState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ExchangeState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn next_transaction_id(&self) -> u16 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Opens the transport if an earlier failure or `close` left it closed.
    pub async fn connect(&self) -> Result<(), ModbusError> {
        let mut transport = self.transport.lock().await;
        if !transport.is_open() {
            transport.open().await?;
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<(), ModbusError> {
        let mut transport = self.transport.lock().await;
        transport.close().await?;
        Ok(())
    }

    /// Runs one exchange. `None` is returned only for requests that expect no reply.
    async fn exchange(
        &self,
        station: Station,
        function: FunctionCode,
        pdu: &[u8],
        expect_reply: bool,
    ) -> Result<Option<Vec<u8>>, ModbusError> {
        let mut transport = self.transport.lock().await;
        if !transport.is_open() {
            transport.open().await?;
        }

        let transaction_id = self.next_transaction_id();
        let request = self.codec.encode(station, pdu, transaction_id);

        self.set_state(ExchangeState::Sending);
        debug!("➡️  {} TX {}", self.target, hex::encode(&request));
        if let Err(e) = transport.send(&request).await {
            self.set_state(ExchangeState::Idle);
            return Err(e.into());
        }

        if !expect_reply {
            self.set_state(ExchangeState::Idle);
            return Ok(None);
        }

        self.set_state(ExchangeState::AwaitingResponse);
        let outcome = self
            .await_response(&mut **transport, transaction_id)
            .await
            .and_then(|response| response.into_payload(station, function));

        match &outcome {
            Ok(_) | Err(ModbusError::Exception { .. }) => self.set_state(ExchangeState::Parsed),
            Err(ModbusError::Timeout) => self.set_state(ExchangeState::TimedOut),
            Err(_) => self.set_state(ExchangeState::Invalid),
        }
        if matches!(&outcome, Err(e) if e.is_retryable()) {
            transport.discard_pending().await;
        }
        self.set_state(ExchangeState::Idle);

        outcome.map(Some)
    }

    async fn await_response(
        &self,
        transport: &mut dyn TransportChannel,
        transaction_id: u16,
    ) -> Result<ResponseFrame, ModbusError> {
        let deadline = Instant::now() + self.timeout;
        let mut buffer = BytesMut::with_capacity(MAX_ADU_LENGTH);

        loop {
            if let Some(length) = self.codec.frame_length(&buffer)? {
                if buffer.len() >= length {
                    let response = buffer.split_to(length);
                    debug!("⬅️  {} RX {}", self.target, hex::encode(&response));
                    if self.codec.is_stale(&response, transaction_id) {
                        warn!(
                            "⚠️ {} answered an earlier transaction, dropping it and waiting for {}",
                            self.target, transaction_id
                        );
                        continue;
                    }
                    if !buffer.is_empty() {
                        warn!(
                            "⚠️ {} sent {} bytes past the end of the frame, ignoring them",
                            self.target,
                            buffer.len()
                        );
                    }
                    return self.codec.decode(&response, transaction_id);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("{} timed out with {} bytes buffered", self.target, buffer.len());
                return Err(ModbusError::Timeout);
            }

            let wanted = MAX_ADU_LENGTH.saturating_sub(buffer.len()).max(1);
            let chunk = transport.receive(wanted, remaining).await?;
            buffer.extend_from_slice(&chunk);
        }
    }

    /// Spans carried by `request`, or one raw value per address when it has none.
    fn spans_for(request: &ReadRequest) -> Vec<AddressSpan> {
        if !request.spans.is_empty() {
            return request.spans.clone();
        }

        let data_type = if request.region.is_bit() { DataType::Boolean } else { DataType::UShort };
        (0..request.quantity)
            .map(|offset| {
                let address = request.start_address + offset;
                AddressSpan::new(
                    format!("{}_{}", request.region.short_name(), address),
                    request.region,
                    address,
                    data_type,
                )
            })
            .collect()
    }
}

#[async_trait]
impl ModbusClientTrait for ModbusClient {
    async fn read_request(&self, request: &ReadRequest) -> Result<Vec<DecodedValue>, ModbusError> {
        request.validate()?;
        if self.framing() == Framing::Rtu && request.station == BROADCAST_STATION {
            return Err(ModbusError::ContractViolation(
                "station 0 is the RTU broadcast address and never answers a read".to_string(),
            ));
        }

        debug!(
            "📊 Reading {} {} from station {} starting at address {}",
            request.quantity, request.region, request.station, request.start_address
        );

        let payload = self
            .exchange(request.station, request.function(), &frame::read_pdu(request), true)
            .await?
            .unwrap_or_default();

        let spans = Self::spans_for(request);
        let mut decoded = Vec::with_capacity(spans.len());

        if request.region.is_bit() {
            let bits = frame::decode_bits(&payload, request.quantity)?;
            for span in spans {
                let offset = (span.address - request.start_address) as usize;
                decoded.push(DecodedValue { value: Value::Boolean(bits[offset]), span });
            }
        } else {
            let bytes = frame::decode_registers(&payload, request.quantity)?;
            for span in spans {
                let offset = (span.address - request.start_address) as usize * 2;
                let width = span.size() as usize * 2;
                let value = transformer::decode_value(&span, &bytes[offset..offset + width], request.byte_order)?;
                decoded.push(DecodedValue { span, value });
            }
        }

        for value in &decoded {
            self.queue.append(DecodedMessage::property(request.station, value));
        }

        Ok(decoded)
    }

    async fn write_request(&self, request: &WriteRequest) -> Result<(), ModbusError> {
        request.validate()?;
        let pdu = frame::write_pdu(request);

        if self.framing() == Framing::Rtu && request.station() == BROADCAST_STATION {
            self.exchange(request.station(), request.function(), &pdu, false).await?;
            info!("📢 Broadcast {} sent on {}", request.function(), self.target);
            return Ok(());
        }

        let payload = self
            .exchange(request.station(), request.function(), &pdu, true)
            .await?
            .unwrap_or_default();
        frame::check_write_echo(request, &payload)?;

        info!("✅ {} acknowledged by station {}", request.function(), request.station());
        Ok(())
    }
}
