use async_trait::async_trait;
use log::{error, info, warn};
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use super::{Parity, SerialConfigurator, SerialLineSettings, StopBits, TransportChannel};
use crate::modbus::frame::Framing;
use crate::utils::error::TransportError;

/// RTU line. The OS configuration command runs before the device is opened;
/// blocking port I/O is moved onto the blocking thread pool.
pub struct SerialTransport {
    settings: SerialLineSettings,
    configurator: SerialConfigurator,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(settings: SerialLineSettings, configurator: SerialConfigurator) -> Self {
        Self {
            settings,
            configurator,
            port: None,
        }
    }

    fn take_port(&mut self) -> Result<Box<dyn SerialPort>, TransportError> {
        self.port.take().ok_or(TransportError::NotOpen)
    }
}

fn data_bits(bits: u8) -> serialport::DataBits {
    match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

fn stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::OnePointFive | StopBits::Two => serialport::StopBits::Two,
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

#[async_trait]
impl TransportChannel for SerialTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Err(TransportError::AlreadyOpen(self.settings.device_path.clone()));
        }

        info!("🔌 Connecting to Modbus RTU port: {}", self.settings.device_path);
        self.configurator.configure(&self.settings).await?;

        let flow_control = if self.settings.flow_control {
            serialport::FlowControl::Software
        } else {
            serialport::FlowControl::None
        };

        let port = serialport::new(self.settings.device_path.as_str(), self.settings.baud_rate)
            .data_bits(data_bits(self.settings.data_bits))
            .stop_bits(stop_bits(self.settings.stop_bits))
            .parity(parity(self.settings.parity))
            .flow_control(flow_control)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| {
                error!("❌ Failed to open serial port {}: {}", self.settings.device_path, e);
                TransportError::Open {
                    target: self.settings.device_path.clone(),
                    reason: e.to_string(),
                }
            })?;

        self.port = Some(port);
        info!("✅ Modbus RTU connection established on {}", self.settings.device_path);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            info!("🔌 Closed serial port {}", self.settings.device_path);
        }
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut port = self.take_port()?;
        let frame = bytes.to_vec();

        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = port.write_all(&frame).and_then(|_| port.flush()).map(|_| frame.len());
            (port, result)
        })
        .await
        .map_err(|e| TransportError::Write(format!("serial writer task failed: {}", e)))?;

        self.port = Some(port);
        result.map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn receive(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut port = self.take_port()?;

        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = port.set_timeout(timeout).map_err(|e| TransportError::Read(e.to_string())).and_then(|_| {
                let mut buffer = vec![0u8; max_bytes.max(1)];
                match port.read(&mut buffer) {
                    Ok(0) => Err(TransportError::Timeout),
                    Ok(n) => {
                        buffer.truncate(n);
                        Ok(buffer)
                    }
                    Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                        Err(TransportError::Timeout)
                    }
                    Err(e) => Err(TransportError::Read(e.to_string())),
                }
            });
            (port, result)
        })
        .await
        .map_err(|e| TransportError::Read(format!("serial reader task failed: {}", e)))?;

        self.port = Some(port);
        result
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn framing(&self) -> Framing {
        Framing::Rtu
    }

    fn target(&self) -> String {
        self.settings.device_path.clone()
    }

    async fn discard_pending(&mut self) {
        if let Some(port) = self.port.as_ref() {
            if let Err(e) = port.clear(ClearBuffer::Input) {
                warn!("⚠️ Unable to flush input of {}: {}", self.settings.device_path, e);
            }
        }
    }
}
