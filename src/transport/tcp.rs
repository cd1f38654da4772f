use async_trait::async_trait;
use log::{debug, error, info};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{TcpSettings, TransportChannel};
use crate::modbus::frame::Framing;
use crate::utils::error::TransportError;

pub struct TcpTransport {
    settings: TcpSettings,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(settings: TcpSettings, connect_timeout: Duration) -> Self {
        Self {
            settings,
            connect_timeout,
            stream: None,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }
}

#[async_trait]
impl TransportChannel for TcpTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let address = self.address();
        if self.stream.is_some() {
            return Err(TransportError::AlreadyOpen(address));
        }

        info!("🔌 Connecting to Modbus TCP server: {}", address);
        let stream = match timeout(self.connect_timeout, TcpStream::connect(address.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("❌ Failed to connect to {}: {}", address, e);
                return Err(TransportError::Open {
                    target: address,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                error!("❌ Connection to {} timed out", address);
                return Err(TransportError::Open {
                    target: address,
                    reason: format!("connect timed out after {:?}", self.connect_timeout),
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Unable to set TCP_NODELAY on {}: {}", address, e);
        }

        self.stream = Some(stream);
        info!("✅ Modbus TCP connection established with {}", address);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .shutdown()
                .await
                .map_err(|e| TransportError::Write(format!("shutdown failed: {}", e)))?;
            info!("🔌 Closed connection to {}", self.address());
        }
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        stream
            .write_all(bytes)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))?;
        Ok(bytes.len())
    }

    async fn receive(&mut self, max_bytes: usize, wait: Duration) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        let mut buffer = vec![0u8; max_bytes.max(1)];

        match timeout(wait, stream.read(&mut buffer)).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(Ok(0)) => {
                self.stream = None;
                Err(TransportError::Read("connection closed by peer".to_string()))
            }
            Ok(Ok(n)) => {
                buffer.truncate(n);
                Ok(buffer)
            }
            Ok(Err(e)) => Err(TransportError::Read(e.to_string())),
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn framing(&self) -> Framing {
        Framing::Tcp
    }

    fn target(&self) -> String {
        self.address()
    }

    async fn discard_pending(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let mut scratch = [0u8; 256];
        let mut dropped = 0;
        // try_read never waits, WouldBlock ends the drain
        while let Ok(n) = stream.try_read(&mut scratch) {
            if n == 0 {
                break;
            }
            dropped += n;
        }
        if dropped > 0 {
            debug!("Discarded {} stale bytes from {}", dropped, self.address());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn round_trip_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = [0u8; 4];
            socket.read_exact(&mut buffer).await.unwrap();
            socket.write_all(&buffer).await.unwrap();
        });

        let mut transport = TcpTransport::new(
            TcpSettings { host: "127.0.0.1".to_string(), port },
            Duration::from_secs(1),
        );
        transport.open().await.unwrap();
        assert!(matches!(transport.open().await, Err(TransportError::AlreadyOpen(_))));

        assert_eq!(transport.send(&[1, 2, 3, 4]).await, Ok(4));
        let mut echoed = Vec::new();
        while echoed.len() < 4 {
            echoed.extend(transport.receive(16, Duration::from_secs(1)).await.unwrap());
        }
        assert_eq!(echoed, vec![1, 2, 3, 4]);

        transport.close().await.unwrap();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::new(
            TcpSettings { host: "127.0.0.1".to_string(), port },
            Duration::from_secs(1),
        );
        transport.open().await.unwrap();
        assert_eq!(
            transport.receive(8, Duration::from_millis(50)).await,
            Err(TransportError::Timeout)
        );
    }
}
