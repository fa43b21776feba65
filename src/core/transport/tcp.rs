//! TCP gateway implementation

use super::{
    Gateway, TransportError, TransportStats, TransportType, DEFAULT_TIMEOUT_MS, NO_CONNECTION,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Default GCS controller port
pub const DEFAULT_GCS_PORT: u16 = 50000;

fn default_connect_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// TCP connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub timeout_ms: u64,
}

impl TcpConfig {
    /// Create a new TCP configuration
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Set connect timeout
    #[must_use]
    pub fn timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_GCS_PORT)
    }
}

/// TCP gateway
pub struct TcpGateway {
    config: TcpConfig,
    stream: Option<TcpStream>,
    timeout_ms: u64,
    stats: Arc<RwLock<TransportStats>>,
    connected_at: Option<Instant>,
}

impl TcpGateway {
    /// Create a new, unconnected TCP gateway
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            stream: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            stats: Arc::new(RwLock::new(TransportStats::default())),
            connected_at: None,
        }
    }
}

#[async_trait]
impl Gateway for TcpGateway {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        tracing::debug!("TcpGateway.connect({})", addr);

        let stream = tokio::time::timeout(
            Duration::from_millis(self.config.timeout_ms),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.config.timeout_ms))?
        .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;

        // Commands are short, do not wait for Nagle
        stream.set_nodelay(true).map_err(TransportError::IoError)?;

        self.stream = Some(stream);
        self.connected_at = Some(Instant::now());
        *self.stats.write() = TransportStats::default();

        self.flush().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!("TcpGateway.close: {}", self.connection_info());
            stream.shutdown().await.ok();
        }
        self.connected_at = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connection_id(&self) -> i32 {
        if self.stream.is_some() {
            0
        } else {
            NO_CONNECTION
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        stream
            .write_all(data)
            .await
            .map_err(|e| TransportError::SendError(e.to_string()))?;

        stream.flush().await.map_err(TransportError::IoError)?;

        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.packets_sent += 1;

        Ok(())
    }

    async fn read(&mut self) -> Result<Bytes, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        let mut buffer = vec![0u8; 4096];

        // try_read never waits for data
        match stream.try_read(&mut buffer) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => {
                buffer.truncate(n);

                let mut stats = self.stats.write();
                stats.bytes_received += n as u64;
                stats.packets_received += 1;

                Ok(Bytes::from(buffer))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Bytes::new()),
            Err(e) => Err(TransportError::IoError(e)),
        }
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let mut buffer = [0u8; 4096];
        loop {
            match stream.try_read(&mut buffer) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => tracing::trace!("TcpGateway.flush: dropped {} bytes", n),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(TransportError::IoError(e)),
            }
        }
    }

    fn timeout(&self) -> u64 {
        self.timeout_ms
    }

    fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Tcp
    }

    fn connection_info(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind and drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut gateway = TcpGateway::new(TcpConfig::new("127.0.0.1", port).timeout(500));
        let err = gateway.connect().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ConnectionFailed(_) | TransportError::Timeout(_)
        ));
        assert!(!gateway.is_connected());
    }

    #[tokio::test]
    async fn test_read_returns_empty_when_idle() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let mut gateway = TcpGateway::new(TcpConfig::new("127.0.0.1", port));
        gateway.connect().await.unwrap();
        let _peer = accept.await.unwrap();

        assert!(gateway.read().await.unwrap().is_empty());
        assert_eq!(gateway.connection_id(), 0);
        gateway.close().await.unwrap();
        gateway.close().await.unwrap();
        assert_eq!(gateway.connection_id(), NO_CONNECTION);
    }
}
