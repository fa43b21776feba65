//! Serial port gateway implementation

use super::{
    Gateway, TransportError, TransportStats, TransportType, DEFAULT_TIMEOUT_MS, NO_CONNECTION,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Port read timeout; keeps `read` close to non-blocking
const READ_POLL: Duration = Duration::from_millis(5);

/// Baud rate of PI controllers as shipped
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial port configuration. GCS controllers always use 8 data bits, no
/// parity and one stop bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// RTS/CTS handshake, required by some controllers
    #[serde(default)]
    pub rtscts: bool,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl SerialConfig {
    /// Create a configuration without handshake
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            rtscts: false,
        }
    }

    /// Enable or disable the RTS/CTS handshake
    #[must_use]
    pub fn rtscts(mut self, rtscts: bool) -> Self {
        self.rtscts = rtscts;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("COM1", DEFAULT_BAUD_RATE)
    }
}

/// Serial port gateway
pub struct SerialGateway {
    config: SerialConfig,
    port: Mutex<Option<Box<dyn SerialPort>>>,
    timeout_ms: u64,
    stats: Arc<RwLock<TransportStats>>,
    connected_at: Option<Instant>,
}

impl SerialGateway {
    /// Create a new, unconnected serial gateway
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: Mutex::new(None),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            stats: Arc::new(RwLock::new(TransportStats::default())),
            connected_at: None,
        }
    }
}

#[async_trait]
impl Gateway for SerialGateway {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let flow_control = if self.config.rtscts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(flow_control)
            .timeout(READ_POLL)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => {
                    TransportError::PortNotFound(self.config.port.clone())
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(self.config.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        tracing::debug!("SerialGateway.connect: {}", self.connection_info());
        *self.port.lock() = Some(port);
        self.connected_at = Some(Instant::now());
        *self.stats.write() = TransportStats::default();

        self.flush().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.port.lock().take().is_some() {
            tracing::debug!("SerialGateway.close: {}", self.config.port);
        }
        self.connected_at = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.lock().is_some()
    }

    fn connection_id(&self) -> i32 {
        if self.is_connected() {
            0
        } else {
            NO_CONNECTION
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut port_guard = self.port.lock();
        let port = port_guard.as_mut().ok_or(TransportError::NotConnected)?;

        port.write_all(data)
            .map_err(|e| TransportError::SendError(e.to_string()))?;
        port.flush().map_err(TransportError::IoError)?;
        drop(port_guard);

        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.packets_sent += 1;

        Ok(())
    }

    async fn read(&mut self) -> Result<Bytes, TransportError> {
        let mut port_guard = self.port.lock();
        let port = port_guard.as_mut().ok_or(TransportError::NotConnected)?;

        let mut buffer = vec![0u8; 4096];

        let result = port.read(&mut buffer);
        drop(port_guard);

        match result {
            Ok(0) => Ok(Bytes::new()),
            Ok(n) => {
                buffer.truncate(n);

                let mut stats = self.stats.write();
                stats.bytes_received += n as u64;
                stats.packets_received += 1;

                Ok(Bytes::from(buffer))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Bytes::new()),
            Err(e) => Err(TransportError::IoError(e)),
        }
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        let mut port_guard = self.port.lock();
        let port = port_guard.as_mut().ok_or(TransportError::NotConnected)?;
        port.clear(ClearBuffer::Input)
            .map_err(|e| TransportError::IoError(std::io::Error::other(e)))
    }

    fn timeout(&self) -> u64 {
        self.timeout_ms
    }

    fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    fn connection_info(&self) -> String {
        let handshake = if self.config.rtscts { ", RTS/CTS" } else { "" };
        format!("{} @ {} baud{}", self.config.port, self.config.baud_rate, handshake)
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_info() {
        let gateway = SerialGateway::new(
            SerialConfig::new("/dev/ttyUSB0", 57600).rtscts(true),
        );
        assert_eq!(gateway.connection_info(), "/dev/ttyUSB0 @ 57600 baud, RTS/CTS");
        assert!(!gateway.is_connected());
        assert_eq!(gateway.connection_id(), NO_CONNECTION);
    }

    #[test]
    fn test_config_defaults() {
        let config: SerialConfig = toml::from_str(r#"port = "/dev/ttyS0""#).unwrap();
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert!(!config.rtscts);
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let mut gateway = SerialGateway::new(SerialConfig::default());
        assert!(matches!(
            gateway.send(b"*IDN?\n").await,
            Err(TransportError::NotConnected)
        ));
        assert!(gateway.close().await.is_ok());
    }
}
