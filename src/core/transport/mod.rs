//! Transport layer for GCS controllers
//!
//! Supports:
//! - Serial ports (RS-232, USB-serial adapters)
//! - Raw TCP connections (controller port 50000)
//! - USB bulk endpoints via libusb
//! - The vendor GCS library as a gateway
//! - A scripted in-memory gateway and a TCP reply server for tests

mod dll;
mod reply_server;
mod scripted;
mod serial;
mod tcp;
mod usb;

pub use dll::{dll_prefix, DllConfig, DllConnection, DllGateway};
pub use reply_server::ReplyServer;
pub use scripted::{ScriptHandle, ScriptedGateway};
pub use serial::{list_ports, SerialConfig, SerialGateway, DEFAULT_BAUD_RATE};
pub use tcp::{TcpConfig, TcpGateway, DEFAULT_GCS_PORT};
pub use usb::{UsbConfig, UsbGateway, PI_VENDOR_ID};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default reply timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 7000;

/// Connection id reported while no connection is open
pub const NO_CONNECTION: i32 = -1;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Transport {
    /// Serial port connection
    Serial(SerialConfig),
    /// Raw TCP connection
    Tcp(TcpConfig),
    /// USB bulk connection
    Usb(UsbConfig),
    /// Connection through the vendor GCS library
    Dll(DllConfig),
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Serial port
    Serial,
    /// Raw TCP
    Tcp,
    /// USB bulk endpoints
    Usb,
    /// Vendor library
    Dll,
    /// In-memory script
    Scripted,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Tcp => write!(f, "TCP"),
            Self::Usb => write!(f, "USB"),
            Self::Dll => write!(f, "DLL"),
            Self::Scripted => write!(f, "Scripted"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("Connection timeout after {0} ms")]
    Timeout(u64),

    /// Port or device not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Peer closed the connection
    #[error("Disconnected")]
    Disconnected,

    /// Send error
    #[error("Send error: {0}")]
    SendError(String),

    /// Receive error
    #[error("Receive error: {0}")]
    ReceiveError(String),

    /// Error code reported by the vendor library
    #[error("Library error {code}: {context}")]
    Native {
        /// GCS error code from the library's error query
        code: i32,
        /// Failing library call
        context: String,
    },
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Writes performed
    pub packets_sent: u64,
    /// Non-empty reads performed
    pub packets_received: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Byte-oriented connection to a GCS controller
///
/// `read` never blocks for long and never fails because nothing is
/// available; the message layer does the timeout handling.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Open the connection and discard stale input
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Release the connection; calling it twice is harmless
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Connection id, [`NO_CONNECTION`] if closed
    fn connection_id(&self) -> i32;

    /// Write all of `data`
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Return whatever is available right now, possibly nothing
    async fn read(&mut self) -> Result<Bytes, TransportError>;

    /// Discard unread input
    async fn flush(&mut self) -> Result<(), TransportError>;

    /// Reply timeout in milliseconds
    fn timeout(&self) -> u64;

    /// Set the reply timeout in milliseconds
    fn set_timeout(&mut self, timeout_ms: u64);

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;
}

/// Create a gateway instance from configuration. The gateway is not connected yet.
pub fn create_gateway(config: Transport) -> Result<Box<dyn Gateway>, TransportError> {
    match config {
        Transport::Serial(cfg) => Ok(Box::new(SerialGateway::new(cfg))),
        Transport::Tcp(cfg) => Ok(Box::new(TcpGateway::new(cfg))),
        Transport::Usb(cfg) => Ok(Box::new(UsbGateway::new(cfg))),
        Transport::Dll(cfg) => Ok(Box::new(DllGateway::new(cfg)?)),
    }
}

/// Create and connect a gateway
pub async fn open_gateway(config: Transport) -> Result<Box<dyn Gateway>, TransportError> {
    let mut gateway = create_gateway(config)?;
    gateway.connect().await?;
    tracing::info!(
        "Connected via {}: {} (id {})",
        gateway.transport_type(),
        gateway.connection_info(),
        gateway.connection_id()
    );
    Ok(gateway)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_from_toml() {
        let tcp: Transport = toml::from_str(
            r#"
            type = "tcp"
            host = "192.168.90.10"
            port = 50000
            timeout_ms = 2000
            "#,
        )
        .unwrap();
        assert!(matches!(tcp, Transport::Tcp(ref c) if c.port == 50000 && c.timeout_ms == 2000));

        let serial: Transport = toml::from_str(
            r#"
            type = "serial"
            port = "/dev/ttyUSB0"
            baud_rate = 38400
            rtscts = true
            "#,
        )
        .unwrap();
        assert!(matches!(serial, Transport::Serial(ref c) if c.baud_rate == 38400 && c.rtscts));
    }

    #[test]
    fn test_transport_type_display() {
        assert_eq!(TransportType::Tcp.to_string(), "TCP");
        assert_eq!(TransportType::Dll.to_string(), "DLL");
    }
}
