//! USB bulk gateway implementation (libusb via rusb)

use super::{
    Gateway, TransportError, TransportStats, TransportType, DEFAULT_TIMEOUT_MS, NO_CONNECTION,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// USB vendor id of PI controllers
pub const PI_VENDOR_ID: u16 = 0x1a72;

/// Bulk read timeout; keeps `read` close to non-blocking
const READ_POLL: Duration = Duration::from_millis(5);

/// Read timeout used while discarding stale input
const FLUSH_POLL: Duration = Duration::from_millis(100);

/// Upper bound for draining a device that keeps sending
const FLUSH_LIMIT: Duration = Duration::from_secs(1);

fn default_vendor_id() -> u16 {
    PI_VENDOR_ID
}

/// USB connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbConfig {
    /// Serial number string of the controller
    pub serial_number: String,
    /// USB product id
    pub product_id: u16,
    /// USB vendor id
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,
}

impl UsbConfig {
    /// Create a configuration for a PI controller
    pub fn new(serial_number: &str, product_id: u16) -> Self {
        Self {
            serial_number: serial_number.to_string(),
            product_id,
            vendor_id: PI_VENDOR_ID,
        }
    }
}

/// Claimed interface and its bulk endpoints
struct UsbLink {
    handle: DeviceHandle<Context>,
    interface: u8,
    ep_in: u8,
    ep_out: u8,
    max_packet: usize,
    reattach: bool,
}

/// USB bulk gateway
pub struct UsbGateway {
    config: UsbConfig,
    link: Option<UsbLink>,
    timeout_ms: u64,
    stats: Arc<RwLock<TransportStats>>,
    connected_at: Option<Instant>,
}

impl UsbGateway {
    /// Create a new, unconnected USB gateway
    pub fn new(config: UsbConfig) -> Self {
        Self {
            config,
            link: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            stats: Arc::new(RwLock::new(TransportStats::default())),
            connected_at: None,
        }
    }

    /// Serial numbers of all attached devices with the given vendor id
    pub fn enumerate(vendor_id: u16) -> Result<Vec<String>, TransportError> {
        let ctx = Context::new().map_err(usb_error)?;
        let mut serials = Vec::new();
        for device in ctx.devices().map_err(usb_error)?.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            if desc.vendor_id() != vendor_id {
                continue;
            }
            if let Ok(handle) = device.open() {
                if let Ok(serial) = handle.read_serial_number_string_ascii(&desc) {
                    serials.push(serial);
                }
            }
        }
        Ok(serials)
    }

    fn find_device(&self) -> Result<(Device<Context>, DeviceHandle<Context>), TransportError> {
        let ctx = Context::new().map_err(usb_error)?;
        for device in ctx.devices().map_err(usb_error)?.iter() {
            let desc = device.device_descriptor().map_err(usb_error)?;
            if desc.vendor_id() != self.config.vendor_id
                || desc.product_id() != self.config.product_id
            {
                continue;
            }
            let handle = match device.open() {
                Ok(handle) => handle,
                Err(rusb::Error::Access) => {
                    return Err(TransportError::PermissionDenied(self.connection_info()))
                }
                Err(e) => return Err(usb_error(e)),
            };
            let serial = handle
                .read_serial_number_string_ascii(&desc)
                .unwrap_or_default();
            tracing::debug!("UsbGateway.find_device: found serial {:?}", serial);
            if serial.trim() == self.config.serial_number {
                return Ok((device, handle));
            }
        }
        Err(TransportError::PortNotFound(self.connection_info()))
    }
}

fn usb_error(e: rusb::Error) -> TransportError {
    TransportError::ConnectionFailed(format!("libusb: {e}"))
}

#[async_trait]
impl Gateway for UsbGateway {
    async fn connect(&mut self) -> Result<(), TransportError> {
        tracing::debug!("UsbGateway.connect({})", self.connection_info());
        let (device, handle) = self.find_device()?;

        let config = device.active_config_descriptor().map_err(usb_error)?;
        let mut found = None;
        for iface in config.interfaces() {
            for idesc in iface.descriptors() {
                let mut ep_in = None;
                let mut ep_out = None;
                for ep in idesc.endpoint_descriptors() {
                    if ep.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match ep.direction() {
                        Direction::In => ep_in = Some((ep.address(), ep.max_packet_size())),
                        Direction::Out => ep_out = Some(ep.address()),
                    }
                }
                if let (Some(ep_in), Some(ep_out)) = (ep_in, ep_out) {
                    found = Some((idesc.interface_number(), ep_in, ep_out));
                    break;
                }
            }
            if found.is_some() {
                break;
            }
        }
        let (interface, (ep_in, max_packet), ep_out) = found.ok_or_else(|| {
            TransportError::InvalidConfiguration("device has no bulk interface".to_string())
        })?;

        let reattach = matches!(handle.kernel_driver_active(interface), Ok(true));
        if reattach {
            handle.detach_kernel_driver(interface).map_err(usb_error)?;
        }
        handle.claim_interface(interface).map_err(usb_error)?;

        self.link = Some(UsbLink {
            handle,
            interface,
            ep_in,
            ep_out,
            max_packet: usize::from(max_packet).max(64),
            reattach,
        });
        self.connected_at = Some(Instant::now());
        *self.stats.write() = TransportStats::default();

        self.flush().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };
        tracing::debug!("UsbGateway.close: interface {}", link.interface);
        self.connected_at = None;
        link.handle
            .release_interface(link.interface)
            .map_err(usb_error)?;
        if link.reattach {
            link.handle
                .attach_kernel_driver(link.interface)
                .map_err(usb_error)?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn connection_id(&self) -> i32 {
        self.link
            .as_ref()
            .map_or(NO_CONNECTION, |link| i32::from(link.interface))
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;

        // Some controllers only accept messages of even length
        let mut msg = data.to_vec();
        if msg.len() % 2 == 1 {
            msg.push(0);
        }

        let timeout = Duration::from_millis(self.timeout_ms);
        let written = link
            .handle
            .write_bulk(link.ep_out, &msg, timeout)
            .map_err(|e| TransportError::SendError(e.to_string()))?;
        if written != msg.len() {
            return Err(TransportError::SendError(format!(
                "{written} of {} bytes written",
                msg.len()
            )));
        }

        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.packets_sent += 1;

        Ok(())
    }

    async fn read(&mut self) -> Result<Bytes, TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;

        let mut buffer = vec![0u8; link.max_packet];
        match link.handle.read_bulk(link.ep_in, &mut buffer, READ_POLL) {
            Ok(n) => {
                buffer.truncate(n);
                // Answers may be padded to an even length
                while buffer.last() == Some(&0) {
                    buffer.pop();
                }
                if !buffer.is_empty() {
                    let mut stats = self.stats.write();
                    stats.bytes_received += buffer.len() as u64;
                    stats.packets_received += 1;
                }
                Ok(Bytes::from(buffer))
            }
            Err(rusb::Error::Timeout) => Ok(Bytes::new()),
            Err(rusb::Error::NoDevice) => Err(TransportError::Disconnected),
            Err(e) => Err(TransportError::ReceiveError(e.to_string())),
        }
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        let mut buffer = vec![0u8; link.max_packet];
        let deadline = Instant::now() + FLUSH_LIMIT;
        while let Ok(n) = link.handle.read_bulk(link.ep_in, &mut buffer, FLUSH_POLL) {
            tracing::trace!("UsbGateway.flush: dropped {} bytes", n);
            if n == 0 || Instant::now() > deadline {
                break;
            }
        }
        Ok(())
    }

    fn timeout(&self) -> u64 {
        self.timeout_ms
    }

    fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Usb
    }

    fn connection_info(&self) -> String {
        format!(
            "{:04x}:{:04x} SN {}",
            self.config.vendor_id, self.config.product_id, self.config.serial_number
        )
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}

impl Drop for UsbGateway {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.handle.release_interface(link.interface).ok();
            if link.reattach {
                link.handle.attach_kernel_driver(link.interface).ok();
            }
        }
    }
}
