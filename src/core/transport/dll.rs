//! Gateway through the vendor GCS library
//!
//! The library owns the physical connection; this gateway only passes
//! command strings in and answer strings out. The loaded library and the
//! connection id are released together when the gateway is dropped.

use super::{
    Gateway, TransportError, TransportStats, TransportType, DEFAULT_TIMEOUT_MS, NO_CONNECTION,
};
use async_trait::async_trait;
use bytes::Bytes;
use libloading::{Library, Symbol};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::ffi::{c_char, c_int, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

type ConnectTcpFn = unsafe extern "system" fn(*const c_char, c_int) -> c_int;
type ConnectRs232ByNameFn = unsafe extern "system" fn(*const c_char, c_int) -> c_int;
type ConnectRs232Fn = unsafe extern "system" fn(c_int, c_int) -> c_int;
type ConnectUsbFn = unsafe extern "system" fn(*const c_char) -> c_int;
type CommandsetFn = unsafe extern "system" fn(c_int, *const c_char) -> c_int;
type AnswerSizeFn = unsafe extern "system" fn(c_int, *mut c_int) -> c_int;
type AnswerFn = unsafe extern "system" fn(c_int, *mut c_char, c_int) -> c_int;
type IdFn = unsafe extern "system" fn(c_int) -> c_int;
type CloseFn = unsafe extern "system" fn(c_int);
type SetTimeoutFn = unsafe extern "system" fn(c_int, c_int) -> c_int;

/// Library file names on unix and their Windows counterparts
const UNIX_NAMES: [(&str, &str); 3] = [
    ("libpi_e7xx_gcs", "E7XX_GCS_DLL"),
    ("libpi_hydrapollux", "PI_HydraPollux_GCS2_DLL"),
    ("libpi_pi_gcs2", "PI_GCS2_DLL"),
];

/// How the library should reach the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "interface", rename_all = "lowercase")]
pub enum DllConnection {
    /// TCP/IP connection
    Tcp {
        /// Host address
        host: String,
        /// Port number
        #[serde(default = "default_gcs_port")]
        port: u16,
    },
    /// RS-232 connection by port number ("1" is COM1) or device name
    Rs232 {
        /// Port number or device name
        port: String,
        /// Baud rate
        baud_rate: u32,
    },
    /// USB connection by serial number or description
    Usb {
        /// Serial number
        serial_number: String,
    },
}

fn default_gcs_port() -> u16 {
    super::tcp::DEFAULT_GCS_PORT
}

/// Vendor library gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DllConfig {
    /// Path to the shared library
    #[serde(default = "default_library")]
    pub library: PathBuf,
    /// Function name prefix, derived from the library name if not set
    #[serde(default)]
    pub prefix: Option<String>,
    /// Connection to open
    pub connection: DllConnection,
}

fn default_library() -> PathBuf {
    let name = if cfg!(windows) {
        if cfg!(target_pointer_width = "64") {
            "PI_GCS2_DLL_x64.dll"
        } else {
            "PI_GCS2_DLL.dll"
        }
    } else if cfg!(target_os = "macos") {
        "libpi_pi_gcs2.dylib"
    } else {
        "libpi_pi_gcs2.so"
    };
    PathBuf::from(name)
}

impl DllConfig {
    /// Create a configuration using the default GCS2 library
    pub fn new(connection: DllConnection) -> Self {
        Self {
            library: default_library(),
            prefix: None,
            connection,
        }
    }

    /// Use another library file
    #[must_use]
    pub fn library(mut self, path: impl Into<PathBuf>) -> Self {
        self.library = path.into();
        self
    }
}

/// Function name prefix for the library at `path`.
pub fn dll_prefix(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = UNIX_NAMES
        .iter()
        .find(|(unix, _)| *unix == stem)
        .map_or(stem.as_str(), |(_, win)| *win);

    if name.to_ascii_uppercase().contains("PI_MERCURY_GCS_DLL") {
        "Mercury_".to_string()
    } else if name.contains("PI_HydraPollux_GCS2_DLL") {
        "Hydra_".to_string()
    } else if name.contains("PI_G_GCS2_DLL") {
        "PI_G_".to_string()
    } else {
        format!("{}_", name.split('_').next().unwrap_or_default())
    }
}

/// Gateway through the vendor GCS library
pub struct DllGateway {
    config: DllConfig,
    library: Library,
    prefix: String,
    id: i32,
    timeout_ms: u64,
    stats: Arc<RwLock<TransportStats>>,
    connected_at: Option<Instant>,
}

impl DllGateway {
    /// Load the library. No connection is opened yet.
    pub fn new(config: DllConfig) -> Result<Self, TransportError> {
        tracing::debug!("DllGateway.load: {}", config.library.display());
        // SAFETY: loading runs the library's initialisers; the GCS libraries
        // have no requirements on the loading thread.
        let library = unsafe { Library::new(&config.library) }.map_err(|e| {
            TransportError::PortNotFound(format!("{}: {e}", config.library.display()))
        })?;
        let prefix = config
            .prefix
            .clone()
            .unwrap_or_else(|| dll_prefix(&config.library));
        Ok(Self {
            config,
            library,
            prefix,
            id: NO_CONNECTION,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            stats: Arc::new(RwLock::new(TransportStats::default())),
            connected_at: None,
        })
    }

    /// Function name prefix in use
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn symbol<T: Copy>(&self, name: &str) -> Result<T, TransportError> {
        let full = format!("{}{}\0", self.prefix, name);
        // SAFETY: every `T` used here is the documented signature of the
        // named export, and the pointer does not outlive `self.library`.
        let symbol: Symbol<T> = unsafe { self.library.get(full.as_bytes()) }.map_err(|e| {
            TransportError::InvalidConfiguration(format!("{}{name}: {e}", self.prefix))
        })?;
        Ok(*symbol)
    }

    fn native_error(&self, context: &str) -> TransportError {
        let code = match self.symbol::<IdFn>("GetError") {
            // SAFETY: GetError takes any connection id
            Ok(get_error) => unsafe { get_error(self.id) },
            Err(_) => -1,
        };
        TransportError::Native {
            code,
            context: format!("{}{context}", self.prefix),
        }
    }

    fn answer_size(&self) -> Result<usize, TransportError> {
        let answer_size = self.symbol::<AnswerSizeFn>("GcsGetAnswerSize")?;
        let mut size: c_int = 0;
        // SAFETY: `size` is a valid out pointer for the duration of the call
        if unsafe { answer_size(self.id, &mut size) } == 0 {
            return Err(self.native_error("GcsGetAnswerSize"));
        }
        Ok(usize::try_from(size).unwrap_or(0))
    }

    fn answer(&self, size: usize) -> Result<Vec<u8>, TransportError> {
        let get_answer = self.symbol::<AnswerFn>("GcsGetAnswer")?;
        let mut buffer = vec![0u8; size + 2];
        let capacity = c_int::try_from(size + 1).unwrap_or(c_int::MAX);
        // SAFETY: the buffer holds `capacity` bytes plus a spare terminator
        if unsafe { get_answer(self.id, buffer.as_mut_ptr().cast::<c_char>(), capacity) } == 0 {
            return Err(self.native_error("GcsGetAnswer"));
        }
        let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
        buffer.truncate(end);
        Ok(buffer)
    }

    fn apply_timeout(&self) {
        match self.symbol::<SetTimeoutFn>("SetTimeout") {
            Ok(set_timeout) => {
                let ms = c_int::try_from(self.timeout_ms).unwrap_or(c_int::MAX);
                // SAFETY: plain integer arguments
                unsafe { set_timeout(self.id, ms) };
            }
            Err(_) => tracing::debug!("DllGateway: library has no SetTimeout"),
        }
    }

    fn close_native(&mut self) {
        if self.id < 0 {
            return;
        }
        tracing::debug!("DllGateway.close: connection id {}", self.id);
        if let Ok(close) = self.symbol::<CloseFn>("CloseConnection") {
            // SAFETY: `self.id` was returned by a connect call
            unsafe { close(self.id) };
        }
        self.id = NO_CONNECTION;
        self.connected_at = None;
    }
}

fn c_string(value: &str) -> Result<CString, TransportError> {
    CString::new(value).map_err(|_| {
        TransportError::InvalidConfiguration(format!("{value:?} contains a NUL byte"))
    })
}

#[async_trait]
impl Gateway for DllGateway {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.close_native();
        tracing::debug!("DllGateway.connect({})", self.connection_info());

        let id = match &self.config.connection {
            DllConnection::Tcp { host, port } => {
                let connect = self.symbol::<ConnectTcpFn>("ConnectTCPIP")?;
                let host = c_string(host)?;
                // SAFETY: `host` is a valid C string for the duration of the call
                unsafe { connect(host.as_ptr(), c_int::from(*port)) }
            }
            DllConnection::Rs232 { port, baud_rate } => {
                let baud = c_int::try_from(*baud_rate).map_err(|_| {
                    TransportError::InvalidConfiguration(format!("baud rate {baud_rate}"))
                })?;
                if let Ok(number) = port.parse::<c_int>() {
                    let connect = self.symbol::<ConnectRs232Fn>("ConnectRS232")?;
                    // SAFETY: plain integer arguments
                    unsafe { connect(number, baud) }
                } else {
                    let connect = self.symbol::<ConnectRs232ByNameFn>("ConnectRS232ByDevName")?;
                    let name = c_string(port)?;
                    // SAFETY: `name` is a valid C string for the duration of the call
                    unsafe { connect(name.as_ptr(), baud) }
                }
            }
            DllConnection::Usb { serial_number } => {
                let connect = self.symbol::<ConnectUsbFn>("ConnectUSB")?;
                let serial = c_string(serial_number)?;
                // SAFETY: `serial` is a valid C string for the duration of the call
                unsafe { connect(serial.as_ptr()) }
            }
        };

        if id < 0 {
            return match self.native_error("Connect") {
                TransportError::Native { code, context } => Err(TransportError::ConnectionFailed(
                    format!("{context} returned error {code}"),
                )),
                other => Err(other),
            };
        }

        self.id = id;
        self.connected_at = Some(Instant::now());
        *self.stats.write() = TransportStats::default();
        self.flush().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.close_native();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        if self.id < 0 {
            return false;
        }
        match self.symbol::<IdFn>("IsConnected") {
            // SAFETY: plain integer argument
            Ok(is_connected) => (unsafe { is_connected(self.id) }) != 0,
            Err(_) => true,
        }
    }

    fn connection_id(&self) -> i32 {
        self.id
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.id < 0 {
            return Err(TransportError::NotConnected);
        }
        let command = self.symbol::<CommandsetFn>("GcsCommandset")?;
        let msg = CString::new(data)
            .map_err(|_| TransportError::SendError("message contains a NUL byte".to_string()))?;
        // SAFETY: `msg` is a valid C string for the duration of the call
        if unsafe { command(self.id, msg.as_ptr()) } == 0 {
            return match self.native_error("GcsCommandset") {
                TransportError::Native { code, context } => Err(TransportError::SendError(
                    format!("{context} returned error {code}"),
                )),
                other => Err(other),
            };
        }

        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.packets_sent += 1;
        Ok(())
    }

    async fn read(&mut self) -> Result<Bytes, TransportError> {
        if self.id < 0 {
            return Err(TransportError::NotConnected);
        }
        let size = self.answer_size()?;
        if size == 0 {
            return Ok(Bytes::new());
        }
        let answer = self.answer(size)?;

        let mut stats = self.stats.write();
        stats.bytes_received += answer.len() as u64;
        stats.packets_received += 1;
        Ok(Bytes::from(answer))
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        if self.id < 0 {
            return Err(TransportError::NotConnected);
        }
        self.apply_timeout();
        loop {
            let size = self.answer_size()?;
            if size == 0 {
                return Ok(());
            }
            self.answer(size)?;
        }
    }

    fn timeout(&self) -> u64 {
        self.timeout_ms
    }

    fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
        if self.id >= 0 {
            self.apply_timeout();
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Dll
    }

    fn connection_info(&self) -> String {
        let target = match &self.config.connection {
            DllConnection::Tcp { host, port } => format!("TCPIP {host}:{port}"),
            DllConnection::Rs232 { port, baud_rate } => {
                format!("RS-232 port {port}, {baud_rate} Baud")
            }
            DllConnection::Usb { serial_number } => format!("USB {serial_number:?}"),
        };
        format!("{} via {}", target, self.config.library.display())
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}

impl Drop for DllGateway {
    fn drop(&mut self) {
        self.close_native();
    }
}
