//! # gcslink
//!
//! Message and transport layer for PI motion controllers speaking GCS
//! (General Command Set):
//! - Transports: serial ports, TCP, USB bulk endpoints and the vendor's
//!   native GCS library
//! - Reply framing by the GCS end-of-line rule
//! - Error checking with `ERR?`, optionally embedded in the command write
//! - Bulk data transfers read by a background task
//! - Parsers for item/value answers and data headers
//! - Communication log
//!
//! ## Example
//!
//! ```rust,no_run
//! use gcslink::{GcsCommands, SessionConfig, TcpConfig, Transport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SessionConfig::new(Transport::Tcp(TcpConfig::new("192.168.90.10", 50000)));
//!     let mut pidevice = GcsCommands::open(&config).await?;
//!
//!     println!("{}", pidevice.qidn().await?);
//!     pidevice.svo(&["1"], &[true]).await?;
//!     pidevice.mov(&["1"], &[2.5]).await?;
//!     println!("{:?}", pidevice.qpos(&["1"]).await?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;
pub mod logging;

// Re-exports for convenience
pub use crate::config::SessionConfig;
pub use crate::core::camera::{check_status, CameraError, GxStatus};
pub use crate::core::command::{format_float, CommandBuilder, Dialect};
pub use crate::core::commands::GcsCommands;
pub use crate::core::eol::is_complete;
pub use crate::core::error::{translate_error, GcsError};
pub use crate::core::logger::CommLog;
pub use crate::core::messages::{BufState, GcsData, GcsMessages};
pub use crate::core::transport::{
    create_gateway, open_gateway, DllConfig, DllConnection, Gateway, ReplyServer, ScriptHandle,
    ScriptedGateway, SerialConfig, TcpConfig, Transport, TransportError, TransportType, UsbConfig,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
