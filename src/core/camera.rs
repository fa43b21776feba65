//! Status codes of the GxIAPI camera library
//!
//! The camera SDK reports every call result as a signed status code. This
//! table is independent from the GCS error table and must not be merged with
//! it: both use small negative numbers for different conditions.

use thiserror::Error;

/// Status code returned by GxIAPI functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum GxStatus {
    /// Success
    Success = 0,
    /// Unspecified internal error
    Error = -1,
    /// The TL library cannot be found
    NotFoundTl = -2,
    /// The device is not found
    NotFoundDevice = -3,
    /// The device is offline
    Offline = -4,
    /// Invalid parameter, e.g. a null pointer or malformed IP
    InvalidParameter = -5,
    /// Invalid handle
    InvalidHandle = -6,
    /// Interface logic error
    InvalidCall = -7,
    /// Function currently inaccessible or wrong access mode
    InvalidAccess = -8,
    /// User buffer is too small
    NeedMoreBuffer = -9,
    /// Feature id used with the wrong value type
    ErrorType = -10,
    /// Written value out of range
    OutOfRange = -11,
    /// Function not supported
    NotImplemented = -12,
    /// The library was not initialized
    NotInitApi = -13,
    /// Timeout
    Timeout = -14,
    /// The device is already open
    RepeatOpened = -1004,
}

impl GxStatus {
    /// Look up a raw status code, `None` for codes outside the table
    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code {
            0 => Self::Success,
            -1 => Self::Error,
            -2 => Self::NotFoundTl,
            -3 => Self::NotFoundDevice,
            -4 => Self::Offline,
            -5 => Self::InvalidParameter,
            -6 => Self::InvalidHandle,
            -7 => Self::InvalidCall,
            -8 => Self::InvalidAccess,
            -9 => Self::NeedMoreBuffer,
            -10 => Self::ErrorType,
            -11 => Self::OutOfRange,
            -12 => Self::NotImplemented,
            -13 => Self::NotInitApi,
            -14 => Self::Timeout,
            -1004 => Self::RepeatOpened,
            _ => return None,
        };
        Some(status)
    }

    /// Raw status code
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Error raised for a failed camera library call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// Unexpected internal error
    #[error("unexpected error: {0}")]
    Unexpected(String),
    /// TL library not found
    #[error("TL library not found: {0}")]
    NotFoundTl(String),
    /// Device not found
    #[error("device not found: {0}")]
    NotFoundDevice(String),
    /// Device offline
    #[error("device offline: {0}")]
    OffLine(String),
    /// Invalid input parameter
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// Invalid handle
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
    /// Invalid call
    #[error("invalid call: {0}")]
    InvalidCall(String),
    /// Invalid access, also raised when the device is already open
    #[error("invalid access: {0}")]
    InvalidAccess(String),
    /// Buffer too small
    #[error("need more buffer: {0}")]
    NeedMoreBuffer(String),
    /// Feature id used with the wrong type
    #[error("feature type error: {0}")]
    FeatureType(String),
    /// Value out of range
    #[error("out of range: {0}")]
    OutOfRange(String),
    /// Library not initialized
    #[error("API not initialized: {0}")]
    NotInitApi(String),
    /// Timeout
    #[error("timeout: {0}")]
    Timeout(String),
    /// Any other non-success status
    #[error("camera status {code}: {message}")]
    Other {
        /// Raw status code
        code: i32,
        /// Library supplied message
        message: String,
    },
}

/// Translate a camera status into `Ok(())` or the matching [`CameraError`].
///
/// `message` is the text the library returned for its last error, usually
/// prefixed with the calling class and function.
pub fn check_status(code: i32, message: impl Into<String>) -> Result<(), CameraError> {
    let message = message.into();
    let Some(status) = GxStatus::from_code(code) else {
        return Err(CameraError::Other { code, message });
    };
    let err = match status {
        GxStatus::Success => return Ok(()),
        GxStatus::Error => CameraError::Unexpected(message),
        GxStatus::NotFoundTl => CameraError::NotFoundTl(message),
        GxStatus::NotFoundDevice => CameraError::NotFoundDevice(message),
        GxStatus::Offline => CameraError::OffLine(message),
        GxStatus::InvalidParameter => CameraError::InvalidParameter(message),
        GxStatus::InvalidHandle => CameraError::InvalidHandle(message),
        GxStatus::InvalidCall => CameraError::InvalidCall(message),
        GxStatus::InvalidAccess | GxStatus::RepeatOpened => CameraError::InvalidAccess(message),
        GxStatus::NeedMoreBuffer => CameraError::NeedMoreBuffer(message),
        GxStatus::ErrorType => CameraError::FeatureType(message),
        GxStatus::OutOfRange => CameraError::OutOfRange(message),
        GxStatus::NotInitApi => CameraError::NotInitApi(message),
        GxStatus::Timeout => CameraError::Timeout(message),
        GxStatus::NotImplemented => CameraError::Other { code, message },
    };
    Err(err)
}
