//! GCS error taxonomy and the GCS error table
//!
//! Every failure of the message layer is a [`GcsError`]. Errors carry the
//! numeric GCS code they correspond to, so a code read back via `ERR?` and an
//! error detected locally (timeout, malformed reply, ...) look the same to the
//! caller.

use super::transport::TransportError;
use thiserror::Error;

/// Numeric GCS error codes used by the message layer itself.
///
/// Negative codes are raised on the PC side, positive codes are reported by
/// the controller through `ERR?`.
pub mod codes {
    /// No error
    pub const NO_ERROR: i32 = 0;
    /// Unspecified communication error
    pub const COM_ERROR: i32 = -1;
    /// Error while sending data
    pub const SEND_ERROR: i32 = -2;
    /// Error while receiving data
    pub const REC_ERROR: i32 = -3;
    /// Port is not open
    pub const NOT_CONNECTED_ERROR: i32 = -4;
    /// Error while opening port
    pub const CONNECTION_FAILED: i32 = -6;
    /// Timeout error
    pub const COM_TIMEOUT: i32 = -7;
    /// Unexpected answer from the controller
    pub const PI_UNEXPECTED_RESPONSE: i32 = -1004;
    /// Invalid argument passed to a function
    pub const PI_INVALID_ARGUMENT: i32 = -1015;
    /// Fewer bulk rows than announced
    pub const PI_TOO_FEW_GCS_DATA: i32 = -1088;
    /// More bulk rows than announced
    pub const PI_TOO_MANY_GCS_DATA: i32 = -1089;
    /// Communication error while reading bulk rows
    pub const PI_GCS_DATA_READ_ERROR: i32 = -1090;
}

/// Error raised by the GCS message layer or the command façade.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GcsError {
    /// The device could not be reached
    #[error("Error while opening port ({}){}", codes::CONNECTION_FAILED, suffix(.0))]
    ConnectionFailed(String),

    /// Fewer bytes were accepted than requested, or the gateway refused the write
    #[error("Error while sending data ({}){}", codes::SEND_ERROR, suffix(.0))]
    SendError(String),

    /// No reply within the timeout, or bulk data stopped arriving
    #[error("Timeout error ({}){}", codes::COM_TIMEOUT, suffix(.0))]
    Timeout(String),

    /// The gateway is not connected
    #[error("Not connected ({}){}", codes::NOT_CONNECTED_ERROR, suffix(.0))]
    NotConnected(String),

    /// Malformed reply, non-numeric bulk column or missing header terminator
    #[error("Controller sent unexpected response ({}){}", codes::PI_UNEXPECTED_RESPONSE, suffix(.0))]
    UnexpectedResponse(String),

    /// The bulk transfer ended before the announced number of rows
    #[error("Controller sent fewer GCS data than expected ({}){}", codes::PI_TOO_FEW_GCS_DATA, suffix(.0))]
    TooFewData(String),

    /// The bulk transfer carried more rows than announced
    #[error("Controller sent more GCS data than expected ({}){}", codes::PI_TOO_MANY_GCS_DATA, suffix(.0))]
    TooManyData(String),

    /// Reading the bulk rows failed in the background reader
    #[error("Communication error while reading GCS data ({}){}", codes::PI_GCS_DATA_READ_ERROR, suffix(.0))]
    GcsDataRead(String),

    /// Non-zero code reported by the controller (or a PC-side code without a dedicated kind)
    #[error("{message} ({code}){}", suffix(.context))]
    Device {
        /// GCS error code
        code: i32,
        /// Text from the GCS error table
        message: String,
        /// Where the error was raised and what the device sent
        context: String,
    },

    /// Caller passed wrong-shaped arguments to a command method
    #[error("parameter type mismatch: {0}")]
    ParameterType(String),

    /// A reply token could not be converted to the requested type
    #[error("conversion failed: {0}")]
    Conversion(String),
}

fn suffix(context: &str) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(": {context}")
    }
}

impl GcsError {
    /// Build the error for `code`, using the dedicated kind for codes the
    /// message layer raises itself and the error table for everything else.
    pub fn from_code(code: i32, context: impl Into<String>) -> Self {
        let context = context.into();
        match code {
            codes::CONNECTION_FAILED => Self::ConnectionFailed(context),
            codes::SEND_ERROR => Self::SendError(context),
            codes::COM_TIMEOUT => Self::Timeout(context),
            codes::NOT_CONNECTED_ERROR => Self::NotConnected(context),
            codes::PI_UNEXPECTED_RESPONSE => Self::UnexpectedResponse(context),
            codes::PI_TOO_FEW_GCS_DATA => Self::TooFewData(context),
            codes::PI_TOO_MANY_GCS_DATA => Self::TooManyData(context),
            codes::PI_GCS_DATA_READ_ERROR => Self::GcsDataRead(context),
            _ => Self::Device {
                code,
                message: translate_error(code).to_string(),
                context,
            },
        }
    }

    /// Numeric GCS code of this error, `None` for caller-side argument and
    /// conversion problems which have no protocol equivalent.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::ConnectionFailed(_) => Some(codes::CONNECTION_FAILED),
            Self::SendError(_) => Some(codes::SEND_ERROR),
            Self::Timeout(_) => Some(codes::COM_TIMEOUT),
            Self::NotConnected(_) => Some(codes::NOT_CONNECTED_ERROR),
            Self::UnexpectedResponse(_) => Some(codes::PI_UNEXPECTED_RESPONSE),
            Self::TooFewData(_) => Some(codes::PI_TOO_FEW_GCS_DATA),
            Self::TooManyData(_) => Some(codes::PI_TOO_MANY_GCS_DATA),
            Self::GcsDataRead(_) => Some(codes::PI_GCS_DATA_READ_ERROR),
            Self::Device { code, .. } => Some(*code),
            Self::ParameterType(_) | Self::Conversion(_) => None,
        }
    }

    /// True if this is a timeout (reply timeout or bulk stall)
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<TransportError> for GcsError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::ConnectionFailed(msg) | TransportError::PortNotFound(msg) => {
                Self::ConnectionFailed(msg)
            }
            TransportError::PermissionDenied(msg) => {
                Self::ConnectionFailed(format!("permission denied: {msg}"))
            }
            TransportError::Timeout(ms) => Self::Timeout(format!("after {ms} ms")),
            TransportError::NotConnected | TransportError::Disconnected => {
                Self::NotConnected(e.to_string())
            }
            TransportError::SendError(msg) => Self::SendError(msg),
            TransportError::ReceiveError(msg) => Self::Device {
                code: codes::REC_ERROR,
                message: translate_error(codes::REC_ERROR).to_string(),
                context: msg,
            },
            TransportError::Native { code, context } => Self::from_code(code, context),
            TransportError::InvalidConfiguration(msg) => {
                Self::Device {
                    code: codes::PI_INVALID_ARGUMENT,
                    message: translate_error(codes::PI_INVALID_ARGUMENT).to_string(),
                    context: msg,
                }
            }
            TransportError::IoError(io) => Self::Device {
                code: codes::COM_ERROR,
                message: translate_error(codes::COM_ERROR).to_string(),
                context: io.to_string(),
            },
        }
    }
}

/// Translate a GCS error code into its readable message.
pub fn translate_error(code: i32) -> &'static str {
    match code {
        0 => "No error",
        1 => "Parameter syntax error",
        2 => "Unknown command",
        3 => "Command length out of limits or command buffer overrun",
        4 => "Error while scanning",
        5 => "Unallowable move attempted on unreferenced axis, or move attempted with servo off",
        6 => "Parameter for SGA not valid",
        7 => "Position out of limits",
        8 => "Velocity out of limits",
        9 => "Attempt to set pivot point while U,V and W not all 0",
        10 => "Controller was stopped by command",
        11 => "Parameter for SST or for one of the embedded scan algorithms out of range",
        12 => "Invalid axis combination for fast scan",
        13 => "Parameter for NAV out of range",
        14 => "Invalid analog channel",
        15 => "Invalid axis identifier",
        16 => "Unknown stage name",
        17 => "Parameter out of range",
        18 => "Invalid macro name",
        19 => "Error while recording macro",
        20 => "Macro not found",
        21 => "Axis has no brake",
        22 => "Axis identifier specified more than once",
        23 => "Illegal axis",
        24 => "Incorrect number of parameters",
        25 => "Invalid floating point number",
        26 => "Parameter missing",
        27 => "Soft limit out of range",
        28 => "No manual pad found",
        29 => "No more step-response values",
        30 => "No step-response values recorded",
        31 => "Axis has no reference sensor",
        32 => "Axis has no limit switch",
        33 => "No relay card installed",
        34 => "Command not allowed for selected stage(s)",
        35 => "No digital input installed",
        36 => "No digital output configured",
        37 => "No more MCM responses",
        38 => "No MCM values recorded",
        39 => "Controller number invalid",
        40 => "No joystick configured",
        41 => "Invalid axis for electronic gearing, axis can not be slave",
        42 => "Position of slave axis is out of range",
        43 => "Slave axis cannot be commanded directly when electronic gearing is enabled",
        44 => "Calibration of joystick failed",
        45 => "Referencing failed",
        46 => "OPM (Optical Power Meter) missing",
        47 => "OPM (Optical Power Meter) not initialized or cannot be initialized",
        48 => "OPM (Optical Power Meter) communication error",
        49 => "Move to limit switch failed",
        50 => "Attempt to reference axis with referencing disabled",
        51 => "Selected axis is controlled by joystick",
        52 => "Controller detected communication error",
        53 => "MOV! motion still in progress",
        54 => "Unknown parameter",
        55 => "No commands were recorded with REP",
        56 => "Password invalid",
        57 => "Data record table does not exist",
        58 => "Source does not exist; number too low or too high",
        59 => "Source record table number too low or too high",
        60 => "Protected param: current command level (CCL) too low",
        61 => "Command execution not possible while autozero is running",
        62 => "Autozero requires at least one linear axis",
        63 => "Initialization still in progress",
        64 => "Parameter is read-only",
        65 => "Parameter not found in non-volatile memory",
        66 => "Voltage out of limits",
        67 => "Not enough memory available for requested wave curve",
        68 => "Not enough memory available for DDL table; DDL can not be started",
        69 => "Time delay larger than DDL table; DDL can not be started",
        70 => "The requested arrays have different lengths; query them separately",
        71 => "Attempt to restart the generator while it is running in single step mode",
        72 => "Motion commands and wave generator activation are not allowed when analog target is active",
        73 => "Motion commands are not allowed when wave generator is active",
        200 => "No stage connected to axis",
        201 => "File with axis parameters not found",
        202 => "Invalid axis parameter file",
        203 => "Backup file with axis parameters not found",
        205 => "SMO with servo on",
        301 => "Send buffer overflow",
        302 => "Voltage out of limits",
        303 => "Open-loop motion attempted when servo ON",
        304 => "Received command is too long",
        305 => "Error while reading/writing EEPROM",
        306 => "Error on I2C bus",
        307 => "Timeout while receiving command",
        308 => "A lengthy operation has not finished in the expected time",
        309 => "Insufficient space to store macro",
        310 => "Configuration data has old version number",
        311 => "Invalid configuration data",
        333 => "Internal hardware error",
        555 => "BasMac: unknown controller error",
        601 => "Not enough memory",
        602 => "Hardware voltage error",
        603 => "Hardware temperature out of range",
        -1 => "Error during com operation (could not be specified)",
        -2 => "Error while sending data",
        -3 => "Error while receiving data",
        -4 => "Not connected (no port with given ID open)",
        -5 => "Buffer overflow",
        -6 => "Error while opening port",
        -7 => "Timeout error",
        -8 => "There are more lines waiting in buffer",
        -9 => "There is no interface or DLL handle with the given ID",
        -10 => "Event/message for notification could not be opened",
        -11 => "Function not supported by this interface type",
        -12 => "Error while sending \"echoed\" data",
        -1001 => "Unknown axis identifier",
        -1002 => "Number for NAV out of range--must be in [1,10000]",
        -1003 => "Invalid value for SGA--must be one of 1, 10, 100, 1000",
        -1004 => "Controller sent unexpected response",
        -1005 => "No manual control pad installed, calls to SMA and related commands are not allowed",
        -1006 => "Invalid number for manual control pad knob",
        -1007 => "Axis not currently controlled by a manual control pad",
        -1008 => "Controller is busy with some lengthy operation (e.g. reference move, fast scan algorithm)",
        -1009 => "Internal error--could not start thread",
        -1010 => "Controller is (already) in macro mode--command not valid in macro mode",
        -1011 => "Controller not in macro mode--command not valid unless macro mode active",
        -1012 => "Could not open file to write or read macro",
        -1013 => "No macro with given name on controller, or macro is empty",
        -1014 => "Internal error in macro editor",
        -1015 => "Invalid argument passed to function",
        -1016 => "Axis identifier is already in use by a connected stage",
        -1017 => "Invalid axis identifier",
        -1024 => "Motion error: position error too large, servo is switched off automatically",
        -1088 => "Controller sent fewer GCS data than expected",
        -1089 => "Controller sent more GCS data than expected",
        -1090 => "Communication error while reading GCS data",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_code_uses_table() {
        let err = GcsError::from_code(10, "MOV 1 2.0");
        assert_eq!(err.code(), Some(10));
        assert_eq!(
            err.to_string(),
            "Controller was stopped by command (10): MOV 1 2.0"
        );
    }

    #[test]
    fn test_pc_side_codes_map_to_kinds() {
        assert!(GcsError::from_code(codes::COM_TIMEOUT, "").is_timeout());
        assert!(matches!(
            GcsError::from_code(codes::PI_TOO_FEW_GCS_DATA, "3 expected, 2 received"),
            GcsError::TooFewData(_)
        ));
        assert!(matches!(
            GcsError::from_code(codes::PI_UNEXPECTED_RESPONSE, ""),
            GcsError::UnexpectedResponse(_)
        ));
    }

    #[test]
    fn test_unknown_code() {
        let err = GcsError::from_code(4711, "");
        assert_eq!(err.to_string(), "Unknown error (4711)");
    }

    #[test]
    fn test_local_errors_carry_codes() {
        assert_eq!(GcsError::TooManyData(String::new()).code(), Some(-1089));
        assert_eq!(GcsError::ParameterType(String::new()).code(), None);
    }
}
