use thiserror::Error;

/// Kinds of malformed-frame conditions the wire layer can detect.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    #[error("unsupported WFTNP version")]
    UnsupportedVersion,
    #[error("malformed payload")]
    Malformed,
    #[error("UUID mismatch between request and response")]
    UuidMismatch,
    #[error("connection closed mid-frame")]
    ShortRead,
}

/// Known FTMS Control Point result codes (spec.md §4.D).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtmsResultCode {
    #[error("operation code not supported")]
    OpCodeNotSupported,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("operation failed")]
    OperationFailed,
    #[error("control not permitted")]
    ControlNotPermitted,
    #[error("unknown result code {0:#04x}")]
    Unknown(u8),
}

impl FtmsResultCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x02 => Self::OpCodeNotSupported,
            0x03 => Self::InvalidParameter,
            0x04 => Self::OperationFailed,
            0x05 => Self::ControlNotPermitted,
            other => Self::Unknown(other),
        }
    }
}

/// Errors from the WFTNP wire/transport layer.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(ProtocolErrorKind),
    #[error("request rejected: type={message_type} code={response_code}")]
    Rejected { message_type: u8, response_code: u8 },
    #[error("timed out waiting for {what}")]
    Timeout { what: &'static str },
}

/// Errors from the FTMS profile layer.
#[derive(Error, Debug)]
pub enum FtmsError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("FTMS service not present on device")]
    FtmsUnavailable,
    #[error("FTMS control point characteristic not found")]
    ControlPointMissing,
    #[error("control point rejected opcode {opcode:#04x}: {code}")]
    ResultError { opcode: u8, code: FtmsResultCode },
}

/// Top-level session/coordinator errors surfaced to the facade.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Ftms(#[from] FtmsError),
    #[error("trainer control unavailable: {0}")]
    ControlUnavailable(#[source] FtmsError),
    #[error("command attempted while manually disconnected")]
    ManuallyDisconnected,
    #[error("liveness probe and reconnect both failed: {0}")]
    UpdateFailed(String),
}

/// Crate-wide error type. Every public, fallible operation returns this.
#[derive(Error, Debug)]
pub enum WahooError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Ftms(#[from] FtmsError),
    #[error(transparent)]
    Session(#[from] SessionError),
}
