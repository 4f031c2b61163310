//! Error types of the frame transport engine.
//!
//! Errors are classified along the lines of how the engine reacts to them (see [ErrorClass]):
//!
//! * **Transient**: retried silently, normally not surfaced at all (e.g. a socket timeout)
//! * **Recoverable with loss**: a single fragment or frame is dropped, processing continues
//! * **Connection level**: the control channel goes through reconnection
//! * **Protocol fatal**: a single exchange or frame fails, the error is surfaced to the caller
//! * **Resource exhaustion**: degrades to backpressure
//!
//! Internal helpers use `anyhow` and are mapped to [TransportError] where they cross a module
//!  boundary that is visible to the application.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for frame transport operations.
pub type Result<T, E = TransportError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorClass {
    Transient,
    RecoverableWithLoss,
    ConnectionLevel,
    ProtocolFatal,
    ResourceExhaustion,
    Configuration,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("{channel} is not connected")]
    NotConnected { channel: &'static str },

    #[error("I/O error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CRC mismatch in control message: {details}")]
    ControlCrc { details: String },

    #[error("response does not echo the request's {field}: expected {expected:#x}, found {actual:#x}")]
    EchoMismatch { field: &'static str, expected: u32, actual: u32 },

    #[error("device rejected command {command:#04x} with status {status}")]
    DeviceStatus { command: u8, status: u8 },

    #[error("malformed control message: {details}")]
    MalformedControlMessage { details: String },

    #[error("unsupported frame format version {version}")]
    UnsupportedFrameFormat { version: u16 },

    #[error("frame #{frame_counter}: header region at byte {offset} was never received")]
    IncompleteFrameHeader { frame_counter: u16, offset: usize },

    #[error("malformed frame #{frame_counter}: {details}")]
    MalformedFrame { frame_counter: u16, details: String },

    #[error("packet buffer pool exhausted ({ceiling} buffers in use)")]
    PoolExhausted { ceiling: usize },

    #[error("delivery queue is full")]
    QueueFull,

    #[error("data channel delivers frames through a callback, polling is not available")]
    CallbackMode,

    #[error("data channel is closed")]
    Closed,

    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::Timeout { .. } => ErrorClass::Transient,
            TransportError::NotConnected { .. } => ErrorClass::ConnectionLevel,
            TransportError::Io { .. } => ErrorClass::ConnectionLevel,
            TransportError::Closed => ErrorClass::ConnectionLevel,
            TransportError::ControlCrc { .. } => ErrorClass::ProtocolFatal,
            TransportError::EchoMismatch { .. } => ErrorClass::ProtocolFatal,
            TransportError::DeviceStatus { .. } => ErrorClass::ProtocolFatal,
            TransportError::MalformedControlMessage { .. } => ErrorClass::ProtocolFatal,
            TransportError::UnsupportedFrameFormat { .. } => ErrorClass::ProtocolFatal,
            TransportError::IncompleteFrameHeader { .. } => ErrorClass::RecoverableWithLoss,
            TransportError::MalformedFrame { .. } => ErrorClass::RecoverableWithLoss,
            TransportError::PoolExhausted { .. } => ErrorClass::ResourceExhaustion,
            TransportError::QueueFull => ErrorClass::ResourceExhaustion,
            TransportError::CallbackMode => ErrorClass::Configuration,
            TransportError::Config { .. } => ErrorClass::Configuration,
        }
    }

    /// Returns whether repeating the failed operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient | ErrorClass::ConnectionLevel | ErrorClass::ResourceExhaustion)
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TransportError::Io { context: context.into(), source }
    }

    pub fn malformed_control(details: impl Into<String>) -> Self {
        TransportError::MalformedControlMessage { details: details.into() }
    }

    pub fn malformed_frame(frame_counter: u16, details: impl Into<String>) -> Self {
        TransportError::MalformedFrame { frame_counter, details: details.into() }
    }
}

impl From<anyhow::Error> for TransportError {
    fn from(err: anyhow::Error) -> Self {
        TransportError::Config { reason: format!("{:#}", err) }
    }
}
