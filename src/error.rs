use thiserror::Error;

/// Errors arising from wire structural decode/encode — a malformed packet,
/// a descriptor that doesn't hold its own invariants, a truncated buffer.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("packet too short ({len} bytes, minimum 8)")]
    PacketTooShort { len: usize },

    #[error("StartData packet shorter than 20 bytes (got {len})")]
    StartDataTooShort { len: usize },

    #[error("payload too short for {what}: need {need} bytes, got {got}")]
    PayloadTooShort {
        what: &'static str,
        need: usize,
        got: usize,
    },

    #[error("unknown packet type 0x{0:04X}")]
    UnknownPacketType(u16),

    #[error("unknown property descriptor form_flag 0x{0:02X}")]
    UnknownFormFlag(u8),
}

impl CodecError {
    pub(crate) fn payload_too_short(what: &'static str, need: usize, got: usize) -> Self {
        Self::PayloadTooShort { what, need, got }
    }
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Errors surfaced by the session/device layers — the taxonomy from §7 of
/// the protocol design (NotConnected, ConnectFailed, HandshakeFailed, ...).
#[derive(Debug, Error)]
pub enum PtpError {
    #[error("operation attempted before session is ready")]
    NotConnected,

    #[error("failed to connect: {0}")]
    ConnectFailed(#[source] std::io::Error),

    #[error("handshake failed at stage {stage}: {reason}")]
    HandshakeFailed { stage: &'static str, reason: String },

    #[error("connection lost")]
    ConnectionLost,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("operation failed with response code 0x{code:04X}")]
    OperationFailed { code: u16 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl PtpError {
    /// Translate a raw I/O error into the taxonomy's coarser buckets.
    pub(crate) fn from_io(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                PtpError::Timeout(crate::transport::READ_TIMEOUT)
            }
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => PtpError::ConnectionLost,
            _ => PtpError::ConnectFailed(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, PtpError>;
