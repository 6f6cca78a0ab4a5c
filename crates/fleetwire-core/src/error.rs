//! Shared error type across fleetwire crates.

use thiserror::Error;

/// Stable machine-readable error codes (public API).
///
/// Callers that forward failures across process boundaries should use these
/// codes instead of `Display` strings, which may change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Frame failed structural decoding.
    MalformedEnvelope,
    /// Frame carried a wire version newer than this node supports.
    UnsupportedVersion,
    /// Payload (de)serialization failed.
    PayloadCodec,
    /// Outbound payload exceeds the configured cap.
    PayloadTooLarge,
    /// Operation on a closed channel.
    ChannelClosed,
    /// Channel name is not routable or bound to another payload type.
    UnknownChannel,
    /// Adapter-reported send/connectivity failure.
    Transport,
    /// No reply within the request window.
    Timeout,
    /// Service shut down while the operation was outstanding.
    Disconnected,
    /// A subscription handler failed or panicked.
    Handler,
    /// Invalid configuration.
    Config,
}

impl ErrorCode {
    /// String representation used in logs and peer-visible error frames.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MalformedEnvelope => "MALFORMED_ENVELOPE",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::PayloadCodec => "PAYLOAD_CODEC",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::ChannelClosed => "CHANNEL_CLOSED",
            ErrorCode::UnknownChannel => "UNKNOWN_CHANNEL",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Disconnected => "DISCONNECTED",
            ErrorCode::Handler => "HANDLER",
            ErrorCode::Config => "CONFIG",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, FleetwireError>;

/// Unified error type used by core and fabric.
///
/// The taxonomy is the consumer contract: every future returned by the fabric
/// resolves with a typed value or exactly one of these kinds. The fabric never
/// retries on its own; retry policy belongs to the caller or the adapter.
#[derive(Debug, Error)]
pub enum FleetwireError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("unsupported wire version: {0}")]
    UnsupportedVersion(u8),
    #[error("payload codec: {0}")]
    PayloadCodec(String),
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("channel closed: {0}")]
    ChannelClosed(String),
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("service disconnected")]
    Disconnected,
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("config: {0}")]
    Config(String),
}

impl FleetwireError {
    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            FleetwireError::MalformedEnvelope(_) => ErrorCode::MalformedEnvelope,
            FleetwireError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            FleetwireError::PayloadCodec(_) => ErrorCode::PayloadCodec,
            FleetwireError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            FleetwireError::ChannelClosed(_) => ErrorCode::ChannelClosed,
            FleetwireError::UnknownChannel(_) => ErrorCode::UnknownChannel,
            FleetwireError::Transport(_) => ErrorCode::Transport,
            FleetwireError::Timeout => ErrorCode::Timeout,
            FleetwireError::Disconnected => ErrorCode::Disconnected,
            FleetwireError::Handler(_) => ErrorCode::Handler,
            FleetwireError::Config(_) => ErrorCode::Config,
        }
    }
}
