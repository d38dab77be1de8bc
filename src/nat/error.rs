use thiserror::Error;

#[derive(Debug, Error)]
pub enum StunError {
    #[error("no configured STUN server responded")]
    NoServerResponded,

    #[error("STUN response too short: {len} bytes")]
    ResponseTooShort { len: usize },

    #[error("STUN response has unexpected message type {0:#06x}")]
    UnexpectedMessageType(u16),

    #[error("STUN response magic cookie mismatch")]
    MagicCookieMismatch,

    #[error("STUN response transaction id mismatch")]
    TransactionIdMismatch,

    #[error("STUN response carried no (XOR-)MAPPED-ADDRESS attribute")]
    MissingMappedAddress,

    #[error("STUN response used an unsupported address family {0:#04x}")]
    UnsupportedAddressFamily(u8),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("STUN request timed out")]
    Timeout,
}
