//! Error types for the ED2K wire codec and hash core.

use thiserror::Error;

/// Top-level error for `ed2k-core` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Packet framing error
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Tag decode/encode error
    #[error("tag error: {0}")]
    Tag(#[from] TagError),

    /// Hashing error
    #[error("hash error: {0}")]
    Hash(#[from] HashError),
}

/// Packet-framing level errors (wire-layer subset of the spec's finite error-kind set).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Unknown protocol byte (not ED2K/eMule/packed)
    #[error("invalid protocol type: 0x{0:02X}")]
    InvalidProtocolType(u8),

    /// Declared packet length exceeds the configured maximum
    #[error("invalid packet size: {size} exceeds max {max}")]
    InvalidPacketSize {
        /// Declared size
        size: u32,
        /// Configured maximum
        max: u32,
    },

    /// Packet too short to contain a header
    #[error("packet too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Body shorter than its declared length
    #[error("payload length exceeds available bytes")]
    PayloadOverflow,

    /// zlib inflate of a `packed` body failed
    #[error("inflate error: {0}")]
    Inflate(String),

    /// Opcode not recognized for the active protocol/direction
    #[error("decode packet error: unknown opcode 0x{0:02X}")]
    DecodePacketError(u8),
}

/// Tag list / tag value errors.
#[derive(Debug, Error)]
pub enum TagError {
    /// Tag list truncated mid-entry
    #[error("truncated tag list")]
    Truncated,

    /// Unknown tag value type byte
    #[error("invalid file tag: unknown type 0x{0:02X}")]
    InvalidFileTag(u8),

    /// A blob/string tag declared a length exceeding the configured maximum
    #[error("blob tag too long: {0} bytes")]
    BlobTagTooLong(usize),

    /// Caller asked for a tag's value as a type it does not hold
    #[error("incompatible tag getter: expected {expected}, found {found}")]
    IncompatibleTagGetter {
        /// Type the caller requested
        expected: &'static str,
        /// Type actually stored
        found: &'static str,
    },
}

/// MD4 hashing errors.
#[derive(Debug, Error)]
pub enum HashError {
    /// Attempted to hash a zero-length file
    #[error("filesize is zero")]
    FilesizeIsZero,

    /// Underlying read failed while streaming a piece
    #[error("io error while hashing: {0}")]
    Io(String),

    /// Hashing job was cancelled via the worker's FIFO
    #[error("operation aborted")]
    OperationAborted,
}
