//! Storage and resume-data errors.

use thiserror::Error;

/// Errors surfaced by the storage adapter (spec §4.4: "disk_full,
/// permission, corrupt, abort").
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying filesystem is out of space
    #[error("disk full")]
    DiskFull,

    /// Filesystem denied the operation
    #[error("permission denied: {0}")]
    Permission(String),

    /// Data read back did not match what was expected
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// Operation was cancelled (spec §5 "operation_aborted")
    #[error("operation aborted")]
    Aborted,

    /// Generic I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resume-data decode/validate errors (spec §7).
#[derive(Debug, Error)]
pub enum ResumeError {
    /// The blob failed to parse as bencode, or required keys were missing
    #[error("fast resume parse error: {0}")]
    ParseError(String),

    /// `transfer-hash` in the blob does not match the transfer it was loaded for
    #[error("mismatching transfer hash")]
    MismatchingTransferHash,

    /// `transfer-hash` key absent
    #[error("missing transfer hash")]
    MissingTransferHash,
}

/// `known.met` collection errors (spec §6; `original_source/include/libed2k/file.hpp`).
#[derive(Debug, Error)]
pub enum KnownMetError {
    /// Header byte was neither `0x0E` nor `0x0F`
    #[error("known file invalid header: 0x{0:02X}")]
    InvalidHeader(u8),

    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A hash or tag entry was truncated
    #[error("truncated known.met record")]
    Truncated,
}
