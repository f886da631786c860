//! Peer connection errors.

use thiserror::Error;

/// Why a peer connection was torn down (spec §4.5 "Failure semantics").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// No activity within the connection's timeout window.
    TimedOut,
    /// A packet failed to decode.
    DecodePacketError,
    /// The requested file hash is unknown to the remote.
    FileUnknown,
    /// The owning transfer was paused.
    TransferPaused,
    /// Closed by explicit local request.
    Closed,
    /// A read or write failed.
    Io,
}

impl DisconnectReason {
    /// Outstanding blocks should be returned to the picker unless the
    /// disconnect was a deliberate local close that marked them
    /// `not_wanted` (spec §4.5).
    #[must_use]
    pub fn returns_blocks_to_picker(self) -> bool {
        !matches!(self, DisconnectReason::Closed)
    }
}

/// Errors surfaced while driving a peer connection.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Wire-level decode failure (spec §4.1 "frame/tag decode").
    #[error("decode error: {0}")]
    Decode(#[from] ed2k_core::error::Error),

    /// The connection was torn down.
    #[error("disconnected: {0:?}")]
    Disconnected(DisconnectReason),

    /// A method was called in a state that doesn't support it.
    #[error("invalid peer state for this operation: {0}")]
    InvalidState(&'static str),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for peer connection operations.
pub type Result<T> = std::result::Result<T, PeerError>;
