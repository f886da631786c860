//! Transfer and piece-picker errors.

use thiserror::Error;

/// Errors surfaced by the piece picker and transfer state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Operation requires a picker but the transfer is a pure seed.
    #[error("transfer has no picker (seeding)")]
    NoPicker,

    /// Referenced a piece index beyond the hash set.
    #[error("piece index {0} out of range")]
    PieceOutOfRange(u64),

    /// Referenced a block index beyond the piece's block count.
    #[error("block index {block} out of range for piece {piece}")]
    BlockOutOfRange {
        /// Piece index.
        piece: u64,
        /// Offending block index.
        block: u32,
    },

    /// Resume data did not match the transfer it was loaded for, or was
    /// otherwise inconsistent (spec §4.6 "An inconsistent blob...is rejected").
    #[error("resume data rejected: {0}")]
    ResumeRejected(String),

    /// Requested state transition is not valid from the current state.
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// State the transfer was in.
        from: &'static str,
        /// State that was requested.
        to: &'static str,
    },
}

/// Result type for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;
