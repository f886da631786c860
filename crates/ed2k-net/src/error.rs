//! Errors for the server connection and session event loop.

use thiserror::Error;

/// Errors surfaced while driving the server connection (spec §4.7).
#[derive(Debug, Error)]
pub enum ServerError {
    /// Hostname resolution failed.
    #[error("failed to resolve server address: {0}")]
    Resolve(String),

    /// Wire-level decode failure.
    #[error("decode error: {0}")]
    Decode(#[from] ed2k_core::error::Error),

    /// The server rejected the login.
    #[error("server rejected login")]
    Rejected,

    /// A method was called before login completed, or after disconnect.
    #[error("invalid server connection state for this operation: {0}")]
    InvalidState(&'static str),

    /// The search expression failed to encode.
    #[error("search expression error: {0}")]
    Search(#[from] SearchError),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server connection operations.
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Errors surfaced while building or encoding a search expression
/// (spec §6 "Search expressions").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// An opening/closing bracket had no matching partner.
    #[error("unclosed brackets in search expression")]
    IncorrectBracketsCount,

    /// A bracket pair enclosed nothing.
    #[error("empty brackets in search expression")]
    EmptyBrackets,

    /// A quoted string term was never closed.
    #[error("unclosed quotation mark in search expression")]
    UnclosedQuotationMark,

    /// The expression exceeded the configured node budget.
    #[error("search expression too complex: {0} nodes exceeds limit")]
    TooComplex(usize),

    /// An operator appeared where an operand was expected or vice versa.
    #[error("operator in incorrect place in search expression")]
    OperatorIncorrectPlace,
}

/// Result type for search-expression operations.
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Session-level fatal errors (spec §7 "Session-fatal errors... abort the session").
#[derive(Debug, Error)]
pub enum SessionError {
    /// The listener could not bind its configured address.
    #[error("failed to bind listener: {0}")]
    BindFailed(std::io::Error),

    /// The alert queue's high-water mark was exceeded and the embedder
    /// never drained it.
    #[error("alert queue overflow")]
    AlertQueueOverflow,
}
