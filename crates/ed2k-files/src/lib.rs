//! # ed2k-files
//!
//! Local persistence for the ed2k client: the on-disk storage adapter,
//! bencoded resume data, and the `known.met` known-file list.
//!
//! - [`error`] — error types for each of the below
//! - [`storage`] — the [`storage::StorageAdapter`] trait and its
//!   plain-filesystem implementation, plus the bounded file handle pool
//! - [`resume`] — `.resume` bencoded transfer snapshots
//! - [`known_met`] — the `known.met` known-file list

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod known_met;
pub mod resume;
pub mod storage;

pub use error::{KnownMetError, ResumeError, StorageError};
pub use known_met::{KnownFileCollection, KnownFileEntry};
pub use resume::{ResumeData, UnfinishedPiece};
pub use storage::{FastResumeOutcome, FileHandlePool, FileStorage, PieceBitmap, StorageAdapter};
