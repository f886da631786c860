//! # ed2k-core
//!
//! The wire codec and hash core of an eDonkey2000/eMule-compatible
//! peer-to-peer file-sharing client (components C1 and C2).
//!
//! This crate provides:
//! - **Packet framing**: `[protocol][length][opcode][body]`, including the
//!   zlib-`packed` variant transparently inflated on read.
//! - **Tag system**: the typed key-value pairs carried on hello, offer and
//!   search messages.
//! - **MD4 hash core**: per-piece and per-file hashing, including the
//!   cancellable hashing worker.
//! - **Opcode tables**: the fixed `(protocol, opcode)` pairs every message
//!   in §6 is dispatched on.
//!
//! ## Module Structure
//!
//! - [`frame`]: packet framing and (de)compression
//! - [`primitives`]: little-endian integer/string codec shared by frame and tag
//! - [`tag`]: the typed tag system and tag list
//! - [`opcode`]: wire opcode constants
//! - [`filetype`]: file-type classification and media tag names
//! - [`hash`]: MD4 piece/file hashing, hash sets, and the hashing worker
//! - [`error`]: error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod filetype;
pub mod frame;
pub mod hash;
pub mod opcode;
pub mod primitives;
pub mod tag;

pub use error::Error;
pub use filetype::FileType;
pub use frame::{Packet, Protocol};
pub use hash::{BLOCK_SIZE, Hash, HashSet, PIECE_SIZE, TERMINAL_HASH};
pub use tag::{Tag, TagList, TagName, TagValue};

/// Maximum packet body size accepted by default (spec §4.1 "length >
/// configured max"); overridable via the embedding binary's own settings
/// (e.g. `ed2k_cli::config::SessionSettings::max_packet_size`).
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 2 * 1024 * 1024;

/// Maximum number of contiguous byte ranges a single `request_parts`
/// message may carry (spec §4.5).
pub const MAX_REQUEST_RANGES: usize = 3;
