//! Resume data: a bencoded snapshot of a transfer's progress (spec §4.6,
//! §6 "Resume data format").
//!
//! Grounded on `original_source/include/libed2k/file.hpp`'s
//! `transfer_resume_data` for the field set, with the wire keys taken
//! verbatim from spec §6.

use serde::{Deserialize, Serialize};

use ed2k_core::hash::Hash;

use crate::error::ResumeError;

/// One entry of the `unfinished` list: a piece with some but not all of its
/// blocks written, plus a bitmask of which blocks are finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnfinishedPiece {
    /// Piece index.
    pub piece: u64,
    /// Bit `i` set means block `i` of this piece is finished.
    pub block_bitmask: u64,
}

/// The constant `file-format` tag value (spec §6).
pub const FILE_FORMAT: &str = "libed2k resume file";
/// The constant `file-version` value (spec §6).
pub const FILE_VERSION: i64 = 1;

/// A transfer's resumable state: hash set, piece/verification bitmap,
/// unfinished pieces, limits and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeData {
    /// Content hash of the transfer this blob belongs to.
    pub transfer_hash: Hash,
    /// One byte per piece: bit 0 = have, bit 1 = verified-in-seed-mode.
    pub pieces: Vec<u8>,
    /// Pieces with some blocks finished but not yet hash-verified.
    pub unfinished: Vec<UnfinishedPiece>,
    /// The transfer's full hash set (one entry per piece, including a
    /// possible terminal entry).
    pub hashset_values: Vec<Hash>,
    /// Total bytes uploaded over this transfer's lifetime.
    pub total_uploaded: u64,
    /// Total bytes downloaded over this transfer's lifetime.
    pub total_downloaded: u64,
    /// Known seed count at save time.
    pub num_seeds: i64,
    /// Known partial-source count at save time.
    pub num_downloaders: i64,
    /// Sequential (in-order) download mode.
    pub sequential_download: bool,
    /// Transfer is a verified-complete seed.
    pub seed_mode: bool,
    /// Upload rate limit in bytes/sec, 0 = unlimited.
    pub upload_rate_limit: i64,
    /// Download rate limit in bytes/sec, 0 = unlimited.
    pub download_rate_limit: i64,
    /// Max simultaneous peer connections, 0 = unlimited.
    pub max_connections: i64,
    /// Max simultaneous upload slots, 0 = unlimited.
    pub max_uploads: i64,
    /// Transfer was paused when this blob was saved.
    pub paused: bool,
    /// Transfer was auto-managed by the session's queueing logic.
    pub auto_managed: bool,
    /// Per-piece priority (spec §4.3 "priority per piece ∈ {0..7}").
    pub piece_priority: Vec<u8>,
}

impl ResumeData {
    /// Defaults for a brand-new transfer of the given content hash: no
    /// pieces verified, no unfinished blocks, unlimited rates.
    #[must_use]
    pub fn default_for(transfer_hash: Hash) -> Self {
        Self {
            transfer_hash,
            pieces: Vec::new(),
            unfinished: Vec::new(),
            hashset_values: Vec::new(),
            total_uploaded: 0,
            total_downloaded: 0,
            num_seeds: 0,
            num_downloaders: 0,
            sequential_download: false,
            seed_mode: false,
            upload_rate_limit: 0,
            download_rate_limit: 0,
            max_connections: 0,
            max_uploads: 0,
            paused: false,
            auto_managed: true,
            piece_priority: Vec::new(),
        }
    }

    /// Encode to the bencoded wire format.
    ///
    /// # Errors
    /// Returns [`ResumeError::ParseError`] if bencode serialization fails
    /// (only possible for malformed map keys, which this type cannot produce).
    pub fn encode(&self) -> Result<Vec<u8>, ResumeError> {
        let wire = WireResumeData::from(self);
        serde_bencode::to_bytes(&wire).map_err(|e| ResumeError::ParseError(e.to_string()))
    }

    /// Decode from the bencoded wire format.
    ///
    /// # Errors
    /// Returns [`ResumeError::ParseError`] on malformed bencode or a missing
    /// required key, and [`ResumeError::MissingTransferHash`] if
    /// `transfer-hash` is absent.
    pub fn decode(blob: &[u8]) -> Result<Self, ResumeError> {
        let wire: WireResumeData =
            serde_bencode::from_bytes(blob).map_err(|e| ResumeError::ParseError(e.to_string()))?;
        wire.try_into()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireResumeData {
    #[serde(rename = "file-format")]
    file_format: String,
    #[serde(rename = "file-version")]
    file_version: i64,
    #[serde(rename = "libed2k-version")]
    libed2k_version: i64,
    total_uploaded: i64,
    total_downloaded: i64,
    num_seeds: i64,
    num_downloaders: i64,
    sequential_download: i64,
    seed_mode: i64,
    #[serde(rename = "transfer-hash")]
    transfer_hash: String,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
    unfinished: Vec<WireUnfinished>,
    #[serde(rename = "hashset-values")]
    hashset_values: Vec<String>,
    upload_rate_limit: i64,
    download_rate_limit: i64,
    max_connections: i64,
    max_uploads: i64,
    paused: i64,
    auto_managed: i64,
    #[serde(with = "serde_bytes")]
    piece_priority: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireUnfinished {
    piece: i64,
    block_bitmask: i64,
}

impl From<&ResumeData> for WireResumeData {
    fn from(r: &ResumeData) -> Self {
        Self {
            file_format: FILE_FORMAT.to_string(),
            file_version: FILE_VERSION,
            libed2k_version: 0,
            total_uploaded: r.total_uploaded as i64,
            total_downloaded: r.total_downloaded as i64,
            num_seeds: r.num_seeds,
            num_downloaders: r.num_downloaders,
            sequential_download: i64::from(r.sequential_download),
            seed_mode: i64::from(r.seed_mode),
            transfer_hash: r.transfer_hash.to_string(),
            pieces: r.pieces.clone(),
            unfinished: r
                .unfinished
                .iter()
                .map(|u| WireUnfinished {
                    piece: u.piece as i64,
                    block_bitmask: u.block_bitmask as i64,
                })
                .collect(),
            hashset_values: r.hashset_values.iter().map(ToString::to_string).collect(),
            upload_rate_limit: r.upload_rate_limit,
            download_rate_limit: r.download_rate_limit,
            max_connections: r.max_connections,
            max_uploads: r.max_uploads,
            paused: i64::from(r.paused),
            auto_managed: i64::from(r.auto_managed),
            piece_priority: r.piece_priority.clone(),
        }
    }
}

impl TryFrom<WireResumeData> for ResumeData {
    type Error = ResumeError;

    fn try_from(w: WireResumeData) -> Result<Self, Self::Error> {
        if w.transfer_hash.is_empty() {
            return Err(ResumeError::MissingTransferHash);
        }
        let transfer_hash = w
            .transfer_hash
            .parse()
            .map_err(|_| ResumeError::ParseError("bad transfer-hash hex".into()))?;
        let hashset_values = w
            .hashset_values
            .iter()
            .map(|s| s.parse::<Hash>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ResumeError::ParseError("bad hashset-values hex".into()))?;
        Ok(Self {
            transfer_hash,
            pieces: w.pieces,
            unfinished: w
                .unfinished
                .into_iter()
                .map(|u| UnfinishedPiece {
                    piece: u.piece as u64,
                    block_bitmask: u.block_bitmask as u64,
                })
                .collect(),
            hashset_values,
            total_uploaded: w.total_uploaded as u64,
            total_downloaded: w.total_downloaded as u64,
            num_seeds: w.num_seeds,
            num_downloaders: w.num_downloaders,
            sequential_download: w.sequential_download != 0,
            seed_mode: w.seed_mode != 0,
            upload_rate_limit: w.upload_rate_limit,
            download_rate_limit: w.download_rate_limit,
            max_connections: w.max_connections,
            max_uploads: w.max_uploads,
            paused: w.paused != 0,
            auto_managed: w.auto_managed != 0,
            piece_priority: w.piece_priority,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_bencode() {
        let mut r = ResumeData::default_for(Hash::of(b"some file"));
        r.pieces = vec![0b01, 0b01, 0b00];
        r.hashset_values = vec![Hash::of(b"p0"), Hash::of(b"p1"), Hash::of(b"p2")];
        r.unfinished.push(UnfinishedPiece {
            piece: 2,
            block_bitmask: 0b011,
        });
        r.paused = true;

        let blob = r.encode().unwrap();
        let decoded = ResumeData::decode(&blob).unwrap();
        assert_eq!(decoded, r);
    }

    #[test]
    fn missing_transfer_hash_rejected() {
        let wire = WireResumeData {
            file_format: FILE_FORMAT.into(),
            file_version: FILE_VERSION,
            libed2k_version: 0,
            total_uploaded: 0,
            total_downloaded: 0,
            num_seeds: 0,
            num_downloaders: 0,
            sequential_download: 0,
            seed_mode: 0,
            transfer_hash: String::new(),
            pieces: Vec::new(),
            unfinished: Vec::new(),
            hashset_values: Vec::new(),
            upload_rate_limit: 0,
            download_rate_limit: 0,
            max_connections: 0,
            max_uploads: 0,
            paused: 0,
            auto_managed: 0,
            piece_priority: Vec::new(),
        };
        let blob = serde_bencode::to_bytes(&wire).unwrap();
        let err = ResumeData::decode(&blob).unwrap_err();
        assert!(matches!(err, ResumeError::MissingTransferHash));
    }

    #[test]
    fn garbage_blob_is_parse_error() {
        let err = ResumeData::decode(b"not bencode at all {{{").unwrap_err();
        assert!(matches!(err, ResumeError::ParseError(_)));
    }
}
