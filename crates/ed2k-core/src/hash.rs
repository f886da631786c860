//! MD4 file/piece hashing (component C2).
//!
//! A file is divided into fixed-size pieces; each piece is hashed independently,
//! and the file hash is derived from the concatenation of piece hashes. See
//! spec §4.2 and the worked examples in §8.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use md4::{Digest, Md4};

use crate::error::HashError;

/// Size of a piece: the hash-verification granularity.
pub const PIECE_SIZE: u64 = 9_728_000;

/// Size of a block: the wire-request granularity (~180 KiB).
pub const BLOCK_SIZE: u64 = 180 * 1024;

/// Byte width of an MD4 hash.
pub const HASH_SIZE: usize = 16;

/// MD4 of the empty byte string, appended to a hash set when the file size
/// is an exact multiple of [`PIECE_SIZE`] (spec §4.2, §9(b)).
pub const TERMINAL_HASH: Hash = Hash([
    0x31, 0xD6, 0xCF, 0xE0, 0xD1, 0x6A, 0xE9, 0x31, 0xB7, 0x3C, 0x59, 0xD7, 0xE0, 0xC0, 0x89, 0xC0,
]);

/// A 128-bit content hash: a file hash, a piece hash, or a peer client identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; HASH_SIZE]);

impl Hash {
    /// MD4 of `data`.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Md4::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// MD4 over the concatenation of a sequence of hashes (used to derive a
    /// multi-piece file hash from its piece hash list).
    #[must_use]
    pub fn of_concatenated(hashes: &[Hash]) -> Self {
        let mut hasher = Md4::new();
        for h in hashes {
            hasher.update(h.0);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// The all-zero hash (used as a placeholder, never a valid content hash).
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; HASH_SIZE])
    }

    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let mut out = [0u8; HASH_SIZE];
        if bytes.len() != HASH_SIZE {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

/// Number of pieces a file of `file_size` is divided into, not counting a
/// possible terminal entry.
#[must_use]
pub fn piece_count(file_size: u64) -> u64 {
    if file_size == 0 {
        0
    } else {
        file_size.div_ceil(PIECE_SIZE)
    }
}

/// Byte range `[start, end)` covered by piece `index` of a file of `file_size`.
#[must_use]
pub fn piece_range(index: u64, file_size: u64) -> std::ops::Range<u64> {
    let start = index * PIECE_SIZE;
    let end = (start + PIECE_SIZE).min(file_size);
    start..end
}

/// An ordered sequence of per-piece hashes plus the derived file hash
/// (spec §3 "Hash set").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashSet {
    /// Per-piece MD4 hashes, including a trailing [`TERMINAL_HASH`] when the
    /// file size is an exact multiple of [`PIECE_SIZE`].
    pub pieces: Vec<Hash>,
    /// The file's content hash.
    pub file_hash: Hash,
}

impl HashSet {
    /// Build a hash set from already-computed real piece hashes (i.e. not
    /// including any terminal entry) and the file size they cover.
    ///
    /// Implements spec §4.2 and the canonical reading of Open Question (b):
    /// "exact multiple ⇒ append terminal".
    #[must_use]
    pub fn from_piece_hashes(mut pieces: Vec<Hash>, file_size: u64) -> Self {
        if file_size > 0 && file_size % PIECE_SIZE == 0 {
            pieces.push(TERMINAL_HASH);
        }
        let file_hash = if pieces.len() == 1 {
            pieces[0]
        } else {
            Hash::of_concatenated(&pieces)
        };
        Self { pieces, file_hash }
    }

    /// The number of real pieces (excludes a trailing terminal entry).
    #[must_use]
    pub fn real_piece_count(&self, file_size: u64) -> u64 {
        piece_count(file_size)
    }

    /// `true` when the last entry is the terminal hash.
    #[must_use]
    pub fn has_terminal(&self) -> bool {
        self.pieces.last() == Some(&TERMINAL_HASH)
    }
}

/// Hash a complete in-memory file and return its hash set.
///
/// Used by tests and by callers that already hold the file in memory; the
/// streaming hasher ([`StreamingHasher`]) is used by the worker for real files.
///
/// # Errors
/// Returns [`HashError::FilesizeIsZero`] for an empty input.
pub fn hash_bytes(data: &[u8]) -> Result<HashSet, HashError> {
    if data.is_empty() {
        return Err(HashError::FilesizeIsZero);
    }
    let file_size = data.len() as u64;
    let n = piece_count(file_size);
    let mut pieces = Vec::with_capacity(n as usize);
    for i in 0..n {
        let range = piece_range(i, file_size);
        pieces.push(Hash::of(&data[range.start as usize..range.end as usize]));
    }
    Ok(HashSet::from_piece_hashes(pieces, file_size))
}

/// Hashes a file piece-by-piece from any `Read`, without loading it whole
/// into memory. Intended to be driven by the hashing worker (see
/// [`crate::hash::worker`]), which calls [`Self::hash_next_piece`] repeatedly
/// and checks a cancellation flag between pieces.
pub struct StreamingHasher<R> {
    reader: R,
    file_size: u64,
    remaining: u64,
    pieces: Vec<Hash>,
}

impl<R: Read> StreamingHasher<R> {
    /// Create a hasher for a file of `file_size` bytes read from `reader`.
    ///
    /// # Errors
    /// Returns [`HashError::FilesizeIsZero`] for `file_size == 0`.
    pub fn new(reader: R, file_size: u64) -> Result<Self, HashError> {
        if file_size == 0 {
            return Err(HashError::FilesizeIsZero);
        }
        Ok(Self {
            reader,
            file_size,
            remaining: file_size,
            pieces: Vec::with_capacity(piece_count(file_size) as usize),
        })
    }

    /// `true` once every piece has been hashed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    /// Index of the piece that the next call to [`Self::hash_next_piece`] will produce.
    #[must_use]
    pub fn next_piece_index(&self) -> u64 {
        self.pieces.len() as u64
    }

    /// Read and hash the next piece. Returns `Ok(None)` once [`Self::is_done`].
    ///
    /// # Errors
    /// Returns [`HashError::Io`] on a read failure.
    pub fn hash_next_piece(&mut self) -> Result<Option<Hash>, HashError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let this_piece = self.remaining.min(PIECE_SIZE);
        let mut buf = vec![0u8; this_piece as usize];
        self.reader
            .read_exact(&mut buf)
            .map_err(|e| HashError::Io(e.to_string()))?;
        let hash = Hash::of(&buf);
        self.pieces.push(hash);
        self.remaining -= this_piece;
        Ok(Some(hash))
    }

    /// Consume the hasher, completing it into a [`HashSet`]. Panics if not
    /// [`Self::is_done`]; callers drive [`Self::hash_next_piece`] to completion first.
    #[must_use]
    pub fn finish(self) -> HashSet {
        assert!(self.is_done(), "finish() called before all pieces hashed");
        HashSet::from_piece_hashes(self.pieces, self.file_size)
    }
}

pub mod worker;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_file_one_piece_no_terminal() {
        let data = vec![b'X'; 100];
        let hs = hash_bytes(&data).unwrap();
        assert_eq!(hs.pieces.len(), 1);
        assert!(!hs.has_terminal());
        assert_eq!(hs.file_hash.to_string(), "1AA8AFE3018B38D9B4D880D0683CCEB5");
        assert_eq!(hs.pieces[0], hs.file_hash);
    }

    #[test]
    fn exact_piece_size_file_appends_terminal() {
        let data = vec![b'X'; PIECE_SIZE as usize];
        let hs = hash_bytes(&data).unwrap();
        assert_eq!(hs.pieces.len(), 2);
        assert!(hs.has_terminal());
        assert_eq!(hs.pieces[1], TERMINAL_HASH);
        assert_eq!(hs.file_hash.to_string(), "E76BADB8F958D7685B4549D874699EE9");
    }

    #[test]
    fn one_byte_short_of_piece_size_has_no_terminal() {
        let data = vec![b'X'; (PIECE_SIZE - 1) as usize];
        let hs = hash_bytes(&data).unwrap();
        assert_eq!(hs.pieces.len(), 1);
        assert!(!hs.has_terminal());
    }

    #[test]
    fn zero_length_file_rejected() {
        let err = hash_bytes(&[]).unwrap_err();
        assert!(matches!(err, HashError::FilesizeIsZero));
    }

    #[test]
    fn streaming_hasher_matches_in_memory() {
        let data = vec![b'Y'; (PIECE_SIZE as usize) + 1234];
        let expected = hash_bytes(&data).unwrap();

        let mut hasher = StreamingHasher::new(std::io::Cursor::new(&data), data.len() as u64).unwrap();
        while !hasher.is_done() {
            hasher.hash_next_piece().unwrap();
        }
        let actual = hasher.finish();
        assert_eq!(actual, expected);
    }

    #[test]
    fn hash_display_roundtrips_through_fromstr() {
        let h = Hash::of(b"hello world");
        let s = h.to_string();
        let parsed: Hash = s.parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[cfg(test)]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn piece_count_matches_manual_ceil_div(size in 1u64..(PIECE_SIZE * 4)) {
                let expected = (size + PIECE_SIZE - 1) / PIECE_SIZE;
                prop_assert_eq!(piece_count(size), expected);
            }

            #[test]
            fn hash_set_piece_count_tracks_file_size(n_pieces in 1usize..4, tail in 0u64..PIECE_SIZE) {
                let file_size = PIECE_SIZE * (n_pieces as u64 - 1) + tail.max(1);
                let data = vec![0xABu8; file_size as usize];
                let hs = hash_bytes(&data).unwrap();
                let real = hs.real_piece_count(file_size) as usize;
                prop_assert_eq!(hs.pieces.len(), real + usize::from(hs.has_terminal()));
            }
        }
    }
}
