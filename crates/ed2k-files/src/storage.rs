//! Storage adapter (component C4, spec §4.4).
//!
//! Exposes the async operations a transfer drives against one file on disk.
//! The adapter owns the file handle, tracks which pieces are verified
//! (the "have" bitmap) and which blocks of the in-progress piece are
//! written, and builds/parses the resume blob for this file.
//!
//! Grounded on the chunked-read/pre-allocate/out-of-order-write idiom of
//! `examples/shranto27-WRAITH-Protocol/crates/wraith-files/src/chunker.rs`'s
//! `FileReassembler`, generalized from flat chunks to the piece/block
//! hierarchy and from BLAKE3 to MD4.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::{debug, warn};

use ed2k_core::hash::{Hash, HashSet, piece_count, piece_range};

use crate::error::StorageError;
use crate::resume::ResumeData;

/// Outcome of [`FileStorage::check_fastresume`] (spec §4.4 table:
/// `check_fastresume(resume_blob) → {full_check_needed, fatal_error,
/// piece_index_of_verified}`).
#[derive(Debug, Clone, Default)]
pub struct FastResumeOutcome {
    /// `true` if the resume blob was rejected or absent and a full
    /// [`FileStorage::check_files`] pass is required.
    pub full_check_needed: bool,
    /// Piece indices the blob marked as verified ("have").
    pub verified_pieces: Vec<u64>,
    /// Set when the resume attempt failed for a reason beyond "stale
    /// data, just recheck" — e.g. the piece bitmap's length doesn't match
    /// this file's geometry, or the backing file handle is gone. A stale
    /// or hash-mismatched blob is not fatal; this field stays `None` for
    /// those and the caller just falls through to a full check.
    pub fatal_error: Option<String>,
}

/// The async job surface a [`crate::Transfer`][transfer] drives (spec §4.4 table).
///
/// [transfer]: https://docs.rs/ed2k-transfer
#[async_trait::async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Load and validate a resume blob, returning which pieces it already
    /// verifies without a rehash.
    async fn check_fastresume(&mut self, resume_blob: &[u8]) -> Result<FastResumeOutcome, StorageError>;

    /// Stream-verify every piece against the hash set. Returns the indices
    /// of pieces that hashed correctly, in ascending order.
    async fn check_files(&mut self) -> Result<Vec<u64>, StorageError>;

    /// Read `length` bytes at `offset` within `piece`.
    async fn read(&self, piece: u64, offset: u64, length: u64) -> Result<Vec<u8>, StorageError>;

    /// Write `buffer` at `offset` within `piece`.
    async fn write(&mut self, piece: u64, offset: u64, buffer: &[u8]) -> Result<(), StorageError>;

    /// Close the underlying file handle.
    async fn release_files(&mut self) -> Result<(), StorageError>;

    /// Delete the file from disk.
    async fn delete_files(&mut self) -> Result<(), StorageError>;

    /// Rename the file in place.
    async fn rename(&mut self, new_name: &str) -> Result<(), StorageError>;

    /// Move the file to a new directory.
    async fn move_storage(&mut self, new_path: &Path) -> Result<(), StorageError>;

    /// Serialize the current piece/block state as an opaque resume blob.
    async fn save_resume_data(&self) -> Result<Vec<u8>, StorageError>;
}

/// One-byte-per-piece have/verified bitmap (spec §4.6 "Resume data":
/// "bit 0 = have, bit 1 = verified-in-seed-mode").
#[derive(Debug, Clone, Default)]
pub struct PieceBitmap(pub Vec<u8>);

impl PieceBitmap {
    /// A bitmap of `n` pieces, all unset.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self(vec![0u8; n])
    }

    /// Mark piece `i` as having its bytes on disk.
    pub fn set_have(&mut self, i: usize) {
        self.0[i] |= 0b01;
    }

    /// Mark piece `i` as verified while already complete (seed mode).
    pub fn set_verified(&mut self, i: usize) {
        self.0[i] |= 0b10;
    }

    /// `true` if piece `i` is marked "have".
    #[must_use]
    pub fn has(&self, i: usize) -> bool {
        self.0.get(i).is_some_and(|b| b & 0b01 != 0)
    }
}

/// A `StorageAdapter` backed by a single regular file on disk.
pub struct FileStorage {
    path: PathBuf,
    file_size: u64,
    hash_set: HashSet,
    handle: Option<File>,
    have: PieceBitmap,
    /// Bytes written into the currently-in-progress piece, not yet hash-verified.
    partial_writes: std::collections::HashMap<u64, Vec<(u64, Vec<u8>)>>,
}

impl FileStorage {
    /// Open (creating if absent) the backing file for `path`, sized for
    /// `hash_set`'s file.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] if the file cannot be opened or sized.
    pub async fn open(path: impl Into<PathBuf>, file_size: u64, hash_set: HashSet) -> Result<Self, StorageError> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        file.set_len(file_size).await?;
        let n = piece_count(file_size) as usize;
        Ok(Self {
            path,
            file_size,
            hash_set,
            handle: Some(file),
            have: PieceBitmap::new(n),
            partial_writes: std::collections::HashMap::new(),
        })
    }

    fn handle(&self) -> Result<&File, StorageError> {
        self.handle.as_ref().ok_or(StorageError::Aborted)
    }

    async fn read_piece_bytes(&self, piece: u64) -> Result<Vec<u8>, StorageError> {
        let range = piece_range(piece, self.file_size);
        let len = (range.end - range.start) as usize;
        let mut buf = vec![0u8; len];
        let mut handle = self.handle()?.try_clone().await?;
        handle.seek(SeekFrom::Start(range.start)).await?;
        handle.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

#[async_trait::async_trait]
impl StorageAdapter for FileStorage {
    async fn check_fastresume(&mut self, resume_blob: &[u8]) -> Result<FastResumeOutcome, StorageError> {
        if let Err(e) = self.handle() {
            warn!(error = %e, "fast resume attempted without an open file handle");
            return Ok(FastResumeOutcome {
                full_check_needed: true,
                verified_pieces: Vec::new(),
                fatal_error: Some(e.to_string()),
            });
        }
        let parsed = match ResumeData::decode(resume_blob) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "fast resume parse error, falling back to full check");
                return Ok(FastResumeOutcome {
                    full_check_needed: true,
                    verified_pieces: Vec::new(),
                    fatal_error: None,
                });
            }
        };
        if parsed.transfer_hash != self.hash_set.file_hash {
            warn!("fast resume hash mismatch, falling back to full check");
            return Ok(FastResumeOutcome {
                full_check_needed: true,
                verified_pieces: Vec::new(),
                fatal_error: None,
            });
        }
        let expected_pieces = piece_count(self.file_size) as usize;
        if parsed.pieces.len() != expected_pieces {
            warn!(
                got = parsed.pieces.len(),
                expected = expected_pieces,
                "fast resume piece bitmap does not match file geometry"
            );
            return Ok(FastResumeOutcome {
                full_check_needed: true,
                verified_pieces: Vec::new(),
                fatal_error: Some(format!(
                    "resume piece bitmap has {} entries, expected {expected_pieces}",
                    parsed.pieces.len()
                )),
            });
        }
        let mut verified = Vec::new();
        for (i, byte) in parsed.pieces.iter().enumerate() {
            if byte & 0b01 != 0 {
                self.have.set_have(i);
                verified.push(i as u64);
            }
        }
        Ok(FastResumeOutcome {
            full_check_needed: false,
            verified_pieces: verified,
            fatal_error: None,
        })
    }

    async fn check_files(&mut self) -> Result<Vec<u64>, StorageError> {
        let n = piece_count(self.file_size);
        let mut verified = Vec::new();
        for i in 0..n {
            let bytes = self.read_piece_bytes(i).await?;
            let expected = self.hash_set.pieces.get(i as usize);
            if expected == Some(&Hash::of(&bytes)) {
                self.have.set_have(i as usize);
                verified.push(i);
            }
        }
        debug!(verified = verified.len(), total = n, "check_files complete");
        Ok(verified)
    }

    async fn read(&self, piece: u64, offset: u64, length: u64) -> Result<Vec<u8>, StorageError> {
        let base = piece * ed2k_core::hash::PIECE_SIZE + offset;
        let mut buf = vec![0u8; length as usize];
        let mut handle = self.handle()?.try_clone().await?;
        handle.seek(SeekFrom::Start(base)).await?;
        handle.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn write(&mut self, piece: u64, offset: u64, buffer: &[u8]) -> Result<(), StorageError> {
        let base = piece * ed2k_core::hash::PIECE_SIZE + offset;
        {
            let handle = self.handle.as_mut().ok_or(StorageError::Aborted)?;
            handle.seek(SeekFrom::Start(base)).await?;
            handle.write_all(buffer).await?;
            handle.flush().await?;
        }
        self.partial_writes
            .entry(piece)
            .or_default()
            .push((offset, buffer.to_vec()));
        Ok(())
    }

    async fn release_files(&mut self) -> Result<(), StorageError> {
        self.handle = None;
        Ok(())
    }

    async fn delete_files(&mut self) -> Result<(), StorageError> {
        self.handle = None;
        tokio::fs::remove_file(&self.path).await?;
        Ok(())
    }

    async fn rename(&mut self, new_name: &str) -> Result<(), StorageError> {
        let new_path = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from(new_name), |p| p.join(new_name));
        tokio::fs::rename(&self.path, &new_path).await?;
        self.path = new_path;
        Ok(())
    }

    async fn move_storage(&mut self, new_path: &Path) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(new_path).await?;
        let target = new_path.join(self.path.file_name().unwrap_or_default());
        tokio::fs::rename(&self.path, &target).await?;
        self.path = target;
        Ok(())
    }

    async fn save_resume_data(&self) -> Result<Vec<u8>, StorageError> {
        let resume = ResumeData {
            transfer_hash: self.hash_set.file_hash,
            pieces: self.have.0.clone(),
            unfinished: Vec::new(),
            hashset_values: self.hash_set.pieces.clone(),
            ..ResumeData::default_for(self.hash_set.file_hash)
        };
        resume
            .encode()
            .map_err(|e| StorageError::Corrupt(e.to_string()))
    }
}

/// A bounded, LRU-evicting pool of open file handles (spec §4.4 "The
/// adapter owns the file handle pool (capped, LRU-closed)" and §5 "File
/// handle pool: bounded; LRU eviction closes least-recently-used handles").
pub struct FileHandlePool {
    capacity: usize,
    order: std::collections::VecDeque<PathBuf>,
    handles: std::collections::HashMap<PathBuf, File>,
}

impl FileHandlePool {
    /// A pool capped at `capacity` simultaneously-open handles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: std::collections::VecDeque::new(),
            handles: std::collections::HashMap::new(),
        }
    }

    /// Number of currently-open handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// `true` if the pool currently holds no open handles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Fetch the handle for `path`, opening it (and evicting the
    /// least-recently-used handle if at capacity) if not already cached.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] if the file cannot be opened.
    pub async fn acquire(&mut self, path: &Path) -> Result<&File, StorageError> {
        if !self.handles.contains_key(path) {
            if self.handles.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.handles.remove(&oldest);
                }
            }
            let file = OpenOptions::new().read(true).write(true).open(path).await?;
            self.handles.insert(path.to_path_buf(), file);
        } else {
            self.order.retain(|p| p != path);
        }
        self.order.push_back(path.to_path_buf());
        Ok(self.handles.get(path).expect("just inserted"))
    }

    /// Evict and close a specific handle, if open.
    pub fn release(&mut self, path: &Path) {
        self.handles.remove(path);
        self.order.retain(|p| p != path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hash_set(file_size: u64) -> HashSet {
        let data = vec![b'Z'; file_size as usize];
        ed2k_core::hash::hash_bytes(&data).unwrap()
    }

    #[tokio::test]
    async fn write_then_check_files_verifies_piece() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part");
        let file_size = 1000;
        let hash_set = sample_hash_set(file_size);
        let data = vec![b'Z'; file_size as usize];

        let mut storage = FileStorage::open(&path, file_size, hash_set).await.unwrap();
        storage.write(0, 0, &data).await.unwrap();

        let verified = storage.check_files().await.unwrap();
        assert_eq!(verified, vec![0]);
    }

    #[tokio::test]
    async fn fastresume_roundtrip_matches_check_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part");
        let file_size = 1000;
        let hash_set = sample_hash_set(file_size);
        let data = vec![b'Z'; file_size as usize];

        let mut storage = FileStorage::open(&path, file_size, hash_set.clone()).await.unwrap();
        storage.write(0, 0, &data).await.unwrap();
        storage.check_files().await.unwrap();
        let blob = storage.save_resume_data().await.unwrap();
        drop(storage);

        let mut reopened = FileStorage::open(&path, file_size, hash_set).await.unwrap();
        let outcome = reopened.check_fastresume(&blob).await.unwrap();
        assert!(!outcome.full_check_needed);
        assert_eq!(outcome.verified_pieces, vec![0]);
        assert!(outcome.fatal_error.is_none());
    }

    #[tokio::test]
    async fn fastresume_with_wrong_piece_count_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part");
        let file_size = 1000;
        let hash_set = sample_hash_set(file_size);

        let mut storage = FileStorage::open(&path, file_size, hash_set.clone()).await.unwrap();
        let mut resume = ResumeData::default_for(hash_set.file_hash);
        resume.pieces = vec![1, 1, 1];
        let blob = resume.encode().unwrap();

        let outcome = storage.check_fastresume(&blob).await.unwrap();
        assert!(outcome.full_check_needed);
        assert!(outcome.fatal_error.is_some());
    }

    #[tokio::test]
    async fn fastresume_parse_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part");
        let file_size = 1000;
        let hash_set = sample_hash_set(file_size);

        let mut storage = FileStorage::open(&path, file_size, hash_set).await.unwrap();
        let outcome = storage.check_fastresume(b"not bencode").await.unwrap();
        assert!(outcome.full_check_needed);
        assert!(outcome.fatal_error.is_none());
    }

    #[tokio::test]
    async fn handle_pool_evicts_lru_beyond_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..3 {
            let p = dir.path().join(format!("f{i}"));
            tokio::fs::write(&p, b"x").await.unwrap();
            paths.push(p);
        }
        let mut pool = FileHandlePool::new(2);
        pool.acquire(&paths[0]).await.unwrap();
        pool.acquire(&paths[1]).await.unwrap();
        assert_eq!(pool.len(), 2);
        pool.acquire(&paths[2]).await.unwrap();
        assert_eq!(pool.len(), 2);
        assert!(!pool.handles.contains_key(&paths[0]));
    }
}
