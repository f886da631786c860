//! `known.met` persisted known-file list (spec §6 "Persisted state layout").
//!
//! Grounded on `original_source/include/libed2k/file.hpp`'s
//! `known_file_entry` and `known_file_collection`.

use std::path::Path;

use ed2k_core::hash::Hash;
use ed2k_core::primitives::{Reader, Writer};
use ed2k_core::tag::TagList;

use crate::error::KnownMetError;

/// Legacy header byte: 32-bit file sizes only.
pub const MET_HEADER: u8 = 0x0E;
/// Header byte for the large-files variant (64-bit file sizes representable
/// via tags).
pub const MET_HEADER_WITH_LARGEFILES: u8 = 0x0F;

/// One record: a previously-hashed file, its piece hash list, and any tags
/// (priority, last-seen, etc.) attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownFileEntry {
    /// Unix timestamp this file was last modified, as observed by the hasher.
    pub last_changed: u32,
    /// The file's content hash.
    pub file_hash: Hash,
    /// Per-piece hashes (the file's hash set, minus the derived file hash).
    pub hash_list: Vec<Hash>,
    /// Attached tags (filename, size, priority, ...).
    pub tag_list: TagList,
}

impl KnownFileEntry {
    fn write(&self, w: &mut Writer) {
        w.write_u32(self.last_changed);
        w.write_hash(&self.file_hash);
        w.write_u16(self.hash_list.len() as u16);
        for h in &self.hash_list {
            w.write_hash(h);
        }
        self.tag_list.write(w);
    }

    fn read(r: &mut Reader) -> Result<Self, KnownMetError> {
        let last_changed = r.read_u32().ok_or(KnownMetError::Truncated)?;
        let file_hash = r.read_hash().ok_or(KnownMetError::Truncated)?;
        let hash_count = r.read_u16().ok_or(KnownMetError::Truncated)?;
        let mut hash_list = Vec::with_capacity(hash_count as usize);
        for _ in 0..hash_count {
            hash_list.push(r.read_hash().ok_or(KnownMetError::Truncated)?);
        }
        let tag_list = TagList::read(r).map_err(|_| KnownMetError::Truncated)?;
        Ok(Self {
            last_changed,
            file_hash,
            hash_list,
            tag_list,
        })
    }
}

/// The complete `known.met` file: a header byte plus every known-file record.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownFileCollection {
    /// [`MET_HEADER`] or [`MET_HEADER_WITH_LARGEFILES`].
    pub header: u8,
    /// Every locally-hashed file the client remembers.
    pub entries: Vec<KnownFileEntry>,
}

impl KnownFileCollection {
    /// An empty collection with the large-files header.
    #[must_use]
    pub fn new() -> Self {
        Self {
            header: MET_HEADER_WITH_LARGEFILES,
            entries: Vec::new(),
        }
    }

    /// Encode to the `known.met` binary format.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(64 + self.entries.len() * 64);
        w.write_u8(self.header);
        w.write_u32(self.entries.len() as u32);
        for e in &self.entries {
            e.write(&mut w);
        }
        w.into_vec()
    }

    /// Decode from the `known.met` binary format.
    ///
    /// # Errors
    /// Returns [`KnownMetError::InvalidHeader`] if the header byte is
    /// neither [`MET_HEADER`] nor [`MET_HEADER_WITH_LARGEFILES`] (spec §9's
    /// canonical `known_file_invalid_header` rejection), or
    /// [`KnownMetError::Truncated`] on a short/corrupt record.
    pub fn decode(data: &[u8]) -> Result<Self, KnownMetError> {
        let mut r = Reader::new(data);
        let header = r.read_u8().ok_or(KnownMetError::Truncated)?;
        if header != MET_HEADER && header != MET_HEADER_WITH_LARGEFILES {
            return Err(KnownMetError::InvalidHeader(header));
        }
        let count = r.read_u32().ok_or(KnownMetError::Truncated)?;
        let mut entries = Vec::with_capacity(count.min(1 << 20) as usize);
        for _ in 0..count {
            entries.push(KnownFileEntry::read(&mut r)?);
        }
        Ok(Self { header, entries })
    }

    /// Load from `path`.
    ///
    /// # Errors
    /// Returns [`KnownMetError::Io`] on a read failure, or a decode error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, KnownMetError> {
        let data = tokio::fs::read(path).await?;
        Self::decode(&data)
    }

    /// Save to `path`.
    ///
    /// # Errors
    /// Returns [`KnownMetError::Io`] on a write failure.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), KnownMetError> {
        tokio::fs::write(path, self.encode()).await?;
        Ok(())
    }

    /// Insert or replace the entry for `file_hash`.
    pub fn upsert(&mut self, entry: KnownFileEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.file_hash == entry.file_hash) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }
}

impl Default for KnownFileCollection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed2k_core::tag::{Tag, TagValue, names};

    fn sample_entry() -> KnownFileEntry {
        KnownFileEntry {
            last_changed: 1_700_000_000,
            file_hash: Hash::of(b"file contents"),
            hash_list: vec![Hash::of(b"piece0"), Hash::of(b"piece1")],
            tag_list: TagList(vec![Tag::with_id(names::FT_FILENAME, TagValue::Str("movie.avi".into()))]),
        }
    }

    #[test]
    fn roundtrip_collection() {
        let mut coll = KnownFileCollection::new();
        coll.upsert(sample_entry());
        let bytes = coll.encode();
        let decoded = KnownFileCollection::decode(&bytes).unwrap();
        assert_eq!(decoded, coll);
    }

    #[test]
    fn invalid_header_rejected() {
        let mut bytes = KnownFileCollection::new().encode();
        bytes[0] = 0xAB;
        let err = KnownFileCollection::decode(&bytes).unwrap_err();
        assert!(matches!(err, KnownMetError::InvalidHeader(0xAB)));
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known.met");
        let mut coll = KnownFileCollection::new();
        coll.upsert(sample_entry());
        coll.save(&path).await.unwrap();
        let loaded = KnownFileCollection::load(&path).await.unwrap();
        assert_eq!(loaded, coll);
    }

    #[test]
    fn upsert_replaces_existing_entry() {
        let mut coll = KnownFileCollection::new();
        let mut entry = sample_entry();
        coll.upsert(entry.clone());
        entry.last_changed += 1;
        coll.upsert(entry.clone());
        assert_eq!(coll.entries.len(), 1);
        assert_eq!(coll.entries[0].last_changed, entry.last_changed);
    }
}
