//! Client-to-client message bodies (spec §4.5).
//!
//! Grounded on `original_source/libed2k/include/libed2k/packet_struct.hpp`'s
//! `client_hello`, `client_hello_answer`, `client_file_status`,
//! `client_request_parts`, `client_sending_part`, `client_compressed_part`,
//! `client_start_upload`, `client_queue_ranking` and `client_accept_upload`.
//! The `_I64` 64-bit-offset variants mirror the same header's large-file
//! message set, selected via `PeerConnection::large_files_negotiated`.

use std::io;

use ed2k_core::hash::{Hash, HashSet};
use ed2k_core::opcode::{peer, peer_emule};
use ed2k_core::primitives::{Reader, Writer};
use ed2k_core::tag::TagList;

use crate::error::PeerError;

/// An `(ip, port)` pair as carried on the wire: `ip` is the raw 32-bit host
/// id/address and `port` the TCP listen port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkPoint {
    /// IPv4 address or client-id placeholder, little-endian on the wire.
    pub ip: u32,
    /// Listen port.
    pub port: u16,
}

impl NetworkPoint {
    fn write(&self, w: &mut Writer) {
        w.write_u32(self.ip);
        w.write_u16(self.port);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            ip: r.read_u32()?,
            port: r.read_u16()?,
        })
    }
}

fn truncated() -> PeerError {
    PeerError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated peer message"))
}

/// Handshake initiation (`HELLO`, spec §4.5 "Local initiator sends hello").
#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    /// Our client hash.
    pub client_hash: Hash,
    /// Our advertised listen endpoint.
    pub network_point: NetworkPoint,
    /// Capability/identity tags (name, version, udp port, ...).
    pub tags: TagList,
    /// The index server we're attached to, if any.
    pub server_point: NetworkPoint,
}

impl Hello {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::HELLO;

    /// Encode the message body (not including the frame header).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u8(ed2k_core::hash::HASH_SIZE as u8);
        w.write_hash(&self.client_hash);
        self.network_point.write(&mut w);
        self.tags.write(&mut w);
        self.server_point.write(&mut w);
        w.into_vec()
    }

    /// Decode from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation, [`PeerError::Decode`] on a
    /// malformed tag list.
    pub fn decode(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        let _hash_len = r.read_u8().ok_or_else(truncated)?;
        let client_hash = r.read_hash().ok_or_else(truncated)?;
        let network_point = NetworkPoint::read(&mut r).ok_or_else(truncated)?;
        let tags = TagList::read(&mut r).map_err(ed2k_core::error::Error::from)?;
        let server_point = NetworkPoint::read(&mut r).ok_or_else(truncated)?;
        Ok(Self {
            client_hash,
            network_point,
            tags,
            server_point,
        })
    }
}

/// Handshake reply (`HELLO_ANSWER`): the symmetric payload, without the
/// leading hash-length byte.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloAnswer {
    /// Responder's client hash.
    pub client_hash: Hash,
    /// Responder's advertised listen endpoint.
    pub network_point: NetworkPoint,
    /// Capability/identity tags.
    pub tags: TagList,
    /// The responder's index server.
    pub server_point: NetworkPoint,
}

impl HelloAnswer {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::HELLO_ANSWER;

    /// Encode the message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.client_hash);
        self.network_point.write(&mut w);
        self.tags.write(&mut w);
        self.server_point.write(&mut w);
        w.into_vec()
    }

    /// Decode from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation, [`PeerError::Decode`] on a
    /// malformed tag list.
    pub fn decode(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        let client_hash = r.read_hash().ok_or_else(truncated)?;
        let network_point = NetworkPoint::read(&mut r).ok_or_else(truncated)?;
        let tags = TagList::read(&mut r).map_err(ed2k_core::error::Error::from)?;
        let server_point = NetworkPoint::read(&mut r).ok_or_else(truncated)?;
        Ok(Self {
            client_hash,
            network_point,
            tags,
            server_point,
        })
    }
}

/// `file_request(hash)`: sent as [`peer::SET_REQ_FILE_ID`]. In the real
/// protocol this single message doubles as the spec's `file_request` and
/// `filestatus_request` — the responder's [`FileStatus`]/no-file reply
/// covers both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetReqFileId {
    /// The file hash this connection will operate on.
    pub hash: Hash,
}

impl SetReqFileId {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::SET_REQ_FILE_ID;

    /// Encode the message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        w.into_vec()
    }

    /// Decode from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        Ok(Self {
            hash: r.read_hash().ok_or_else(truncated)?,
        })
    }
}

/// `no_file(hash)`: the responder has no such file (`FILE_REQ_ANS_NO_FILE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoFile {
    /// Hash that was requested.
    pub hash: Hash,
}

impl NoFile {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::FILE_REQ_ANS_NO_FILE;

    /// Encode the message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        w.into_vec()
    }

    /// Decode from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        Ok(Self {
            hash: r.read_hash().ok_or_else(truncated)?,
        })
    }
}

/// `file_status(hash, bitfield)`: which pieces the remote has (`FILE_STATUS`).
/// An empty bitfield is treated by the caller as a full seed (spec §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// Hash the status applies to.
    pub hash: Hash,
    /// One bit per piece, bit `i` set means the remote has piece `i`.
    pub have: Vec<bool>,
}

impl FileStatus {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::FILE_STATUS;

    /// Encode the message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        w.write_u16(self.have.len() as u16);
        for chunk in self.have.chunks(8) {
            let mut byte = 0u8;
            for (i, &bit) in chunk.iter().enumerate() {
                if bit {
                    byte |= 1 << i;
                }
            }
            w.write_u8(byte);
        }
        w.into_vec()
    }

    /// Decode from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        let hash = r.read_hash().ok_or_else(truncated)?;
        let bits = r.read_u16().ok_or_else(truncated)?;
        let mut have = Vec::with_capacity(bits as usize);
        if bits > 0 {
            let byte_len = (bits as usize).div_ceil(8);
            let bytes = r.read_bytes(byte_len).ok_or_else(truncated)?;
            for i in 0..bits as usize {
                have.push(bytes[i / 8] & (1 << (i % 8)) != 0);
            }
        }
        Ok(Self { hash, have })
    }

    /// `true` when the remote reported no bitfield at all (full seed, per
    /// spec §4.5 "if the remote replies with an empty/absent bitfield it is
    /// treated as full seed").
    #[must_use]
    pub fn is_full_seed(&self) -> bool {
        self.have.is_empty()
    }
}

/// Up to [`ed2k_core::MAX_REQUEST_RANGES`] contiguous byte ranges requested
/// in one message (`REQUEST_PARTS`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParts {
    /// File hash this request is for.
    pub hash: Hash,
    /// 1..=3 `(begin, end)` ranges; unused slots are `(0, 0)` on the wire.
    pub ranges: Vec<(u64, u64)>,
}

impl RequestParts {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::REQUEST_PARTS;

    /// Encode the message body using 32-bit offsets.
    ///
    /// # Panics
    /// Panics if more than [`ed2k_core::MAX_REQUEST_RANGES`] ranges are given.
    #[must_use]
    pub fn encode_32(&self) -> Vec<u8> {
        assert!(self.ranges.len() <= ed2k_core::MAX_REQUEST_RANGES);
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        let mut begins = [0u64; 3];
        let mut ends = [0u64; 3];
        for (i, (b, e)) in self.ranges.iter().enumerate() {
            begins[i] = *b;
            ends[i] = *e;
        }
        for b in begins {
            w.write_u32(b as u32);
        }
        for e in ends {
            w.write_u32(e as u32);
        }
        w.into_vec()
    }

    /// Decode 32-bit-offset ranges from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode_32(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        let hash = r.read_hash().ok_or_else(truncated)?;
        let mut begins = [0u64; 3];
        let mut ends = [0u64; 3];
        for b in &mut begins {
            *b = u64::from(r.read_u32().ok_or_else(truncated)?);
        }
        for e in &mut ends {
            *e = u64::from(r.read_u32().ok_or_else(truncated)?);
        }
        let ranges = begins
            .into_iter()
            .zip(ends)
            .filter(|(b, e)| e > b)
            .collect();
        Ok(Self { hash, ranges })
    }

    /// Encode using 64-bit offsets (`REQUEST_PARTS_I64`), for peers that
    /// negotiated large-file support.
    ///
    /// # Panics
    /// Panics if more than [`ed2k_core::MAX_REQUEST_RANGES`] ranges are given.
    #[must_use]
    pub fn encode_64(&self) -> Vec<u8> {
        assert!(self.ranges.len() <= ed2k_core::MAX_REQUEST_RANGES);
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        let mut begins = [0u64; 3];
        let mut ends = [0u64; 3];
        for (i, (b, e)) in self.ranges.iter().enumerate() {
            begins[i] = *b;
            ends[i] = *e;
        }
        for b in begins {
            w.write_u64(b);
        }
        for e in ends {
            w.write_u64(e);
        }
        w.into_vec()
    }

    /// Decode 64-bit-offset ranges from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode_64(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        let hash = r.read_hash().ok_or_else(truncated)?;
        let mut begins = [0u64; 3];
        let mut ends = [0u64; 3];
        for b in &mut begins {
            *b = r.read_u64().ok_or_else(truncated)?;
        }
        for e in &mut ends {
            *e = r.read_u64().ok_or_else(truncated)?;
        }
        let ranges = begins
            .into_iter()
            .zip(ends)
            .filter(|(b, e)| e > b)
            .collect();
        Ok(Self { hash, ranges })
    }

    /// Encode using whichever wire width `large_files` selects (spec §4.5
    /// "for a remote without large-file support, offsets > 2^32 must never
    /// be requested").
    #[must_use]
    pub fn encode(&self, large_files: bool) -> Vec<u8> {
        if large_files {
            self.encode_64()
        } else {
            self.encode_32()
        }
    }

    /// Decode using whichever wire width `large_files` selects.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode(body: &[u8], large_files: bool) -> crate::error::Result<Self> {
        if large_files {
            Self::decode_64(body)
        } else {
            Self::decode_32(body)
        }
    }
}

/// Opcode used for a [`RequestParts`] sent with 64-bit offsets.
pub const REQUEST_PARTS_I64_OPCODE: u8 = peer_emule::REQUEST_PARTS_I64;

/// `sending_part`: block bytes delivered in the clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendingPart<'a> {
    /// File hash.
    pub hash: Hash,
    /// Start offset (inclusive).
    pub begin: u64,
    /// End offset (exclusive).
    pub end: u64,
    /// `end - begin` bytes of file data.
    pub data: &'a [u8],
}

impl<'a> SendingPart<'a> {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::SENDING_PART;

    /// Encode the message body using 32-bit offsets.
    #[must_use]
    pub fn encode_32(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        w.write_u32(self.begin as u32);
        w.write_u32(self.end as u32);
        w.write_bytes(self.data);
        w.into_vec()
    }

    /// Decode 32-bit-offset sending_part from a packet body, borrowing the
    /// data payload from `body`.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode_32(body: &'a [u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        let hash = r.read_hash().ok_or_else(truncated)?;
        let begin = u64::from(r.read_u32().ok_or_else(truncated)?);
        let end = u64::from(r.read_u32().ok_or_else(truncated)?);
        let len = end.checked_sub(begin).ok_or_else(truncated)? as usize;
        let data = r.read_bytes(len).ok_or_else(truncated)?;
        Ok(Self { hash, begin, end, data })
    }

    /// Encode using 64-bit offsets (`SENDING_PART_I64`).
    #[must_use]
    pub fn encode_64(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        w.write_u64(self.begin);
        w.write_u64(self.end);
        w.write_bytes(self.data);
        w.into_vec()
    }

    /// Decode 64-bit-offset sending_part from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode_64(body: &'a [u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        let hash = r.read_hash().ok_or_else(truncated)?;
        let begin = r.read_u64().ok_or_else(truncated)?;
        let end = r.read_u64().ok_or_else(truncated)?;
        let len = end.checked_sub(begin).ok_or_else(truncated)? as usize;
        let data = r.read_bytes(len).ok_or_else(truncated)?;
        Ok(Self { hash, begin, end, data })
    }

    /// Encode using whichever wire width `large_files` selects.
    #[must_use]
    pub fn encode(&self, large_files: bool) -> Vec<u8> {
        if large_files {
            self.encode_64()
        } else {
            self.encode_32()
        }
    }

    /// Decode using whichever wire width `large_files` selects.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode(body: &'a [u8], large_files: bool) -> crate::error::Result<Self> {
        if large_files {
            Self::decode_64(body)
        } else {
            Self::decode_32(body)
        }
    }
}

/// Opcode used for a [`SendingPart`] sent with 64-bit offsets.
pub const SENDING_PART_I64_OPCODE: u8 = peer_emule::SENDING_PART_I64;

/// `hash_set_request(hash)`: ask for the per-piece MD4 hash list
/// (`HASH_SET_REQUEST`). Only meaningful for multi-piece files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashSetRequest {
    /// File hash to fetch piece hashes for.
    pub hash: Hash,
}

impl HashSetRequest {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::HASH_SET_REQUEST;

    /// Encode the message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        w.into_vec()
    }

    /// Decode from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        Ok(Self {
            hash: r.read_hash().ok_or_else(truncated)?,
        })
    }
}

/// `hash_set_answer(hash, piece_hashes)`: the reply to [`HashSetRequest`]
/// (`HASH_SET_ANSWER`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashSetAnswer {
    /// File hash the piece hashes belong to.
    pub hash: Hash,
    /// Per-piece MD4 hashes, in order.
    pub piece_hashes: Vec<Hash>,
}

impl HashSetAnswer {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::HASH_SET_ANSWER;

    /// Encode the message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        w.write_u16(self.piece_hashes.len() as u16);
        for h in &self.piece_hashes {
            w.write_hash(h);
        }
        w.into_vec()
    }

    /// Decode from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        let hash = r.read_hash().ok_or_else(truncated)?;
        let count = r.read_u16().ok_or_else(truncated)?;
        let mut piece_hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            piece_hashes.push(r.read_hash().ok_or_else(truncated)?);
        }
        Ok(Self { hash, piece_hashes })
    }

    /// Build from an already-assembled [`HashSet`], dropping any trailing
    /// terminal entry (the wire form only ever carries real piece hashes).
    #[must_use]
    pub fn from_hash_set(hash: Hash, hash_set: &HashSet) -> Self {
        let mut piece_hashes = hash_set.pieces.clone();
        if hash_set.has_terminal() {
            piece_hashes.pop();
        }
        Self { hash, piece_hashes }
    }
}

/// `request_filename(hash)`: ask the remote for its name of this file
/// (`REQUEST_FILENAME`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFilename {
    /// File hash to ask about.
    pub hash: Hash,
}

impl RequestFilename {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::REQUEST_FILENAME;

    /// Encode the message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        w.into_vec()
    }

    /// Decode from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        Ok(Self {
            hash: r.read_hash().ok_or_else(truncated)?,
        })
    }
}

/// `file_answer(hash, filename)`: the reply to [`RequestFilename`]
/// (`REQ_FILENAME_ANSWER`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameAnswer {
    /// File hash the name belongs to.
    pub hash: Hash,
    /// The remote's name for this file.
    pub filename: String,
}

impl FilenameAnswer {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::REQ_FILENAME_ANSWER;

    /// Encode the message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        w.write_string16(&self.filename);
        w.into_vec()
    }

    /// Decode from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        let hash = r.read_hash().ok_or_else(truncated)?;
        let filename = r.read_string16().ok_or_else(truncated)?;
        Ok(Self { hash, filename })
    }
}

/// `compressed_part`: a block delivered as a zlib stream (`COMPRESSED_PART`).
/// Decompression is left to the connection layer; this type only carries the
/// compressed bytes across the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedPart<'a> {
    /// File hash.
    pub hash: Hash,
    /// Start offset of the decompressed range (inclusive).
    pub begin: u64,
    /// Size of the decompressed range in bytes.
    pub decompressed_size: u64,
    /// Raw zlib-compressed bytes.
    pub compressed_data: &'a [u8],
}

impl<'a> CompressedPart<'a> {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer_emule::COMPRESSED_PART;

    /// Encode the message body using 32-bit offsets.
    #[must_use]
    pub fn encode_32(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        w.write_u32(self.begin as u32);
        w.write_u32(self.decompressed_size as u32);
        w.write_bytes(self.compressed_data);
        w.into_vec()
    }

    /// Decode 32-bit-offset compressed_part from a packet body, borrowing
    /// the compressed payload from `body`.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode_32(body: &'a [u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        let hash = r.read_hash().ok_or_else(truncated)?;
        let begin = u64::from(r.read_u32().ok_or_else(truncated)?);
        let decompressed_size = u64::from(r.read_u32().ok_or_else(truncated)?);
        let compressed_data = r.read_bytes(r.remaining()).ok_or_else(truncated)?;
        Ok(Self {
            hash,
            begin,
            decompressed_size,
            compressed_data,
        })
    }

    /// Encode using 64-bit offsets (`COMPRESSED_PART_I64`).
    #[must_use]
    pub fn encode_64(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        w.write_u64(self.begin);
        w.write_u64(self.decompressed_size);
        w.write_bytes(self.compressed_data);
        w.into_vec()
    }

    /// Decode 64-bit-offset compressed_part from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode_64(body: &'a [u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        let hash = r.read_hash().ok_or_else(truncated)?;
        let begin = r.read_u64().ok_or_else(truncated)?;
        let decompressed_size = r.read_u64().ok_or_else(truncated)?;
        let compressed_data = r.read_bytes(r.remaining()).ok_or_else(truncated)?;
        Ok(Self {
            hash,
            begin,
            decompressed_size,
            compressed_data,
        })
    }

    /// Encode using whichever wire width `large_files` selects.
    #[must_use]
    pub fn encode(&self, large_files: bool) -> Vec<u8> {
        if large_files {
            self.encode_64()
        } else {
            self.encode_32()
        }
    }

    /// Decode using whichever wire width `large_files` selects.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode(body: &'a [u8], large_files: bool) -> crate::error::Result<Self> {
        if large_files {
            Self::decode_64(body)
        } else {
            Self::decode_32(body)
        }
    }
}

/// Opcode used for a [`CompressedPart`] sent with 64-bit offsets.
pub const COMPRESSED_PART_I64_OPCODE: u8 = peer_emule::COMPRESSED_PART_I64;

/// `start_upload(hash)`: sent to a newly-contacted peer to begin queuing
/// for an upload slot (`START_UPLOAD_REQ`, spec §4.5 "Upload side...
/// newly-contacted peers are queued").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartUploadRequest {
    /// File hash the request is for.
    pub hash: Hash,
}

impl StartUploadRequest {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::START_UPLOAD_REQ;

    /// Encode the message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_hash(&self.hash);
        w.into_vec()
    }

    /// Decode from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        Ok(Self {
            hash: r.read_hash().ok_or_else(truncated)?,
        })
    }
}

/// `accept_upload`: an upload slot just opened for this peer
/// (`ACCEPT_UPLOAD_REQ`). Empty body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcceptUpload;

impl AcceptUpload {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::ACCEPT_UPLOAD_REQ;

    /// Encode the (empty) message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Decode from a packet body (accepted regardless of contents).
    #[must_use]
    pub fn decode(_body: &[u8]) -> Self {
        Self
    }
}

/// `queue_ranking(rank)`: periodic advertisement of a queued peer's
/// position (`QUEUE_RANK`; eMule clients also accept the wider
/// [`peer_emule::QUEUE_RANKING`] opcode for the same payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRanking {
    /// 1-based position in the upload queue.
    pub rank: u16,
}

impl QueueRanking {
    /// Opcode this message is sent under.
    pub const OPCODE: u8 = peer::QUEUE_RANK;

    /// Encode the message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(self.rank);
        w.into_vec()
    }

    /// Decode from a packet body.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode(body: &[u8]) -> crate::error::Result<Self> {
        let mut r = Reader::new(body);
        Ok(Self {
            rank: r.read_u16().ok_or_else(truncated)?,
        })
    }
}
