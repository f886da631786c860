//! Typed tag system (spec §3 "Tag", §4.1 "Tag list").
//!
//! A tag is a typed key-value pair: the key is either a 1-byte numeric name
//! id ("new tag" form, high bit of the type byte set) or a length-prefixed
//! string name (legacy form). Values are drawn from a small closed set of
//! types; short strings (1..16 bytes) use a compact type encoding where the
//! length is folded into the type byte itself.
//!
//! Grounded on `original_source/libed2k/src/ctag.cpp` (`base_tag::save`,
//! `tagTypetoString`) for the wire layout and the finite type list.

use crate::error::TagError;
use crate::hash::Hash;
use crate::primitives::{Reader, Writer};

/// Tag value type byte, before the `STR1..STR16` compact-string range and
/// before the 0x80 "new tag" bit is folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TagTypeId {
    /// 16-byte hash value
    Hash16 = 0x01,
    /// Length-prefixed string
    String = 0x02,
    /// 32-bit unsigned integer
    Uint32 = 0x03,
    /// IEEE-754 single precision float
    Float32 = 0x04,
    /// Single byte, 0 or 1
    Bool = 0x05,
    /// Bit-packed boolean array
    BoolArray = 0x06,
    /// Length-prefixed opaque blob
    Blob = 0x07,
    /// 16-bit unsigned integer
    Uint16 = 0x08,
    /// 8-bit unsigned integer
    Uint8 = 0x09,
    /// Binary small object
    Bsob = 0x0A,
    /// 64-bit unsigned integer
    Uint64 = 0x0B,
}

impl TryFrom<u8> for TagTypeId {
    type Error = TagError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Hash16),
            0x02 => Ok(Self::String),
            0x03 => Ok(Self::Uint32),
            0x04 => Ok(Self::Float32),
            0x05 => Ok(Self::Bool),
            0x06 => Ok(Self::BoolArray),
            0x07 => Ok(Self::Blob),
            0x08 => Ok(Self::Uint16),
            0x09 => Ok(Self::Uint8),
            0x0A => Ok(Self::Bsob),
            0x0B => Ok(Self::Uint64),
            other => Err(TagError::InvalidFileTag(other)),
        }
    }
}

/// First compact-string type code; `STR1..STR16` cover lengths 1..=16 with
/// the length folded into the type byte (`STR_BASE + len - 1`).
const STR_BASE: u8 = 0x11;
const STR_MAX_LEN: u8 = 16;

/// "New tag" flag: when set on the type byte, the name is a single
/// numeric id byte rather than a length-prefixed string.
const NEW_TAG_FLAG: u8 = 0x80;

/// The decoded value of a tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// `TAGTYPE_HASH16`
    Hash(Hash),
    /// `TAGTYPE_STRING` or a compact `STR1..STR16`
    Str(String),
    /// `TAGTYPE_UINT32`
    U32(u32),
    /// `TAGTYPE_FLOAT32`
    F32(f32),
    /// `TAGTYPE_BOOL`
    Bool(bool),
    /// `TAGTYPE_BLOB`
    Blob(Vec<u8>),
    /// `TAGTYPE_UINT16`
    U16(u16),
    /// `TAGTYPE_UINT8`
    U8(u8),
    /// `TAGTYPE_UINT64`
    U64(u64),
}

impl TagValue {
    /// Name for error messages; also doubles as a cheap type discriminant.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Hash(_) => "hash",
            Self::Str(_) => "string",
            Self::U32(_) => "u32",
            Self::F32(_) => "f32",
            Self::Bool(_) => "bool",
            Self::Blob(_) => "blob",
            Self::U16(_) => "u16",
            Self::U8(_) => "u8",
            Self::U64(_) => "u64",
        }
    }

    /// View as `u64`, widening any integer type. Used by callers that accept
    /// either 32- or 64-bit file sizes depending on the "large files" misc-option.
    ///
    /// # Errors
    /// Returns [`TagError::IncompatibleTagGetter`] for non-integer values.
    pub fn as_u64(&self) -> Result<u64, TagError> {
        match *self {
            Self::U8(v) => Ok(u64::from(v)),
            Self::U16(v) => Ok(u64::from(v)),
            Self::U32(v) => Ok(u64::from(v)),
            Self::U64(v) => Ok(v),
            _ => Err(TagError::IncompatibleTagGetter {
                expected: "integer",
                found: self.type_name(),
            }),
        }
    }

    /// View as `&str`.
    ///
    /// # Errors
    /// Returns [`TagError::IncompatibleTagGetter`] if this is not a string tag.
    pub fn as_str(&self) -> Result<&str, TagError> {
        match self {
            Self::Str(s) => Ok(s),
            _ => Err(TagError::IncompatibleTagGetter {
                expected: "string",
                found: self.type_name(),
            }),
        }
    }
}

/// The name half of a tag: either a numeric id (`new tag` form) or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagName {
    /// A 1-byte numeric name id (e.g. `FT_FILENAME`).
    Id(u8),
    /// A legacy string name.
    Name(String),
}

/// A single typed key-value tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// The tag's key.
    pub name: TagName,
    /// The tag's typed value.
    pub value: TagValue,
}

impl Tag {
    /// Build a tag with a numeric name id.
    #[must_use]
    pub fn with_id(id: u8, value: TagValue) -> Self {
        Self {
            name: TagName::Id(id),
            value,
        }
    }

    /// Build a tag with a legacy string name.
    #[must_use]
    pub fn with_name(name: impl Into<String>, value: TagValue) -> Self {
        Self {
            name: TagName::Name(name.into()),
            value,
        }
    }

    fn write(&self, w: &mut Writer) {
        let (type_byte, is_new) = base_type_byte(&self.value, &self.name);
        match (&self.name, is_new) {
            (TagName::Id(id), true) => {
                w.write_u8(type_byte | NEW_TAG_FLAG);
                w.write_u8(*id);
            }
            (TagName::Id(id), false) => {
                // Legacy encoding for a numeric name: 1-byte "string" name of length 1.
                w.write_u8(type_byte);
                w.write_u16(1);
                w.write_u8(*id);
            }
            (TagName::Name(name), _) => {
                w.write_u8(type_byte);
                w.write_u16(name.len() as u16);
                w.write_bytes(name.as_bytes());
            }
        }
        write_value(w, &self.value);
    }

    fn read(r: &mut Reader) -> Result<Self, TagError> {
        let raw_type = r.read_u8().ok_or(TagError::Truncated)?;
        let is_new = raw_type & NEW_TAG_FLAG != 0;
        let base_type = raw_type & !NEW_TAG_FLAG;

        let name = if is_new {
            TagName::Id(r.read_u8().ok_or(TagError::Truncated)?)
        } else {
            let len = r.read_u16().ok_or(TagError::Truncated)?;
            if len == 1 {
                // Legacy numeric-name encoding: a 1-byte "string" is really an id.
                TagName::Id(r.read_u8().ok_or(TagError::Truncated)?)
            } else {
                let bytes = r.read_bytes(len as usize).ok_or(TagError::Truncated)?;
                TagName::Name(String::from_utf8_lossy(bytes).into_owned())
            }
        };

        let value = read_value(r, base_type)?;
        Ok(Self { name, value })
    }
}

fn base_type_byte(value: &TagValue, _name: &TagName) -> (u8, bool) {
    let is_new = true;
    let t = match value {
        TagValue::Hash(_) => TagTypeId::Hash16 as u8,
        TagValue::Str(s) if (1..=STR_MAX_LEN as usize).contains(&s.len()) => {
            STR_BASE + (s.len() as u8 - 1)
        }
        TagValue::Str(_) => TagTypeId::String as u8,
        TagValue::U32(_) => TagTypeId::Uint32 as u8,
        TagValue::F32(_) => TagTypeId::Float32 as u8,
        TagValue::Bool(_) => TagTypeId::Bool as u8,
        TagValue::Blob(_) => TagTypeId::Blob as u8,
        TagValue::U16(_) => TagTypeId::Uint16 as u8,
        TagValue::U8(_) => TagTypeId::Uint8 as u8,
        TagValue::U64(_) => TagTypeId::Uint64 as u8,
    };
    (t, is_new)
}

fn write_value(w: &mut Writer, value: &TagValue) {
    match value {
        TagValue::Hash(h) => w.write_hash(h),
        TagValue::Str(s) if (1..=STR_MAX_LEN as usize).contains(&s.len()) => {
            w.write_bytes(s.as_bytes());
        }
        TagValue::Str(s) => {
            w.write_u16(s.len() as u16);
            w.write_bytes(s.as_bytes());
        }
        TagValue::U32(v) => w.write_u32(*v),
        TagValue::F32(v) => w.write_u32(v.to_bits()),
        TagValue::Bool(v) => w.write_u8(u8::from(*v)),
        TagValue::Blob(b) => {
            w.write_u32(b.len() as u32);
            w.write_bytes(b);
        }
        TagValue::U16(v) => w.write_u16(*v),
        TagValue::U8(v) => w.write_u8(*v),
        TagValue::U64(v) => w.write_u64(*v),
    }
}

fn read_value(r: &mut Reader, raw_type: u8) -> Result<TagValue, TagError> {
    if (STR_BASE..STR_BASE + STR_MAX_LEN).contains(&raw_type) {
        let len = (raw_type - STR_BASE + 1) as usize;
        let bytes = r.read_bytes(len).ok_or(TagError::Truncated)?;
        return Ok(TagValue::Str(String::from_utf8_lossy(bytes).into_owned()));
    }
    let ty = TagTypeId::try_from(raw_type)?;
    Ok(match ty {
        TagTypeId::Hash16 => TagValue::Hash(Hash(
            r.read_bytes(16)
                .ok_or(TagError::Truncated)?
                .try_into()
                .expect("length checked above"),
        )),
        TagTypeId::String => {
            let len = r.read_u16().ok_or(TagError::Truncated)?;
            let bytes = r.read_bytes(len as usize).ok_or(TagError::Truncated)?;
            TagValue::Str(String::from_utf8_lossy(bytes).into_owned())
        }
        TagTypeId::Uint32 => TagValue::U32(r.read_u32().ok_or(TagError::Truncated)?),
        TagTypeId::Float32 => {
            TagValue::F32(f32::from_bits(r.read_u32().ok_or(TagError::Truncated)?))
        }
        TagTypeId::Bool => TagValue::Bool(r.read_u8().ok_or(TagError::Truncated)? != 0),
        TagTypeId::BoolArray => {
            // Bit-packed; length in bits is itself a uint16 count per the wire format.
            let bits = r.read_u16().ok_or(TagError::Truncated)?;
            let bytes = (bits as usize).div_ceil(8);
            let raw = r.read_bytes(bytes).ok_or(TagError::Truncated)?;
            TagValue::Blob(raw.to_vec())
        }
        TagTypeId::Blob => {
            let len = r.read_u32().ok_or(TagError::Truncated)?;
            if len > MAX_BLOB_LEN {
                return Err(TagError::BlobTagTooLong(len as usize));
            }
            let bytes = r.read_bytes(len as usize).ok_or(TagError::Truncated)?;
            TagValue::Blob(bytes.to_vec())
        }
        TagTypeId::Uint16 => TagValue::U16(r.read_u16().ok_or(TagError::Truncated)?),
        TagTypeId::Uint8 => TagValue::U8(r.read_u8().ok_or(TagError::Truncated)?),
        TagTypeId::Bsob => {
            let len = r.read_u8().ok_or(TagError::Truncated)?;
            let bytes = r.read_bytes(len as usize).ok_or(TagError::Truncated)?;
            TagValue::Blob(bytes.to_vec())
        }
        TagTypeId::Uint64 => TagValue::U64(r.read_u64().ok_or(TagError::Truncated)?),
    })
}

/// Reject a blob tag declaring a payload longer than this many bytes.
const MAX_BLOB_LEN: u32 = 16 * 1024 * 1024;

/// A count-prefixed (32-bit) list of tags (spec §4.1 "Tag list").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagList(pub Vec<Tag>);

impl TagList {
    /// Encode as `[count: u32][tag]*`.
    pub fn write(&self, w: &mut Writer) {
        w.write_u32(self.0.len() as u32);
        for tag in &self.0 {
            tag.write(w);
        }
    }

    /// Decode a count-prefixed tag list.
    ///
    /// # Errors
    /// Returns [`TagError::Truncated`] if the list is cut short, or a
    /// type-specific error from an individual tag.
    pub fn read(r: &mut Reader) -> Result<Self, TagError> {
        let count = r.read_u32().ok_or(TagError::Truncated)?;
        let mut tags = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            tags.push(Tag::read(r)?);
        }
        Ok(Self(tags))
    }

    /// Find the first tag with the given numeric name id.
    #[must_use]
    pub fn get_id(&self, id: u8) -> Option<&TagValue> {
        self.0.iter().find_map(|t| match &t.name {
            TagName::Id(tid) if *tid == id => Some(&t.value),
            _ => None,
        })
    }

    /// Find the first tag with the given string name.
    #[must_use]
    pub fn get_name(&self, name: &str) -> Option<&TagValue> {
        self.0.iter().find_map(|t| match &t.name {
            TagName::Name(n) if n == name => Some(&t.value),
            _ => None,
        })
    }
}

/// Well-known numeric tag name ids (spec §6 offer/hello payloads;
/// `original_source/libed2k/src/ctag.cpp`'s `taggIdtoString`).
pub mod names {
    /// File name
    pub const FT_FILENAME: u8 = 0x01;
    /// File size, low (or only) 32 bits
    pub const FT_FILESIZE: u8 = 0x02;
    /// eD2K file type string
    pub const FT_FILETYPE: u8 = 0x03;
    /// Container/file format string
    pub const FT_FILEFORMAT: u8 = 0x04;
    /// Seconds since last seen complete by a server
    pub const FT_LASTSEENCOMPLETE: u8 = 0x05;
    /// Bytes transferred so far for this source
    pub const FT_TRANSFERRED: u8 = 0x08;
    /// Number of complete sources known to a server
    pub const FT_SOURCES: u8 = 0x15;
    /// Download priority
    pub const FT_DLPRIORITY: u8 = 0x18;
    /// Upload priority
    pub const FT_ULPRIORITY: u8 = 0x19;
    /// AICH root hash
    pub const FT_AICH_HASH: u8 = 0x27;
    /// File size, high 32 bits (only present for files >= 4 GiB)
    pub const FT_FILESIZE_HI: u8 = 0x3A;
    /// Artist media tag
    pub const FT_MEDIA_ARTIST: u8 = 0xD0;
    /// Album media tag
    pub const FT_MEDIA_ALBUM: u8 = 0xD1;
    /// Title media tag
    pub const FT_MEDIA_TITLE: u8 = 0xD2;
    /// Length (duration) media tag
    pub const FT_MEDIA_LENGTH: u8 = 0xD3;
    /// Bitrate media tag
    pub const FT_MEDIA_BITRATE: u8 = 0xD4;
    /// Codec media tag
    pub const FT_MEDIA_CODEC: u8 = 0xD5;

    /// Client name (hello tag list)
    pub const CT_NAME: u8 = 0x01;
    /// Client listen port
    pub const CT_PORT: u8 = 0x0F;
    /// Client software version
    pub const CT_VERSION: u8 = 0x11;
    /// eMule misc-options bitfield 1
    pub const CT_EMULE_MISCOPTIONS1: u8 = 0xFA;
    /// eMule protocol version
    pub const CT_EMULE_VERSION: u8 = 0xFB;
    /// eMule misc-options bitfield 2
    pub const CT_EMULE_MISCOPTIONS2: u8 = 0xFE;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(tag: Tag) {
        let mut w = Writer::new();
        tag.write(&mut w);
        let bytes = w.into_vec();
        let mut r = Reader::new(&bytes);
        let decoded = Tag::read(&mut r).unwrap();
        assert_eq!(decoded, tag);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn roundtrip_u32_with_numeric_name() {
        roundtrip(Tag::with_id(names::FT_FILESIZE, TagValue::U32(42)));
    }

    #[test]
    fn roundtrip_short_string_uses_compact_type() {
        let tag = Tag::with_id(names::FT_FILENAME, TagValue::Str("hi".into()));
        let mut w = Writer::new();
        tag.write(&mut w);
        let bytes = w.into_vec();
        // type byte, then name-id byte, then 2 raw chars (no length prefix)
        assert_eq!(bytes[0] & !NEW_TAG_FLAG, STR_BASE + 1);
        roundtrip(tag);
    }

    #[test]
    fn roundtrip_long_string_uses_generic_type() {
        let long = "x".repeat(40);
        roundtrip(Tag::with_id(names::CT_NAME, TagValue::Str(long)));
    }

    #[test]
    fn roundtrip_hash_and_bool_and_u64() {
        roundtrip(Tag::with_id(names::FT_AICH_HASH, TagValue::Hash(Hash::zero())));
        roundtrip(Tag::with_name("seed_mode", TagValue::Bool(true)));
        roundtrip(Tag::with_id(names::FT_FILESIZE_HI, TagValue::U64(u64::MAX)));
    }

    #[test]
    fn tag_list_roundtrip_and_lookup() {
        let list = TagList(vec![
            Tag::with_id(names::FT_FILENAME, TagValue::Str("movie.avi".into())),
            Tag::with_id(names::FT_FILESIZE, TagValue::U32(123_456)),
        ]);
        let mut w = Writer::new();
        list.write(&mut w);
        let bytes = w.into_vec();
        let mut r = Reader::new(&bytes);
        let decoded = TagList::read(&mut r).unwrap();
        assert_eq!(decoded, list);
        assert_eq!(
            decoded.get_id(names::FT_FILESIZE).unwrap().as_u64().unwrap(),
            123_456
        );
    }

    #[test]
    fn oversized_blob_rejected() {
        let mut w = Writer::new();
        w.write_u8(TagTypeId::Blob as u8 | NEW_TAG_FLAG);
        w.write_u8(0x01);
        w.write_u32(MAX_BLOB_LEN + 1);
        let bytes = w.into_vec();
        let mut r = Reader::new(&bytes);
        let err = Tag::read(&mut r).unwrap_err();
        assert!(matches!(err, TagError::BlobTagTooLong(_)));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn any_u32_tag_roundtrips(id in any::<u8>(), v in any::<u32>()) {
                roundtrip(Tag::with_id(id, TagValue::U32(v)));
            }

            #[test]
            fn any_short_string_roundtrips(id in any::<u8>(), s in "[a-zA-Z0-9]{1,16}") {
                roundtrip(Tag::with_id(id, TagValue::Str(s)));
            }
        }
    }
}
