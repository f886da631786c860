//! Little-endian primitive reader/writer shared by the frame, tag and
//! resume-data codecs (spec §4.1 "Primitive encoding").

use crate::hash::Hash;

/// A cursor over a borrowed byte slice. All multi-byte reads are little-endian.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Wrap `buf` for sequential reading.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read `n` raw bytes, or `None` if fewer than `n` remain.
    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self) -> Option<u16> {
        self.read_bytes(2)
            .map(|b| u16::from_le_bytes(b.try_into().unwrap()))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_bytes(4)
            .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
    }

    /// Read a little-endian `u64`.
    pub fn read_u64(&mut self) -> Option<u64> {
        self.read_bytes(8)
            .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
    }

    /// Read a 16-bit length-prefixed, non-terminated string (lossily decoded as UTF-8).
    pub fn read_string16(&mut self) -> Option<String> {
        let len = self.read_u16()?;
        let bytes = self.read_bytes(len as usize)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read a 128-bit [`Hash`].
    pub fn read_hash(&mut self) -> Option<Hash> {
        self.read_bytes(16).map(|b| Hash(b.try_into().unwrap()))
    }
}

/// An append-only little-endian byte buffer builder.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// New empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// New empty writer with a pre-reserved capacity.
    #[must_use]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append one byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Append a little-endian `u16`.
    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a little-endian `u32`.
    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a little-endian `u64`.
    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a 16-bit length-prefixed string.
    pub fn write_string16(&mut self, s: &str) {
        self.write_u16(s.len() as u16);
        self.write_bytes(s.as_bytes());
    }

    /// Append a 128-bit [`Hash`].
    pub fn write_hash(&mut self, h: &Hash) {
        self.write_bytes(&h.0);
    }

    /// Consume the writer, yielding the accumulated bytes.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Current length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// `true` if nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Encode a file size as spec §4.1 describes: a 4-byte low part, with a
/// 4-byte high part appended only when non-zero. Returns the number of
/// 32-bit words written (1 or 2) so callers can mirror it in a
/// "has-large-file-size" flag if their message format needs one.
pub fn write_fsize_32_or_64(w: &mut Writer, size: u64) -> u8 {
    w.write_u32(size as u32);
    let hi = (size >> 32) as u32;
    if hi != 0 {
        w.write_u32(hi);
        2
    } else {
        1
    }
}

/// Read a file size written by [`write_fsize_32_or_64`]. `has_high` tells
/// the reader whether a high 32-bit word follows, per the negotiated
/// large-files misc-option or an explicit tag (spec §4.1).
pub fn read_fsize(r: &mut Reader, has_high: bool) -> Option<u64> {
    let lo = r.read_u32()? as u64;
    if has_high {
        let hi = r.read_u32()? as u64;
        Some(lo | (hi << 32))
    } else {
        Some(lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_ints_and_string() {
        let mut w = Writer::new();
        w.write_u8(7);
        w.write_u16(1000);
        w.write_u32(100_000);
        w.write_u64(10_000_000_000);
        w.write_string16("hello");
        let bytes = w.into_vec();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u8(), Some(7));
        assert_eq!(r.read_u16(), Some(1000));
        assert_eq!(r.read_u32(), Some(100_000));
        assert_eq!(r.read_u64(), Some(10_000_000_000));
        assert_eq!(r.read_string16().as_deref(), Some("hello"));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn fsize_small_writes_one_word() {
        let mut w = Writer::new();
        let words = write_fsize_32_or_64(&mut w, 12345);
        assert_eq!(words, 1);
        let bytes = w.into_vec();
        assert_eq!(bytes.len(), 4);
        let mut r = Reader::new(&bytes);
        assert_eq!(read_fsize(&mut r, false), Some(12345));
    }

    #[test]
    fn fsize_large_writes_two_words() {
        let size = (4u64 << 30) + 77;
        let mut w = Writer::new();
        let words = write_fsize_32_or_64(&mut w, size);
        assert_eq!(words, 2);
        let bytes = w.into_vec();
        assert_eq!(bytes.len(), 8);
        let mut r = Reader::new(&bytes);
        assert_eq!(read_fsize(&mut r, true), Some(size));
    }

    #[test]
    fn truncated_read_returns_none() {
        let mut r = Reader::new(&[1, 2]);
        assert_eq!(r.read_u32(), None);
    }
}
