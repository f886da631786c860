//! Packet framing for the ED2K/eMule/packed wire protocols (spec §4.1).
//!
//! `[protocol:1][length:4 LE][opcode:1][body:length-1]`. `length` counts the
//! opcode byte plus the body. `packed` frames carry a zlib-deflated
//! `[opcode][body]` pair; once inflated they are handled exactly like an
//! `Ed2k`-protocol frame.

use std::borrow::Cow;

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

use crate::error::ProtocolError;

/// Protocol byte occupying the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    /// Plain ED2K protocol
    Ed2k = 0xE3,
    /// eMule extension protocol
    Emule = 0xC5,
    /// zlib-compressed frame; inflates to an `Ed2k` frame
    Packed = 0xD4,
}

impl TryFrom<u8> for Protocol {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0xE3 => Ok(Self::Ed2k),
            0xC5 => Ok(Self::Emule),
            0xD4 => Ok(Self::Packed),
            other => Err(ProtocolError::InvalidProtocolType(other)),
        }
    }
}

/// Header size: protocol byte (1) + length (4).
pub const HEADER_SIZE: usize = 5;

/// A decoded packet, ready for opcode dispatch.
///
/// `protocol` reflects the *effective* protocol after any inflation: a
/// `packed` frame on the wire reports `Ed2k` here, per spec §4.1
/// ("parsed as if it had been sent with ED2K protocol").
#[derive(Debug, Clone)]
pub struct Packet<'a> {
    /// Effective protocol (never `Packed`: inflated frames report `Ed2k`).
    pub protocol: Protocol,
    /// Message opcode, dispatched per §6's opcode tables.
    pub opcode: u8,
    /// Message body following the opcode byte.
    pub body: Cow<'a, [u8]>,
    /// Whether this packet arrived compressed on the wire.
    pub was_packed: bool,
}

impl<'a> Packet<'a> {
    /// Parse one packet from the front of `buf`.
    ///
    /// Returns `(packet, consumed_bytes)` on success. Two error kinds need
    /// different caller handling (spec §4.1 "Failure modes"):
    /// - [`ProtocolError::InvalidProtocolType`] / [`ProtocolError::InvalidPacketSize`]
    ///   are fatal: the caller disconnects.
    /// - [`ProtocolError::Inflate`] is not fatal: the caller drops this one
    ///   packet and continues reading from the stream.
    /// - [`ProtocolError::TooShort`] means the caller should buffer more
    ///   bytes and retry; it is not a protocol violation.
    pub fn parse(buf: &'a [u8], max_packet_size: u32) -> Result<(Self, usize), ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::TooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }
        let protocol = Protocol::try_from(buf[0])?;
        let length = u32::from_le_bytes(buf[1..5].try_into().unwrap());
        if length == 0 {
            return Err(ProtocolError::TooShort {
                expected: 1,
                actual: 0,
            });
        }
        if length > max_packet_size {
            return Err(ProtocolError::InvalidPacketSize {
                size: length,
                max: max_packet_size,
            });
        }
        let total = HEADER_SIZE + length as usize;
        if buf.len() < total {
            return Err(ProtocolError::TooShort {
                expected: total,
                actual: buf.len(),
            });
        }
        let after_header = &buf[HEADER_SIZE..total];

        let (effective_protocol, opcode, body) = match protocol {
            Protocol::Packed => {
                let inflated = inflate(after_header, max_packet_size)?;
                if inflated.is_empty() {
                    return Err(ProtocolError::PayloadOverflow);
                }
                (Protocol::Ed2k, inflated[0], Cow::Owned(inflated[1..].to_vec()))
            }
            other => (other, after_header[0], Cow::Borrowed(&after_header[1..])),
        };

        Ok((
            Self {
                protocol: effective_protocol,
                opcode,
                body,
                was_packed: matches!(protocol, Protocol::Packed),
            },
            total,
        ))
    }

    /// Encode this packet, uncompressed, as `[protocol][length][opcode][body]`.
    #[must_use]
    pub fn encode(protocol: Protocol, opcode: u8, body: &[u8]) -> Vec<u8> {
        let length = (body.len() + 1) as u32;
        let mut out = Vec::with_capacity(HEADER_SIZE + length as usize);
        out.push(protocol as u8);
        out.extend_from_slice(&length.to_le_bytes());
        out.push(opcode);
        out.extend_from_slice(body);
        out
    }

    /// Encode as a `packed` frame: `[opcode][body]` deflated, wrapped with
    /// the `0xD4` protocol byte.
    #[must_use]
    pub fn encode_packed(opcode: u8, body: &[u8]) -> Vec<u8> {
        let mut plain = Vec::with_capacity(1 + body.len());
        plain.push(opcode);
        plain.extend_from_slice(body);
        let deflated = deflate(&plain);

        let length = (deflated.len()) as u32;
        let mut out = Vec::with_capacity(HEADER_SIZE + deflated.len());
        out.push(Protocol::Packed as u8);
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&deflated);
        out
    }
}

fn inflate(data: &[u8], max_packet_size: u32) -> Result<Vec<u8>, ProtocolError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .take(u64::from(max_packet_size) * 8)
        .read_to_end(&mut out)
        .map_err(|e| ProtocolError::Inflate(e.to_string()))?;
    Ok(out)
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("writing to an in-memory encoder cannot fail");
    encoder.finish().expect("finishing an in-memory encoder cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_parse_plain_ed2k() {
        let body = b"hello world";
        let wire = Packet::encode(Protocol::Ed2k, 0x01, body);
        let (pkt, consumed) = Packet::parse(&wire, 1 << 20).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(pkt.protocol, Protocol::Ed2k);
        assert_eq!(pkt.opcode, 0x01);
        assert_eq!(&*pkt.body, body);
        assert!(!pkt.was_packed);
    }

    #[test]
    fn encode_then_parse_packed_reports_ed2k() {
        let body = vec![b'A'; 5000]; // compresses well, exercises the deflate path
        let wire = Packet::encode_packed(0x15, &body);
        let (pkt, consumed) = Packet::parse(&wire, 1 << 20).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(pkt.protocol, Protocol::Ed2k);
        assert_eq!(pkt.opcode, 0x15);
        assert_eq!(&*pkt.body, body.as_slice());
        assert!(pkt.was_packed);
    }

    #[test]
    fn unknown_protocol_byte_rejected() {
        let mut wire = Packet::encode(Protocol::Ed2k, 0x01, b"x");
        wire[0] = 0x99;
        let err = Packet::parse(&wire, 1 << 20).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidProtocolType(0x99)));
    }

    #[test]
    fn oversized_length_rejected() {
        let wire = Packet::encode(Protocol::Ed2k, 0x01, &vec![0u8; 100]);
        let err = Packet::parse(&wire, 10).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPacketSize { .. }));
    }

    #[test]
    fn short_buffer_reports_too_short_not_fatal() {
        let wire = Packet::encode(Protocol::Ed2k, 0x01, b"hello");
        let err = Packet::parse(&wire[..3], 1 << 20).unwrap_err();
        assert!(matches!(err, ProtocolError::TooShort { .. }));
    }

    #[test]
    fn corrupt_packed_body_is_inflate_error_not_invalid_protocol() {
        let mut wire = Packet::encode_packed(0x01, b"some body worth compressing");
        // Corrupt the deflate stream but keep the protocol byte and length honest.
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        let err = Packet::parse(&wire, 1 << 20).unwrap_err();
        assert!(matches!(err, ProtocolError::Inflate(_)));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn roundtrip_arbitrary_bodies(opcode in any::<u8>(), body in proptest::collection::vec(any::<u8>(), 0..512)) {
                let wire = Packet::encode(Protocol::Ed2k, opcode, &body);
                let (pkt, consumed) = Packet::parse(&wire, 1 << 20).unwrap();
                prop_assert_eq!(consumed, wire.len());
                prop_assert_eq!(pkt.opcode, opcode);
                prop_assert_eq!(&*pkt.body, body.as_slice());
            }

            #[test]
            fn packed_roundtrip_matches_plain(opcode in any::<u8>(), body in proptest::collection::vec(any::<u8>(), 0..512)) {
                let packed = Packet::encode_packed(opcode, &body);
                let (pkt, _) = Packet::parse(&packed, 1 << 20).unwrap();
                prop_assert_eq!(pkt.opcode, opcode);
                prop_assert_eq!(&*pkt.body, body.as_slice());
            }

            #[test]
            fn parser_never_panics_on_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
                let _ = Packet::parse(&bytes, 1 << 20);
            }
        }
    }
}
