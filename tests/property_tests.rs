//! Property-based tests over the wire codec, search encoder and picker.

use proptest::prelude::*;

mod frame_properties {
    use super::*;
    use ed2k_core::frame::{Packet, Protocol};

    proptest! {
        /// Any `Ed2k`-protocol frame parses back to the opcode and body it
        /// was encoded with.
        #[test]
        fn ed2k_frame_roundtrip(opcode in any::<u8>(), body in prop::collection::vec(any::<u8>(), 0..512)) {
            let encoded = Packet::encode(Protocol::Ed2k, opcode, &body);
            let (packet, consumed) = Packet::parse(&encoded, ed2k_core::DEFAULT_MAX_PACKET_SIZE).unwrap();
            prop_assert_eq!(consumed, encoded.len());
            prop_assert_eq!(packet.opcode, opcode);
            prop_assert_eq!(packet.body.as_ref(), body.as_slice());
        }

        /// A buffer truncated to fewer bytes than the header never panics
        /// and is reported as "too short", never as a different error kind.
        #[test]
        fn truncated_header_is_reported_as_too_short(prefix_len in 0usize..5) {
            let encoded = Packet::encode(Protocol::Ed2k, 0x01, b"hello");
            let truncated = &encoded[..prefix_len];
            let err = Packet::parse(truncated, ed2k_core::DEFAULT_MAX_PACKET_SIZE).unwrap_err();
            prop_assert!(matches!(err, ed2k_core::error::ProtocolError::TooShort { .. }));
        }
    }
}

mod hash_properties {
    use super::*;
    use ed2k_core::hash::{hash_bytes, piece_count, Hash, PIECE_SIZE};

    proptest! {
        /// Hashing the same bytes twice always yields the same file hash,
        /// and the piece count matches the pure arithmetic formula.
        #[test]
        fn hash_bytes_is_deterministic(len in 1usize..(2 * PIECE_SIZE as usize + 17)) {
            let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
            let a = hash_bytes(&data).unwrap();
            let b = hash_bytes(&data).unwrap();
            prop_assert_eq!(a.file_hash, b.file_hash);
            prop_assert_eq!(a.real_piece_count(len as u64), piece_count(len as u64));
        }

        /// Concatenated-hash derivation never depends on anything but the
        /// input hash sequence.
        #[test]
        fn of_concatenated_is_order_sensitive(a in prop::array::uniform16(any::<u8>()), b in prop::array::uniform16(any::<u8>())) {
            prop_assume!(a != b);
            let ha = Hash(a);
            let hb = Hash(b);
            let forward = Hash::of_concatenated(&[ha, hb]);
            let backward = Hash::of_concatenated(&[hb, ha]);
            prop_assert_ne!(forward, backward);
        }
    }
}

mod search_properties {
    use super::*;
    use ed2k_net::search::{self, Node};

    proptest! {
        /// A flat chain of AND'd keyword terms always encodes successfully
        /// as long as it stays within the node budget.
        #[test]
        fn and_chain_within_budget_always_encodes(terms in prop::collection::vec("[a-z]{1,8}", 1..10)) {
            let mut iter = terms.into_iter().map(Node::Str);
            let first = iter.next().unwrap();
            let expr = iter.fold(first, |acc, term| Node::and(acc, term));
            prop_assert!(search::encode(&expr).is_ok());
        }
    }
}

mod picker_properties {
    use super::*;
    use ed2k_transfer::picker::{PickFlags, Picker};

    proptest! {
        /// Picking blocks never returns more than requested, and every
        /// picked block lies within the picker's own piece/block bounds.
        #[test]
        fn pick_blocks_respects_count_and_bounds(file_size in 1u64..(4 * ed2k_core::hash::PIECE_SIZE), count in 0usize..16) {
            let mut picker = Picker::new(file_size);
            let peer_has = vec![true; picker.num_pieces() as usize];
            let picked = picker.pick_blocks(&peer_has, count, PickFlags::default());
            prop_assert!(picked.len() <= count);
            for block in &picked {
                prop_assert!(block.piece < picker.num_pieces());
            }
        }
    }
}
