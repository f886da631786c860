//! Piece picker: tracks per-piece and per-block download state and decides
//! which blocks to request next (spec §4.3).
//!
//! Grounded on the teacher's `node/transfer_manager.rs` chunk bookkeeping,
//! generalized from whole-file chunk indices to the two-level piece/block
//! scheme ed2k uses.

use std::collections::HashMap;

use ed2k_core::hash::{BLOCK_SIZE, PIECE_SIZE, piece_range};

use crate::error::{Result, TransferError};

/// State of a single block within a downloading piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Not requested from any peer.
    None,
    /// Reserved by exactly one peer; bytes not yet received.
    Requested,
    /// Bytes received, storage write in flight.
    Writing,
    /// Storage write completed.
    Finished,
}

/// Named transfer/file-level priority, distinct from the raw 0..7 per-piece
/// scale `Picker` itself uses (spec §4.3). Grounded on `file.hpp`'s
/// `PR_VERYLOW..PR_POWERSHARE` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Priority {
    /// Lowest transfer priority.
    Low = 0,
    /// Default priority for a new transfer.
    Normal = 1,
    /// Above normal.
    High = 2,
    /// Highest explicit priority.
    VeryHigh = 3,
    /// Below low; yields to every other priority.
    VeryLow = 4,
    /// Session-managed: priority adjusts automatically with demand.
    Auto = 5,
    /// Reference-client "powershare" incentive priority.
    PowerShare = 6,
}

impl Priority {
    /// Map onto a piece-picker priority in the 0..=7 scale (spec §4.3).
    #[must_use]
    pub fn as_piece_priority(self) -> u8 {
        match self {
            Self::VeryLow => 1,
            Self::Low => 2,
            Self::Normal => PRIORITY_MAX / 2,
            Self::High => 5,
            Self::VeryHigh => 6,
            Self::Auto | Self::PowerShare => PRIORITY_MAX,
        }
    }
}

/// Disables picking entirely when set on a piece (spec §4.3 "priority 0
/// disables picking").
pub const PRIORITY_DISABLED: u8 = 0;
/// Maximum per-piece priority value.
pub const PRIORITY_MAX: u8 = 7;

#[derive(Debug, Clone)]
struct PieceEntry {
    blocks: Vec<BlockState>,
    priority: u8,
    have: bool,
}

impl PieceEntry {
    fn new(num_blocks: u32, priority: u8) -> Self {
        Self {
            blocks: vec![BlockState::None; num_blocks as usize],
            priority,
            have: false,
        }
    }

    fn is_finished(&self) -> bool {
        self.blocks
            .iter()
            .all(|b| matches!(b, BlockState::Finished | BlockState::Writing))
    }
}

/// A block identifier: which piece, which block within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    /// Piece index.
    pub piece: u64,
    /// Block index within the piece.
    pub block: u32,
}

/// Bias flags for [`Picker::pick_blocks`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PickFlags {
    /// Randomize among equal-priority candidates instead of picking the
    /// lowest piece index first (spec §4.3 "rarest-first" policy).
    pub rarest_first: bool,
}

/// Per-piece, per-block download state for one transfer's hash set.
///
/// Absent entirely on a pure seed; callers must check [`Picker::has_picker`]
/// equivalents at the [`crate::transfer::Transfer`] level before reaching
/// for one of these.
#[derive(Debug, Clone)]
pub struct Picker {
    file_size: u64,
    pieces: HashMap<u64, PieceEntry>,
    num_pieces: u64,
}

fn blocks_in_piece(piece: u64, file_size: u64) -> u32 {
    let range = piece_range(piece, file_size);
    ((range.end - range.start).div_ceil(BLOCK_SIZE)) as u32
}

impl Picker {
    /// Build a picker for a file of `file_size` bytes, all pieces missing
    /// at default priority.
    #[must_use]
    pub fn new(file_size: u64) -> Self {
        let num_pieces = ed2k_core::hash::piece_count(file_size);
        Self {
            file_size,
            pieces: HashMap::new(),
            num_pieces,
        }
    }

    fn entry(&mut self, piece: u64) -> Result<&mut PieceEntry> {
        if piece >= self.num_pieces {
            return Err(TransferError::PieceOutOfRange(piece));
        }
        let file_size = self.file_size;
        Ok(self
            .pieces
            .entry(piece)
            .or_insert_with(|| PieceEntry::new(blocks_in_piece(piece, file_size), PRIORITY_MAX / 2)))
    }

    /// Set the download priority of `piece`. `0` disables picking it.
    ///
    /// # Errors
    /// Returns [`TransferError::PieceOutOfRange`] for an out-of-range index.
    pub fn set_priority(&mut self, piece: u64, priority: u8) -> Result<()> {
        self.entry(piece)?.priority = priority.min(PRIORITY_MAX);
        Ok(())
    }

    /// Mark `piece` fully owned (spec §4.6 "for each piece marked have in
    /// the blob, issue we_have").
    ///
    /// # Errors
    /// Returns [`TransferError::PieceOutOfRange`] for an out-of-range index.
    pub fn we_have(&mut self, piece: u64) -> Result<()> {
        let e = self.entry(piece)?;
        e.have = true;
        e.blocks.iter_mut().for_each(|b| *b = BlockState::Finished);
        Ok(())
    }

    /// Mark `piece` as not owned, reopening every block for picking.
    ///
    /// # Errors
    /// Returns [`TransferError::PieceOutOfRange`] for an out-of-range index.
    pub fn we_dont_have(&mut self, piece: u64) -> Result<()> {
        let e = self.entry(piece)?;
        e.have = false;
        e.blocks.iter_mut().for_each(|b| *b = BlockState::None);
        Ok(())
    }

    /// `true` if this piece is fully owned.
    #[must_use]
    pub fn have_piece(&self, piece: u64) -> bool {
        self.pieces.get(&piece).is_some_and(|e| e.have)
    }

    /// `true` when every block of `piece` is `finished` or `writing` (spec
    /// §4.3).
    #[must_use]
    pub fn is_piece_finished(&self, piece: u64) -> bool {
        self.pieces.get(&piece).is_some_and(PieceEntry::is_finished)
    }

    /// Select up to `count` blocks the remote (per `peer_has`, one bit per
    /// piece) advertises, biased by priority, with `flags` controlling tie
    /// breaking.
    pub fn pick_blocks(&mut self, peer_has: &[bool], count: usize, flags: PickFlags) -> Vec<BlockId> {
        let mut candidates: Vec<u64> = (0..self.num_pieces)
            .filter(|&p| peer_has.get(p as usize).copied().unwrap_or(false))
            .filter(|&p| !self.have_piece(p))
            .filter(|&p| {
                self.pieces
                    .get(&p)
                    .map(|e| e.priority != PRIORITY_DISABLED)
                    .unwrap_or(true)
            })
            .collect();

        if flags.rarest_first {
            use rand::seq::SliceRandom;
            candidates.shuffle(&mut rand::thread_rng());
        }

        let mut picked = Vec::with_capacity(count);
        'outer: for piece in candidates {
            let num_blocks = blocks_in_piece(piece, self.file_size);
            let entry = self
                .entry(piece)
                .expect("candidate piece index was already range-checked");
            for block in 0..num_blocks {
                if picked.len() >= count {
                    break 'outer;
                }
                if entry.blocks[block as usize] == BlockState::None {
                    picked.push(BlockId { piece, block });
                }
            }
        }
        picked
    }

    /// Reserve `block` as requested from exactly one peer.
    ///
    /// # Errors
    /// Returns a range error for an out-of-range piece or block.
    pub fn mark_requested(&mut self, block: BlockId) -> Result<()> {
        self.set_block_state(block, BlockState::Requested)
    }

    /// Mark `block`'s bytes received and a storage write in flight.
    ///
    /// # Errors
    /// Returns a range error for an out-of-range piece or block.
    pub fn mark_writing(&mut self, block: BlockId) -> Result<()> {
        self.set_block_state(block, BlockState::Writing)
    }

    /// Mark `block`'s storage write complete.
    ///
    /// # Errors
    /// Returns a range error for an out-of-range piece or block.
    pub fn mark_finished(&mut self, block: BlockId) -> Result<()> {
        self.set_block_state(block, BlockState::Finished)
    }

    /// Abandon a download reservation on `block`, reverting it to `none`.
    ///
    /// # Errors
    /// Returns a range error for an out-of-range piece or block.
    pub fn abort_download(&mut self, block: BlockId) -> Result<()> {
        self.set_block_state(block, BlockState::None)
    }

    /// Revert a failed write (`writing → none`), reopening the piece for
    /// picking (spec §4.3).
    ///
    /// # Errors
    /// Returns a range error for an out-of-range piece or block.
    pub fn write_failed(&mut self, block: BlockId) -> Result<()> {
        self.set_block_state(block, BlockState::None)
    }

    fn set_block_state(&mut self, block: BlockId, state: BlockState) -> Result<()> {
        let num_blocks = blocks_in_piece(block.piece, self.file_size);
        if block.block >= num_blocks {
            return Err(TransferError::BlockOutOfRange {
                piece: block.piece,
                block: block.block,
            });
        }
        let entry = self.entry(block.piece)?;
        entry.blocks[block.block as usize] = state;
        Ok(())
    }

    /// Byte range `[start, end)` of `block` within the piece.
    #[must_use]
    pub fn block_range(&self, block: BlockId) -> std::ops::Range<u64> {
        let piece = piece_range(block.piece, self.file_size);
        let start = piece.start + u64::from(block.block) * BLOCK_SIZE;
        let end = (start + BLOCK_SIZE).min(piece.end);
        start..end
    }

    /// Total number of pieces in this file.
    #[must_use]
    pub fn num_pieces(&self) -> u64 {
        self.num_pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_picker_has_expected_piece_count() {
        let p = Picker::new(PIECE_SIZE * 2 + 100);
        assert_eq!(p.num_pieces(), 3);
    }

    #[test]
    fn priority_maps_into_piece_priority_range() {
        assert_eq!(Priority::VeryLow.as_piece_priority(), 1);
        assert_eq!(Priority::Auto.as_piece_priority(), PRIORITY_MAX);
        assert!(Priority::Normal.as_piece_priority() <= PRIORITY_MAX);
    }

    #[test]
    fn pick_blocks_respects_peer_has_and_have() {
        let mut p = Picker::new(BLOCK_SIZE * 3);
        let peer_has = vec![true];
        let picked = p.pick_blocks(&peer_has, 10, PickFlags::default());
        assert_eq!(picked.len(), 3);
        assert!(picked.iter().all(|b| b.piece == 0));
    }

    #[test]
    fn priority_zero_excludes_piece_from_picking() {
        let mut p = Picker::new(PIECE_SIZE * 2);
        p.set_priority(0, PRIORITY_DISABLED).unwrap();
        let peer_has = vec![true, true];
        let picked = p.pick_blocks(&peer_has, 100, PickFlags::default());
        assert!(picked.iter().all(|b| b.piece == 1));
    }

    #[test]
    fn block_lifecycle_and_piece_finished() {
        let mut p = Picker::new(BLOCK_SIZE * 2);
        let b0 = BlockId { piece: 0, block: 0 };
        let b1 = BlockId { piece: 0, block: 1 };
        p.mark_requested(b0).unwrap();
        p.mark_writing(b0).unwrap();
        p.mark_finished(b0).unwrap();
        assert!(!p.is_piece_finished(0));
        p.mark_requested(b1).unwrap();
        p.mark_writing(b1).unwrap();
        assert!(p.is_piece_finished(0));
    }

    #[test]
    fn write_failed_reopens_block() {
        let mut p = Picker::new(BLOCK_SIZE);
        let b = BlockId { piece: 0, block: 0 };
        p.mark_requested(b).unwrap();
        p.mark_writing(b).unwrap();
        p.write_failed(b).unwrap();
        let picked = p.pick_blocks(&[true], 10, PickFlags::default());
        assert_eq!(picked, vec![b]);
    }

    #[test]
    fn we_have_then_we_dont_have_roundtrip() {
        let mut p = Picker::new(BLOCK_SIZE * 2);
        p.we_have(0).unwrap();
        assert!(p.have_piece(0));
        assert!(p.is_piece_finished(0));
        p.we_dont_have(0).unwrap();
        assert!(!p.have_piece(0));
        assert!(!p.is_piece_finished(0));
    }

    #[test]
    fn out_of_range_piece_is_error() {
        let mut p = Picker::new(BLOCK_SIZE);
        assert!(matches!(
            p.we_have(5),
            Err(TransferError::PieceOutOfRange(5))
        ));
    }

    #[test]
    fn block_range_matches_piece_bounds() {
        let p = Picker::new(BLOCK_SIZE + 100);
        let r0 = p.block_range(BlockId { piece: 0, block: 0 });
        assert_eq!(r0, 0..BLOCK_SIZE);
        let r1 = p.block_range(BlockId { piece: 0, block: 1 });
        assert_eq!(r1, BLOCK_SIZE..BLOCK_SIZE + 100);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn finished_block_count_never_exceeds_block_count(
                file_size in 1u64..(BLOCK_SIZE * 5),
            ) {
                let mut p = Picker::new(file_size);
                let peer_has = vec![true; p.num_pieces() as usize];
                let picked = p.pick_blocks(&peer_has, 1000, PickFlags::default());
                for b in &picked {
                    p.mark_requested(*b).unwrap();
                    p.mark_writing(*b).unwrap();
                    p.mark_finished(*b).unwrap();
                }
                for piece in 0..p.num_pieces() {
                    let n = blocks_in_piece(piece, file_size);
                    prop_assert!(n > 0);
                }
            }
        }
    }
}
