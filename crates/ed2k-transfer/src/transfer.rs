//! Per-file transfer state machine (spec §4.6).
//!
//! Grounded on the teacher's `node/transfer_manager.rs` lifecycle bookkeeping
//! and `node/transfer.rs`'s state enum, generalized to the ed2k
//! checking/downloading/seeding state chain and piece-hash verification.

use ed2k_core::hash::{Hash, HashSet};
use ed2k_files::resume::{ResumeData, UnfinishedPiece};

use crate::error::{Result, TransferError};
use crate::picker::Picker;
use crate::policy::Policy;

/// Transfer lifecycle states (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Waiting for a checking slot (bounded concurrency at the session level).
    QueuedForChecking,
    /// Loading and validating resume data.
    CheckingResumeData,
    /// Streaming full per-piece verification from storage.
    CheckingFiles,
    /// Actively downloading missing pieces.
    Downloading,
    /// All wanted pieces verified; storage released/reopened read-only.
    Finished,
    /// Finished, and every piece (not just wanted ones) is present.
    Seeding,
    /// Paused by the user; resumes into whichever state preceded it.
    Paused,
}

/// Why a piece failed hash verification, for caller-side peer penalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceMismatch {
    /// The piece whose MD4 did not match the hash set.
    pub piece: u64,
}

/// A single file's aggregate transfer state: hash set, picker, peer policy,
/// and the state machine driving verification (spec §3 "Transfer").
#[derive(Debug)]
pub struct Transfer {
    hash_set: HashSet,
    file_size: u64,
    state: TransferState,
    picker: Option<Picker>,
    resumed_from: Option<TransferState>,
    total_uploaded: u64,
    total_downloaded: u64,
    policy: Policy,
}

impl Transfer {
    /// Start a brand-new transfer with no resume data: enters
    /// `queued_for_checking`.
    #[must_use]
    pub fn new(hash_set: HashSet, file_size: u64) -> Self {
        Self {
            hash_set,
            file_size,
            state: TransferState::QueuedForChecking,
            picker: Some(Picker::new(file_size)),
            resumed_from: None,
            total_uploaded: 0,
            total_downloaded: 0,
            policy: Policy::new(),
        }
    }

    /// Borrow this transfer's peer list (spec §3 "Owned by the transfer's
    /// policy").
    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Mutably borrow this transfer's peer list, for recording newly
    /// discovered sources or connect/disconnect events.
    pub fn policy_mut(&mut self) -> &mut Policy {
        &mut self.policy
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// The content hash identifying this transfer.
    #[must_use]
    pub fn transfer_hash(&self) -> Hash {
        self.hash_set.file_hash
    }

    /// `true` unless the transfer is a pure seed (spec §4.3 "picker is
    /// absent when the transfer is a pure seed").
    #[must_use]
    pub fn has_picker(&self) -> bool {
        self.picker.is_some()
    }

    /// Borrow the piece picker.
    ///
    /// # Errors
    /// Returns [`TransferError::NoPicker`] once the transfer has become a
    /// pure seed.
    pub fn picker_mut(&mut self) -> Result<&mut Picker> {
        self.picker.as_mut().ok_or(TransferError::NoPicker)
    }

    /// Begin resume-data based checking. Applies `we_have`/finished-block
    /// bookkeeping for every piece the blob reports as verified, and queues
    /// the remaining pieces for a full check when the blob is absent or
    /// rejected.
    ///
    /// # Errors
    /// Returns [`TransferError::ResumeRejected`] if `resume` doesn't match
    /// this transfer's content hash (spec §4.6 "a mismatched hash...is
    /// rejected").
    pub fn enter_checking_resume_data(&mut self, resume: Option<&ResumeData>) -> Result<()> {
        self.require(TransferState::QueuedForChecking, TransferState::CheckingResumeData)?;
        self.state = TransferState::CheckingResumeData;

        let Some(resume) = resume else {
            self.enter_checking_files();
            return Ok(());
        };
        if resume.transfer_hash != self.hash_set.file_hash {
            tracing::warn!("resume data hash mismatch, queuing full recheck");
            self.enter_checking_files();
            return Err(TransferError::ResumeRejected(
                "transfer-hash does not match".into(),
            ));
        }

        let picker = self.picker.as_mut().ok_or(TransferError::NoPicker)?;
        for (piece, byte) in resume.pieces.iter().enumerate() {
            if byte & 0x01 != 0 {
                picker.we_have(piece as u64)?;
            }
        }
        for UnfinishedPiece { piece, block_bitmask } in &resume.unfinished {
            let num_blocks = 64 - block_bitmask.leading_zeros().min(64);
            for block in 0..num_blocks {
                if block_bitmask & (1 << block) != 0 {
                    picker.mark_finished(crate::picker::BlockId {
                        piece: *piece,
                        block,
                    })?;
                }
            }
        }
        self.enter_downloading();
        Ok(())
    }

    /// Entered when resume data was absent or rejected: every piece starts
    /// unverified and storage is consulted directly.
    pub fn enter_checking_files(&mut self) {
        self.state = TransferState::CheckingFiles;
    }

    /// Called once `checking_files`/`checking_resume_data` has resolved
    /// every piece's have/have-not status. Transitions to `downloading`, or
    /// straight to `finished`/`seeding` if nothing remains to fetch.
    pub fn enter_downloading(&mut self) {
        self.state = TransferState::Downloading;
        self.maybe_complete();
    }

    /// Verify a just-written piece's bytes against the hash set. On match,
    /// marks it owned in the picker and returns `Ok(())`; on mismatch,
    /// reopens every block of the piece and returns the mismatch so the
    /// caller can penalize the source peer (spec §4.6).
    ///
    /// # Errors
    /// Returns [`TransferError::PieceOutOfRange`] for an unknown piece.
    pub fn verify_piece(&mut self, piece: u64, data: &[u8]) -> Result<std::result::Result<(), PieceMismatch>> {
        let expected = self
            .hash_set
            .pieces
            .get(piece as usize)
            .copied()
            .ok_or(TransferError::PieceOutOfRange(piece))?;
        let actual = Hash::of(data);
        let picker = self.picker.as_mut().ok_or(TransferError::NoPicker)?;
        if actual == expected {
            picker.we_have(piece)?;
            self.maybe_complete();
            Ok(Ok(()))
        } else {
            picker.we_dont_have(piece)?;
            Ok(Err(PieceMismatch { piece }))
        }
    }

    fn maybe_complete(&mut self) {
        let Some(picker) = &self.picker else { return };
        let all_have = (0..picker.num_pieces()).all(|p| picker.have_piece(p));
        if !all_have {
            return;
        }
        self.state = TransferState::Seeding;
        self.picker = None;
        tracing::info!("transfer {} complete, now seeding", self.transfer_hash());
    }

    /// Pause: caller is responsible for disconnecting peers with
    /// `transfer_paused` and flushing storage first.
    ///
    /// # Errors
    /// Returns [`TransferError::InvalidTransition`] if already paused.
    pub fn pause(&mut self) -> Result<()> {
        if self.state == TransferState::Paused {
            return Err(TransferError::InvalidTransition {
                from: "paused",
                to: "paused",
            });
        }
        self.resumed_from = Some(self.state);
        self.state = TransferState::Paused;
        Ok(())
    }

    /// Resume: re-enters whichever state preceded the pause.
    ///
    /// # Errors
    /// Returns [`TransferError::InvalidTransition`] if not currently paused.
    pub fn resume(&mut self) -> Result<()> {
        let prior = self.resumed_from.take().ok_or(TransferError::InvalidTransition {
            from: "not paused",
            to: "resumed",
        })?;
        self.state = prior;
        Ok(())
    }

    /// Serialize current progress into a bencodable resume blob (spec
    /// §4.6 "Resume data").
    #[must_use]
    pub fn save_resume_data(&self) -> ResumeData {
        let mut data = ResumeData::default_for(self.hash_set.file_hash);
        data.hashset_values = self.hash_set.pieces.clone();
        data.total_uploaded = self.total_uploaded;
        data.total_downloaded = self.total_downloaded;
        data.seed_mode = self.state == TransferState::Seeding;
        data.paused = self.state == TransferState::Paused;
        if let Some(picker) = &self.picker {
            data.pieces = (0..picker.num_pieces())
                .map(|p| u8::from(picker.have_piece(p)))
                .collect();
        }
        data
    }

    /// Total bytes uploaded so far on this transfer.
    #[must_use]
    pub fn total_uploaded(&self) -> u64 {
        self.total_uploaded
    }

    /// Total bytes downloaded so far on this transfer.
    #[must_use]
    pub fn total_downloaded(&self) -> u64 {
        self.total_downloaded
    }

    /// Account for `n` bytes newly uploaded.
    pub fn add_uploaded(&mut self, n: u64) {
        self.total_uploaded += n;
    }

    /// Account for `n` bytes newly downloaded.
    pub fn add_downloaded(&mut self, n: u64) {
        self.total_downloaded += n;
    }

    /// File size in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    fn require(&self, expected: TransferState, to: TransferState) -> Result<()> {
        if self.state != expected {
            return Err(TransferError::InvalidTransition {
                from: state_name(self.state),
                to: state_name(to),
            });
        }
        Ok(())
    }
}

fn state_name(s: TransferState) -> &'static str {
    match s {
        TransferState::QueuedForChecking => "queued_for_checking",
        TransferState::CheckingResumeData => "checking_resume_data",
        TransferState::CheckingFiles => "checking_files",
        TransferState::Downloading => "downloading",
        TransferState::Finished => "finished",
        TransferState::Seeding => "seeding",
        TransferState::Paused => "paused",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_hash_set() -> (HashSet, u64) {
        let file_size = ed2k_core::hash::BLOCK_SIZE * 2;
        let data0 = vec![b'a'; ed2k_core::hash::BLOCK_SIZE as usize];
        let mut data1 = vec![b'b'; ed2k_core::hash::BLOCK_SIZE as usize];
        data1.extend_from_slice(&[]);
        let whole = [data0.clone(), data1.clone()].concat();
        let hs = ed2k_core::hash::hash_bytes(&whole).unwrap();
        (hs, file_size)
    }

    #[test]
    fn fresh_transfer_starts_queued() {
        let (hs, size) = small_hash_set();
        let t = Transfer::new(hs, size);
        assert_eq!(t.state(), TransferState::QueuedForChecking);
        assert!(t.has_picker());
    }

    #[test]
    fn no_resume_data_routes_through_checking_files() {
        let (hs, size) = small_hash_set();
        let mut t = Transfer::new(hs, size);
        t.enter_checking_resume_data(None).unwrap();
        assert_eq!(t.state(), TransferState::Downloading);
    }

    #[test]
    fn verifying_every_piece_transitions_to_seeding() {
        let file_size = ed2k_core::hash::PIECE_SIZE - 1;
        let data = vec![b'z'; file_size as usize];
        let hs = ed2k_core::hash::hash_bytes(&data).unwrap();
        let mut t = Transfer::new(hs, file_size);
        t.enter_checking_resume_data(None).unwrap();
        let outcome = t.verify_piece(0, &data).unwrap();
        assert!(outcome.is_ok());
        assert_eq!(t.state(), TransferState::Seeding);
        assert!(!t.has_picker());
    }

    #[test]
    fn mismatched_piece_reopens_it() {
        let file_size = ed2k_core::hash::PIECE_SIZE - 1;
        let data = vec![b'z'; file_size as usize];
        let hs = ed2k_core::hash::hash_bytes(&data).unwrap();
        let mut t = Transfer::new(hs, file_size);
        t.enter_checking_resume_data(None).unwrap();
        let wrong = vec![b'q'; file_size as usize];
        let outcome = t.verify_piece(0, &wrong).unwrap();
        assert_eq!(outcome, Err(PieceMismatch { piece: 0 }));
        assert!(!t.picker_mut().unwrap().have_piece(0));
    }

    #[test]
    fn pause_then_resume_restores_prior_state() {
        let (hs, size) = small_hash_set();
        let mut t = Transfer::new(hs, size);
        t.enter_checking_resume_data(None).unwrap();
        assert_eq!(t.state(), TransferState::Downloading);
        t.pause().unwrap();
        assert_eq!(t.state(), TransferState::Paused);
        t.resume().unwrap();
        assert_eq!(t.state(), TransferState::Downloading);
    }

    #[test]
    fn resume_data_with_mismatched_hash_is_rejected() {
        let (hs, size) = small_hash_set();
        let mut t = Transfer::new(hs, size);
        let bogus = ResumeData::default_for(Hash::of(b"not this transfer"));
        let err = t.enter_checking_resume_data(Some(&bogus)).unwrap_err();
        assert!(matches!(err, TransferError::ResumeRejected(_)));
        assert_eq!(t.state(), TransferState::CheckingFiles);
    }

    #[test]
    fn fresh_transfer_has_empty_policy() {
        let (hs, size) = small_hash_set();
        let mut t = Transfer::new(hs, size);
        assert!(t.policy().is_empty());
        let endpoint = std::net::SocketAddr::from(([127, 0, 0, 1], 4662));
        t.policy_mut().add_peer(endpoint, 0, 100);
        assert_eq!(t.policy().len(), 1);
    }

    #[test]
    fn save_resume_data_reflects_have_pieces() {
        let file_size = ed2k_core::hash::PIECE_SIZE - 1;
        let data = vec![b'z'; file_size as usize];
        let hs = ed2k_core::hash::hash_bytes(&data).unwrap();
        let mut t = Transfer::new(hs, file_size);
        t.enter_checking_resume_data(None).unwrap();
        t.verify_piece(0, &data).unwrap();
        let resume = t.save_resume_data();
        assert_eq!(resume.transfer_hash, t.transfer_hash());
    }
}
