//! Peer connection state machine (spec §4.5).
//!
//! Grounded on the teacher's `node/session.rs` connection lifecycle and
//! `node/transfer_manager.rs`'s progress bookkeeping, generalized to the
//! ed2k handshake/attachment/pipelined-transfer sequence. Upload-slot
//! gating is grounded on
//! `original_source/libed2k/src/peer_connection.cpp`'s
//! `write_start_upload`/`write_accept_upload` sequence (see
//! [`crate::upload_queue::UploadSlotQueue`] for the session-wide slot
//! accounting this connection's [`UploadSlotState`] reflects).

use std::collections::VecDeque;

use ed2k_core::hash::Hash;
use ed2k_transfer::picker::BlockId;

use crate::error::{DisconnectReason, PeerError, Result};
use crate::miscoptions::{MiscOptions1, MiscOptions2};

/// How this connection came to exist (spec §4.5 "Lifetime").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// We dialed out to a known endpoint for a specific transfer.
    Local,
    /// We accepted a socket and are waiting for hash-identified attachment.
    Remote,
}

/// Connection lifecycle states (spec §4.5 "State machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Half-open throttle slot reserved, outgoing TCP connect in flight.
    Connecting,
    /// Local `hello` sent, awaiting `hello_answer`.
    HelloSent,
    /// Handshake payloads exchanged in both directions.
    HelloAck,
    /// `SET_REQ_FILE_ID` sent, awaiting `file_status`/`no_file`.
    FileReq,
    /// Responder confirmed it has the file.
    FileOk,
    /// Remote's piece bitfield received.
    StatusOk,
    /// Steady state: pipelined requests/uploads in progress.
    Active,
    /// Tearing down; outstanding blocks are being returned to the picker.
    Disconnecting,
    /// Fully closed.
    Closed,
}

/// A block reserved in the picker but not yet sent on the wire (spec §4.5
/// `m_request_queue`).
pub type RequestQueueEntry = BlockId;

/// A block wire-requested and awaiting bytes, with its remaining byte range
/// (spec §4.5 `m_download_queue`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadQueueEntry {
    /// Which block this is.
    pub block: BlockId,
    /// Bytes not yet received, as an absolute file range.
    pub remaining: (u64, u64),
}

/// Default starting size of [`PeerConnection::desired_queue_size`]; grows
/// with measured download rate.
const INITIAL_DESIRED_QUEUE_SIZE: usize = 8;
/// Upper bound on `desired_queue_size` regardless of measured rate.
const MAX_DESIRED_QUEUE_SIZE: usize = 128;

/// This connection's standing in our upload queue (spec §4.5 "Upload
/// side"). Gates whether `request_parts` from this remote are serviced or
/// just queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadSlotState {
    /// No `start_upload` exchanged yet.
    #[default]
    Idle,
    /// Queued for a slot; `request_parts` received so far are held, not serviced.
    Queued,
    /// Holds an active upload slot; requests are serviced.
    Granted,
}

/// One peer connection: handshake/attachment state, pipelined request and
/// download queues, and upload-side bookkeeping.
#[derive(Debug)]
pub struct PeerConnection {
    origin: Origin,
    state: PeerState,
    file_hash: Option<Hash>,
    remote_client_hash: Option<Hash>,
    misc_options1: MiscOptions1,
    misc_options2: MiscOptions2,
    remote_misc_options1: Option<MiscOptions1>,
    remote_misc_options2: Option<MiscOptions2>,
    request_queue: VecDeque<RequestQueueEntry>,
    download_queue: VecDeque<DownloadQueueEntry>,
    desired_queue_size: usize,
    fail_count: u32,
    upload_requests: VecDeque<(Hash, Vec<(u64, u64)>)>,
    upload_slot_state: UploadSlotState,
}

impl PeerConnection {
    /// A connection we are dialing out for `file_hash` (spec §4.5 "local
    /// construction").
    #[must_use]
    pub fn new_local(file_hash: Hash) -> Self {
        Self {
            origin: Origin::Local,
            state: PeerState::Connecting,
            file_hash: Some(file_hash),
            remote_client_hash: None,
            misc_options1: MiscOptions1::default(),
            misc_options2: MiscOptions2::default(),
            remote_misc_options1: None,
            remote_misc_options2: None,
            request_queue: VecDeque::new(),
            download_queue: VecDeque::new(),
            desired_queue_size: INITIAL_DESIRED_QUEUE_SIZE,
            fail_count: 0,
            upload_requests: VecDeque::new(),
            upload_slot_state: UploadSlotState::Idle,
        }
    }

    /// A connection from an accepted socket, awaiting hash-identified
    /// attachment (spec §4.5 "remote construction").
    #[must_use]
    pub fn new_remote() -> Self {
        Self {
            origin: Origin::Remote,
            state: PeerState::Connecting,
            file_hash: None,
            remote_client_hash: None,
            misc_options1: MiscOptions1::default(),
            misc_options2: MiscOptions2::default(),
            remote_misc_options1: None,
            remote_misc_options2: None,
            request_queue: VecDeque::new(),
            download_queue: VecDeque::new(),
            desired_queue_size: INITIAL_DESIRED_QUEUE_SIZE,
            fail_count: 0,
            upload_requests: VecDeque::new(),
            upload_slot_state: UploadSlotState::Idle,
        }
    }

    /// How this connection originated.
    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// The file hash this connection operates on, once known.
    #[must_use]
    pub fn file_hash(&self) -> Option<Hash> {
        self.file_hash
    }

    /// Number of consecutive failures recorded against this peer.
    #[must_use]
    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    /// Advertise our own misc-options for the handshake.
    pub fn set_local_misc_options(&mut self, opts1: MiscOptions1, opts2: MiscOptions2) {
        self.misc_options1 = opts1;
        self.misc_options2 = opts2;
    }

    /// Local `hello` was just sent: `connecting → hello_sent`.
    ///
    /// # Errors
    /// Returns [`PeerError::InvalidState`] outside `connecting`.
    pub fn on_hello_sent(&mut self) -> Result<()> {
        self.transition(PeerState::Connecting, PeerState::HelloSent)
    }

    /// Both directions have exchanged hello payloads: `hello_sent →
    /// hello_ack` (local initiator), or direct entry for a remote acceptor
    /// that has both received and replied to hello.
    ///
    /// # Errors
    /// Returns [`PeerError::InvalidState`] outside `hello_sent`/`connecting`.
    pub fn on_handshake_complete(&mut self, remote_client_hash: Hash) -> Result<()> {
        let expected = match self.origin {
            Origin::Local => PeerState::HelloSent,
            Origin::Remote => PeerState::Connecting,
        };
        self.transition(expected, PeerState::HelloAck)?;
        self.remote_client_hash = Some(remote_client_hash);
        Ok(())
    }

    /// `SET_REQ_FILE_ID` was sent: `hello_ack → file_req`.
    ///
    /// # Errors
    /// Returns [`PeerError::InvalidState`] outside `hello_ack`.
    pub fn on_file_request_sent(&mut self, file_hash: Hash) -> Result<()> {
        self.transition(PeerState::HelloAck, PeerState::FileReq)?;
        self.file_hash = Some(file_hash);
        Ok(())
    }

    /// Responder confirmed the file: `file_req → file_ok`.
    ///
    /// # Errors
    /// Returns [`PeerError::InvalidState`] outside `file_req`.
    pub fn on_file_ok(&mut self) -> Result<()> {
        self.transition(PeerState::FileReq, PeerState::FileOk)
    }

    /// Responder doesn't have the file: `file_req → disconnecting` with
    /// [`DisconnectReason::FileUnknown`].
    ///
    /// # Errors
    /// Returns [`PeerError::InvalidState`] outside `file_req`.
    pub fn on_no_file(&mut self) -> Result<()> {
        self.transition(PeerState::FileReq, PeerState::Disconnecting)?;
        Err(PeerError::Disconnected(DisconnectReason::FileUnknown))
    }

    /// Remote's piece bitfield received: `file_ok → status_ok`.
    ///
    /// # Errors
    /// Returns [`PeerError::InvalidState`] outside `file_ok`.
    pub fn on_file_status(&mut self) -> Result<()> {
        self.transition(PeerState::FileOk, PeerState::StatusOk)
    }

    /// Attachment complete, pipelining may begin: `status_ok → active`.
    ///
    /// # Errors
    /// Returns [`PeerError::InvalidState`] outside `status_ok`.
    pub fn on_active(&mut self) -> Result<()> {
        self.transition(PeerState::StatusOk, PeerState::Active)
    }

    fn transition(&mut self, expected: PeerState, to: PeerState) -> Result<()> {
        if self.state != expected {
            return Err(PeerError::InvalidState("unexpected state for this transition"));
        }
        self.state = to;
        Ok(())
    }

    /// Tear down from any state, returning outstanding blocks to the caller
    /// so they can be handed back to the picker (spec §4.5 "A disconnect
    /// while blocks are outstanding returns those blocks to the picker").
    pub fn disconnect(&mut self, reason: DisconnectReason) -> Vec<BlockId> {
        self.state = PeerState::Closed;
        if matches!(
            reason,
            DisconnectReason::Io | DisconnectReason::DecodePacketError | DisconnectReason::TimedOut
        ) {
            self.fail_count += 1;
        }
        if !reason.returns_blocks_to_picker() {
            self.request_queue.clear();
            self.download_queue.clear();
            return Vec::new();
        }
        let mut blocks: Vec<BlockId> = self.request_queue.drain(..).collect();
        blocks.extend(self.download_queue.drain(..).map(|e| e.block));
        blocks
    }

    /// Enqueue a block reserved in the picker for eventual wire request.
    pub fn queue_for_request(&mut self, block: BlockId) {
        self.request_queue.push_back(block);
    }

    /// Move up to [`ed2k_core::MAX_REQUEST_RANGES`] blocks from the request
    /// queue into the download queue, returning the `(piece, block, range)`
    /// triples to serialize into one `request_parts` message.
    pub fn drain_for_request_parts(&mut self, picker: &ed2k_transfer::Picker) -> Vec<(BlockId, (u64, u64))> {
        let mut out = Vec::new();
        while out.len() < ed2k_core::MAX_REQUEST_RANGES && self.download_queue.len() < self.desired_queue_size {
            let Some(block) = self.request_queue.pop_front() else {
                break;
            };
            let range = picker.block_range(block);
            let remaining = (range.start, range.end);
            self.download_queue.push_back(DownloadQueueEntry { block, remaining });
            out.push((block, remaining));
        }
        out
    }

    /// Record that `n` bytes of `block`'s range have arrived. Returns
    /// `true` once the full block has been received.
    #[must_use]
    pub fn record_bytes_received(&mut self, block: BlockId, n: u64) -> bool {
        if let Some(entry) = self.download_queue.iter_mut().find(|e| e.block == block) {
            entry.remaining.0 += n;
            if entry.remaining.0 >= entry.remaining.1 {
                self.download_queue.retain(|e| e.block != block);
                return true;
            }
        }
        false
    }

    /// Grow the desired pipeline depth in response to a measured download
    /// rate increase (spec §4.5 "grows with measured download rate, bounded
    /// by a max").
    pub fn grow_desired_queue_size(&mut self) {
        self.desired_queue_size = (self.desired_queue_size * 2).min(MAX_DESIRED_QUEUE_SIZE);
    }

    /// Current desired pipeline depth.
    #[must_use]
    pub fn desired_queue_size(&self) -> usize {
        self.desired_queue_size
    }

    /// Negotiated misc-options for this remote, once the handshake has
    /// delivered them.
    pub fn set_remote_misc_options(&mut self, opts1: MiscOptions1, opts2: MiscOptions2) {
        self.remote_misc_options1 = Some(opts1);
        self.remote_misc_options2 = Some(opts2);
    }

    /// `true` if both sides have negotiated 64-bit offsets (spec §4.5
    /// "for a remote without large-file support, offsets > 2^32 must never
    /// be requested").
    #[must_use]
    pub fn large_files_negotiated(&self) -> bool {
        self.remote_misc_options2.is_some_and(|o| o.supports_large_files())
    }

    /// Build a `request_parts` wire body for `hash`/`ranges`, using 64-bit
    /// offsets if this remote negotiated large-file support (spec §4.5).
    ///
    /// # Panics
    /// Panics if more than [`ed2k_core::MAX_REQUEST_RANGES`] ranges are given.
    #[must_use]
    pub fn encode_request_parts(&self, hash: Hash, ranges: &[(u64, u64)]) -> Vec<u8> {
        crate::message::RequestParts {
            hash,
            ranges: ranges.to_vec(),
        }
        .encode(self.large_files_negotiated())
    }

    /// Decode a `request_parts` body received from this remote, using
    /// whichever wire width it negotiated.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode_request_parts(&self, body: &[u8]) -> Result<crate::message::RequestParts> {
        crate::message::RequestParts::decode(body, self.large_files_negotiated())
    }

    /// Build a `sending_part` wire body, using 64-bit offsets if this
    /// remote negotiated large-file support.
    #[must_use]
    pub fn encode_sending_part<'a>(&self, hash: Hash, begin: u64, end: u64, data: &'a [u8]) -> Vec<u8> {
        crate::message::SendingPart { hash, begin, end, data }.encode(self.large_files_negotiated())
    }

    /// Decode a `sending_part` body received from this remote, using
    /// whichever wire width it negotiated.
    ///
    /// # Errors
    /// Returns [`PeerError::Io`] on truncation.
    pub fn decode_sending_part<'a>(&self, body: &'a [u8]) -> Result<crate::message::SendingPart<'a>> {
        crate::message::SendingPart::decode(body, self.large_files_negotiated())
    }

    /// This connection's standing in our upload queue.
    #[must_use]
    pub fn upload_slot_state(&self) -> UploadSlotState {
        self.upload_slot_state
    }

    /// Remote sent `start_upload`: begin queuing for a slot.
    pub fn on_start_upload_request(&mut self) {
        if self.upload_slot_state == UploadSlotState::Idle {
            self.upload_slot_state = UploadSlotState::Queued;
        }
    }

    /// An upload slot opened for this peer: `queued → granted`. Requests
    /// already held are now eligible to be serviced.
    pub fn grant_upload_slot(&mut self) {
        self.upload_slot_state = UploadSlotState::Granted;
    }

    /// The slot was taken away (disconnect, or a queue rebalance):
    /// `granted → queued`.
    pub fn revoke_upload_slot(&mut self) {
        if self.upload_slot_state == UploadSlotState::Granted {
            self.upload_slot_state = UploadSlotState::Queued;
        }
    }

    /// Record an inbound `request_parts`: `hash` plus up to three ranges.
    /// Only actually queued for servicing once a slot has been granted
    /// (spec §4.5 "Access to upload is gated by a queue ranking"); before
    /// that the request is dropped, matching the original client treating
    /// an unsolicited request from a not-yet-accepted peer as ignorable.
    pub fn queue_upload_request(&mut self, hash: Hash, ranges: Vec<(u64, u64)>) {
        if self.upload_slot_state != UploadSlotState::Granted {
            return;
        }
        self.upload_requests.push_back((hash, ranges));
    }

    /// Pop the next queued upload request, if any.
    pub fn next_upload_request(&mut self) -> Option<(Hash, Vec<(u64, u64)>)> {
        self.upload_requests.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake_to_active(conn: &mut PeerConnection, hash: Hash) {
        conn.on_hello_sent().unwrap();
        conn.on_handshake_complete(Hash::of(b"remote")).unwrap();
        conn.on_file_request_sent(hash).unwrap();
        conn.on_file_ok().unwrap();
        conn.on_file_status().unwrap();
        conn.on_active().unwrap();
    }

    #[test]
    fn local_happy_path_reaches_active() {
        let hash = Hash::of(b"file");
        let mut conn = PeerConnection::new_local(hash);
        handshake_to_active(&mut conn, hash);
        assert_eq!(conn.state(), PeerState::Active);
    }

    #[test]
    fn no_file_disconnects_with_file_unknown() {
        let hash = Hash::of(b"file");
        let mut conn = PeerConnection::new_local(hash);
        conn.on_hello_sent().unwrap();
        conn.on_handshake_complete(Hash::of(b"remote")).unwrap();
        conn.on_file_request_sent(hash).unwrap();
        let err = conn.on_no_file().unwrap_err();
        assert!(matches!(
            err,
            PeerError::Disconnected(DisconnectReason::FileUnknown)
        ));
        assert_eq!(conn.state(), PeerState::Disconnecting);
    }

    #[test]
    fn out_of_order_transition_is_rejected() {
        let hash = Hash::of(b"file");
        let mut conn = PeerConnection::new_local(hash);
        let err = conn.on_file_ok().unwrap_err();
        assert!(matches!(err, PeerError::InvalidState(_)));
    }

    #[test]
    fn disconnect_returns_outstanding_blocks_unless_closed_locally() {
        let hash = Hash::of(b"file");
        let mut conn = PeerConnection::new_local(hash);
        handshake_to_active(&mut conn, hash);
        let block = BlockId { piece: 0, block: 0 };
        conn.queue_for_request(block);
        let blocks = conn.disconnect(DisconnectReason::TimedOut);
        assert_eq!(blocks, vec![block]);
        assert_eq!(conn.fail_count(), 1);
    }

    #[test]
    fn closed_disconnect_does_not_return_blocks() {
        let hash = Hash::of(b"file");
        let mut conn = PeerConnection::new_local(hash);
        handshake_to_active(&mut conn, hash);
        conn.queue_for_request(BlockId { piece: 0, block: 0 });
        let blocks = conn.disconnect(DisconnectReason::Closed);
        assert!(blocks.is_empty());
    }

    #[test]
    fn drain_for_request_parts_caps_at_three_and_queue_size() {
        let hash = Hash::of(b"file");
        let mut conn = PeerConnection::new_local(hash);
        handshake_to_active(&mut conn, hash);
        let picker = ed2k_transfer::Picker::new(ed2k_core::hash::BLOCK_SIZE * 10);
        for i in 0..5 {
            conn.queue_for_request(BlockId { piece: 0, block: i });
        }
        let drained = conn.drain_for_request_parts(&picker);
        assert_eq!(drained.len(), 3);
        assert_eq!(conn.request_queue.len(), 2);
    }

    #[test]
    fn request_parts_use_32_bit_without_negotiation() {
        let hash = Hash::of(b"file");
        let conn = PeerConnection::new_local(hash);
        assert!(!conn.large_files_negotiated());
        let body = conn.encode_request_parts(hash, &[(0, 100)]);
        let decoded = conn.decode_request_parts(&body).unwrap();
        assert_eq!(decoded.ranges, vec![(0, 100)]);
    }

    #[test]
    fn request_parts_use_64_bit_once_negotiated() {
        let hash = Hash::of(b"file");
        let mut conn = PeerConnection::new_local(hash);
        let mut remote_opts2 = MiscOptions2::default();
        remote_opts2.set_large_files();
        conn.set_remote_misc_options(MiscOptions1::default(), remote_opts2);
        assert!(conn.large_files_negotiated());
        let big = (1u64 << 33, (1u64 << 33) + 50);
        let body = conn.encode_request_parts(hash, &[big]);
        let decoded = conn.decode_request_parts(&body).unwrap();
        assert_eq!(decoded.ranges, vec![big]);
    }

    #[test]
    fn upload_slot_gates_request_queuing() {
        let hash = Hash::of(b"file");
        let mut conn = PeerConnection::new_remote();
        conn.queue_upload_request(hash, vec![(0, 10)]);
        assert!(conn.next_upload_request().is_none());

        conn.on_start_upload_request();
        assert_eq!(conn.upload_slot_state(), UploadSlotState::Queued);
        conn.queue_upload_request(hash, vec![(0, 10)]);
        assert!(conn.next_upload_request().is_none());

        conn.grant_upload_slot();
        assert_eq!(conn.upload_slot_state(), UploadSlotState::Granted);
        conn.queue_upload_request(hash, vec![(0, 10)]);
        assert!(conn.next_upload_request().is_some());
    }

    #[test]
    fn grow_desired_queue_size_doubles_up_to_cap() {
        let mut conn = PeerConnection::new_remote();
        assert_eq!(conn.desired_queue_size(), INITIAL_DESIRED_QUEUE_SIZE);
        for _ in 0..10 {
            conn.grow_desired_queue_size();
        }
        assert_eq!(conn.desired_queue_size(), MAX_DESIRED_QUEUE_SIZE);
    }
}
