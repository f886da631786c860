//! Index server connection (spec §4.7, component C7).
//!
//! Grounded on `original_source/src/search.cpp`'s use of
//! `search_request_entry`/`generateSearchRequest` (wired through
//! [`crate::search`]) and on the opcode table in
//! `ed2k_core::opcode::server`. The phase sequence (resolve → connect →
//! login → id_change → steady state) follows spec §4.7 literally; wire
//! encode/decode for each message mirrors the framing/tag conventions
//! established in `ed2k-peer`'s `message.rs`.

use std::time::{Duration, Instant};

use ed2k_core::frame::Protocol;
use ed2k_core::hash::Hash;
use ed2k_core::primitives::{Reader, Writer};
use ed2k_core::tag::TagList;
use tracing::{debug, info, warn};

use crate::error::{ServerError, ServerResult};

/// Default interval between `server_get_list` keep-alives when no other
/// outbound packet has been sent (spec §4.7 "Keep-alive").
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// A client id below this threshold is a "low id": the server could not
/// give this client a globally routable identifier, meaning direct
/// incoming connections from peers are not possible (spec §4.7).
pub const LOW_ID_THRESHOLD: u32 = 0x0100_0000;

/// Sentinel announce endpoint for an incomplete (partial) share when the
/// server supports compressed responses (spec §6).
pub const SENTINEL_INCOMPLETE: (u32, u16) = (0xFCFC_FCFC, 0xFCFC);
/// Sentinel announce endpoint for a complete share when the server
/// supports compressed responses (spec §6).
pub const SENTINEL_COMPLETE: (u32, u16) = (0xFBFB_FBFB, 0xFBFB);

/// `{client_id, tcp_flags, aux_port}` assigned by the server at login
/// (spec §4.7 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdChange {
    /// Assigned client id.
    pub client_id: u32,
    /// Server capability flags echoed back.
    pub tcp_flags: u32,
    /// Auxiliary TCP port, if any.
    pub aux_port: u16,
}

impl IdChange {
    /// `true` when the assigned id disables direct incoming connections.
    #[must_use]
    pub fn is_low_id(&self) -> bool {
        self.client_id < LOW_ID_THRESHOLD
    }
}

/// One endpoint carried in a `found_sources` reply: raw client id and port,
/// undecoded (spec §4.7; wire layout `<HASH 16><count 1>(<ID 4><PORT 2>)[count]`
/// per `original_source/libed2k/include/libed2k/packet_struct.hpp`'s
/// `found_file_sources`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundSources {
    /// Content hash the sources apply to.
    pub hash: Hash,
    /// `(client_id, port)` pairs as sent by the server.
    pub sources: Vec<(u32, u16)>,
}

/// Decode a `found_sources` body.
///
/// # Errors
/// Returns [`ServerError::Io`] if the body is truncated.
pub fn decode_found_sources(body: &[u8]) -> ServerResult<FoundSources> {
    let mut r = Reader::new(body);
    let hash = r.read_hash().ok_or_else(|| ServerError::Io(truncated()))?;
    let count = r.read_u8().ok_or_else(|| ServerError::Io(truncated()))?;
    let mut sources = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = r.read_u32().ok_or_else(|| ServerError::Io(truncated()))?;
        let port = r.read_u16().ok_or_else(|| ServerError::Io(truncated()))?;
        sources.push((id, port));
    }
    Ok(FoundSources { hash, sources })
}

/// Phases of the server connection lifecycle (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    /// Hostname not yet resolved.
    Resolving,
    /// TCP connect in flight.
    Connecting,
    /// `login_request` sent, awaiting `id_change`.
    LoggingIn,
    /// Logged in; steady state.
    Connected,
    /// Connection torn down.
    Disconnected,
}

/// One file entry as announced via `offer_files` (spec §4.7 "Outbound
/// operations").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEntry {
    /// Content hash.
    pub hash: Hash,
    /// Announce endpoint: either the real client id/port (high id) or one
    /// of the sentinel pairs (low id, compression-capable server).
    pub point: (u32, u16),
    /// Descriptive tags: name, size, type, media metadata.
    pub tags: TagList,
}

/// A single server connection: tracks phase, assigned id, and keep-alive
/// timing. Socket I/O is left to the caller (spec §5 "single event loop");
/// this type owns protocol state and message construction only.
#[derive(Debug)]
pub struct ServerConnection {
    phase: ServerPhase,
    id_change: Option<IdChange>,
    last_outbound: Option<Instant>,
    keepalive_interval: Duration,
}

impl Default for ServerConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConnection {
    /// A fresh, unconnected server connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: ServerPhase::Resolving,
            id_change: None,
            last_outbound: None,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ServerPhase {
        self.phase
    }

    /// The id assigned at login, once known.
    #[must_use]
    pub fn id_change(&self) -> Option<IdChange> {
        self.id_change
    }

    /// Resolution completed, TCP connect is starting: `resolving →
    /// connecting`.
    pub fn on_resolved(&mut self) {
        self.phase = ServerPhase::Connecting;
    }

    /// Resolution failed; the caller may schedule a reconnect (spec §4.7
    /// step 1).
    pub fn on_resolve_failed(&mut self, host: &str) -> ServerError {
        self.phase = ServerPhase::Disconnected;
        ServerError::Resolve(host.to_string())
    }

    /// Build the `login_request` body and mark the connection as
    /// logging-in.
    #[must_use]
    pub fn build_login_request(&mut self, client_hash: Hash, port: u16, tags: &TagList) -> Vec<u8> {
        self.phase = ServerPhase::LoggingIn;
        let mut w = Writer::new();
        w.write_hash(&client_hash);
        w.write_u32(0);
        w.write_u16(port);
        tags.write(&mut w);
        self.note_outbound();
        w.into_vec()
    }

    /// Decode an `id_change` body and transition to `connected`.
    ///
    /// # Errors
    /// Returns [`ServerError::InvalidState`] outside `logging_in`.
    pub fn on_id_change(&mut self, body: &[u8]) -> ServerResult<IdChange> {
        if self.phase != ServerPhase::LoggingIn {
            return Err(ServerError::InvalidState("id_change outside logging_in"));
        }
        let mut r = Reader::new(body);
        let client_id = r.read_u32().ok_or(ServerError::Io(truncated()))?;
        let tcp_flags = r.read_u32().unwrap_or(0);
        let aux_port = r.read_u16().unwrap_or(0);
        let id_change = IdChange {
            client_id,
            tcp_flags,
            aux_port,
        };
        self.id_change = Some(id_change);
        self.phase = ServerPhase::Connected;
        if id_change.is_low_id() {
            info!(client_id, "assigned low id, direct incoming disabled");
        } else {
            debug!(client_id, "assigned high id");
        }
        Ok(id_change)
    }

    /// The server rejected the login.
    pub fn on_reject(&mut self) -> ServerError {
        self.phase = ServerPhase::Disconnected;
        ServerError::Rejected
    }

    /// Build an `offer_files` body announcing the given shares.
    ///
    /// # Errors
    /// Returns [`ServerError::InvalidState`] outside `connected`.
    pub fn build_offer_files(&mut self, shares: &[ShareEntry]) -> ServerResult<Vec<u8>> {
        self.require_connected("offer_files")?;
        let mut w = Writer::new();
        w.write_u32(shares.len() as u32);
        for share in shares {
            w.write_hash(&share.hash);
            w.write_u32(share.point.0);
            w.write_u16(share.point.1);
            share.tags.write(&mut w);
        }
        self.note_outbound();
        Ok(w.into_vec())
    }

    /// Build a `search_request` body from a search-expression tree.
    ///
    /// # Errors
    /// Returns [`ServerError::InvalidState`] outside `connected`, or
    /// [`ServerError::Search`] if the expression is too complex to encode.
    pub fn build_search_request(&mut self, expr: &crate::search::Node) -> ServerResult<Vec<u8>> {
        self.require_connected("search_request")?;
        let body = crate::search::encode(expr)?;
        self.note_outbound();
        Ok(body)
    }

    /// Build a `get_sources(hash, size)` body.
    ///
    /// # Errors
    /// Returns [`ServerError::InvalidState`] outside `connected`.
    pub fn build_get_sources(&mut self, hash: Hash, size: u64) -> ServerResult<Vec<u8>> {
        self.require_connected("get_sources")?;
        let mut w = Writer::new();
        w.write_hash(&hash);
        ed2k_core::primitives::write_fsize_32_or_64(&mut w, size);
        self.note_outbound();
        Ok(w.into_vec())
    }

    /// Build a `server_get_list` keep-alive body (always empty).
    #[must_use]
    pub fn build_keepalive(&mut self) -> Vec<u8> {
        self.note_outbound();
        Vec::new()
    }

    /// `true` if the keep-alive interval has elapsed since the last
    /// outbound packet and a `server_get_list` should be sent (spec §4.7
    /// "Keep-alive").
    #[must_use]
    pub fn keepalive_due(&self, now: Instant) -> bool {
        match self.last_outbound {
            Some(last) => now.duration_since(last) >= self.keepalive_interval,
            None => true,
        }
    }

    fn note_outbound(&mut self) {
        self.last_outbound = Some(Instant::now());
    }

    fn require_connected(&self, op: &'static str) -> ServerResult<()> {
        if self.phase != ServerPhase::Connected {
            warn!(op, phase = ?self.phase, "server operation attempted outside connected phase");
            return Err(ServerError::InvalidState(op));
        }
        Ok(())
    }

    /// Frame a body under the given opcode for the plain `Ed2k` protocol.
    #[must_use]
    pub fn frame(opcode: u8, body: &[u8]) -> Vec<u8> {
        ed2k_core::frame::Packet::encode(Protocol::Ed2k, opcode, body)
    }
}

fn truncated() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated server message")
}

/// Opcode re-exports for callers dispatching on received server frames.
pub mod opcodes {
    pub use ed2k_core::opcode::server::*;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed2k_core::tag::{Tag, TagValue, names};

    #[test]
    fn login_then_id_change_reaches_connected() {
        let mut conn = ServerConnection::new();
        conn.on_resolved();
        let tags = TagList(vec![Tag::with_id(names::CT_NAME, TagValue::Str("me".into()))]);
        let _body = conn.build_login_request(Hash::of(b"me"), 4662, &tags);
        assert_eq!(conn.phase(), ServerPhase::LoggingIn);

        let mut w = Writer::new();
        w.write_u32(0x0000_1234);
        let id_change = conn.on_id_change(&w.into_vec()).unwrap();
        assert_eq!(conn.phase(), ServerPhase::Connected);
        assert_eq!(id_change.client_id, 0x0000_1234);
        assert!(id_change.is_low_id());
    }

    #[test]
    fn high_id_is_not_low_id() {
        let id = IdChange {
            client_id: 0x0200_0000,
            tcp_flags: 0,
            aux_port: 0,
        };
        assert!(!id.is_low_id());
    }

    #[test]
    fn operations_before_connected_are_rejected() {
        let mut conn = ServerConnection::new();
        let err = conn.build_offer_files(&[]).unwrap_err();
        assert!(matches!(err, ServerError::InvalidState(_)));
    }

    #[test]
    fn keepalive_due_when_never_sent() {
        let conn = ServerConnection::new();
        assert!(conn.keepalive_due(Instant::now()));
    }

    #[test]
    fn found_sources_decodes_id_port_pairs() {
        let hash = Hash::of(b"content");
        let mut w = Writer::new();
        w.write_hash(&hash);
        w.write_u8(2);
        w.write_u32(0x0A00_0001);
        w.write_u16(4662);
        w.write_u32(0x0A00_0002);
        w.write_u16(4663);
        let found = decode_found_sources(&w.into_vec()).unwrap();
        assert_eq!(found.hash, hash);
        assert_eq!(found.sources, vec![(0x0A00_0001, 4662), (0x0A00_0002, 4663)]);
    }

    #[test]
    fn found_sources_rejects_truncated_body() {
        let mut w = Writer::new();
        w.write_hash(&Hash::of(b"content"));
        w.write_u8(1);
        let err = decode_found_sources(&w.into_vec()).unwrap_err();
        assert!(matches!(err, ServerError::Io(_)));
    }

    #[test]
    fn resolve_failure_disconnects() {
        let mut conn = ServerConnection::new();
        let err = conn.on_resolve_failed("server.example");
        assert!(matches!(err, ServerError::Resolve(_)));
        assert_eq!(conn.phase(), ServerPhase::Disconnected);
    }
}
