//! Wire opcodes (spec §6 "External interfaces").
//!
//! Each opcode is tagged with the protocol byte pair it is dispatched under
//! in the real client; non-exhaustive but covers every message named in the
//! spec. Bytes are given for bit-exactness and must not be renumbered.

/// Client↔Server (index server) TCP opcodes, sent/received under [`crate::frame::Protocol::Ed2k`].
pub mod server {
    /// Login to the server
    pub const LOGIN_REQUEST: u8 = 0x01;
    /// Server rejected the connection
    pub const REJECT: u8 = 0x05;
    /// Request the server's peer-server list (also used as keep-alive)
    pub const GET_SERVER_LIST: u8 = 0x14;
    /// Announce locally shared files
    pub const OFFER_FILES: u8 = 0x15;
    /// Search for files by expression
    pub const SEARCH_REQUEST: u8 = 0x16;
    /// Request sources for a file hash
    pub const GET_SOURCES: u8 = 0x19;
    /// Request a callback (NAT traversal assist)
    pub const CALLBACK_REQUEST: u8 = 0x1C;
    /// Request more search results for the prior query
    pub const QUERY_MORE_RESULT: u8 = 0x21;
    /// Server peer-server list response
    pub const SERVER_LIST: u8 = 0x32;
    /// Search results
    pub const SEARCH_RESULT: u8 = 0x33;
    /// Server status update
    pub const SERVER_STATUS: u8 = 0x34;
    /// Server-initiated callback request
    pub const CALLBACK_REQUESTED: u8 = 0x35;
    /// Server MOTD/message
    pub const SERVER_MESSAGE: u8 = 0x38;
    /// Login response: assigned client id
    pub const ID_CHANGE: u8 = 0x40;
    /// Server identity/capability announcement
    pub const SERVER_IDENT: u8 = 0x41;
    /// Sources found for a prior `GetSources`
    pub const FOUND_SOURCES: u8 = 0x42;
}

/// Client↔Client TCP opcodes.
///
/// Spec §4.5 names its handshake/attachment messages generically
/// (`file_request`, `file_answer`, `no_file`, `filestatus_request`,
/// `file_status`). These map onto the concrete opcodes below as follows:
/// `file_request(hash)` is sent as [`SET_REQ_FILE_ID`]; the responder
/// answers with [`FILE_STATUS`] (accepted) or [`FILE_REQ_ANS_NO_FILE`]
/// (`no_file`); the display name is fetched separately via
/// [`REQUEST_FILENAME`]/[`REQ_FILENAME_ANSWER`], together forming the
/// `file_answer(hash, filename)` spec describes.
pub mod peer {
    /// Handshake initiation
    pub const HELLO: u8 = 0x01;
    /// Block data delivery
    pub const SENDING_PART: u8 = 0x46;
    /// Request up to three byte ranges
    pub const REQUEST_PARTS: u8 = 0x47;
    /// Responder has no such file
    pub const FILE_REQ_ANS_NO_FILE: u8 = 0x48;
    /// Handshake reply
    pub const HELLO_ANSWER: u8 = 0x4C;
    /// Chat message
    pub const MESSAGE: u8 = 0x4E;
    /// Set the file hash this connection operates on
    pub const SET_REQ_FILE_ID: u8 = 0x4F;
    /// Piece bitfield for the requested file
    pub const FILE_STATUS: u8 = 0x50;
    /// Request a file's piece hash set
    pub const HASH_SET_REQUEST: u8 = 0x51;
    /// Piece hash set response
    pub const HASH_SET_ANSWER: u8 = 0x52;
    /// Request permission to start uploading
    pub const START_UPLOAD_REQ: u8 = 0x54;
    /// Upload slot granted
    pub const ACCEPT_UPLOAD_REQ: u8 = 0x55;
    /// Cancel an in-progress transfer
    pub const CANCEL_TRANSFER: u8 = 0x56;
    /// Requester has exhausted its queue of requestable parts
    pub const OUT_OF_PART_REQS: u8 = 0x57;
    /// Request a file's display name
    pub const REQUEST_FILENAME: u8 = 0x58;
    /// Response to `RequestFilename`
    pub const REQ_FILENAME_ANSWER: u8 = 0x59;
    /// Advertise upload queue position
    pub const QUEUE_RANK: u8 = 0x5C;
}

/// eMule-protocol (0xC5) 64-bit-offset variants of the client↔client messages,
/// used when the negotiated misc-options enable large-file support.
pub mod peer_emule {
    /// `sending_part` with 64-bit offsets
    pub const SENDING_PART_I64: u8 = 0xA2;
    /// `request_parts` with 64-bit offsets
    pub const REQUEST_PARTS_I64: u8 = 0xA3;
    /// `compressed_part` with 64-bit offsets
    pub const COMPRESSED_PART_I64: u8 = 0xA1;
    /// `compressed_part` with 32-bit offsets
    pub const COMPRESSED_PART: u8 = 0x40;
    /// Upload queue ranking (eMule variant)
    pub const QUEUE_RANKING: u8 = 0x60;
}
