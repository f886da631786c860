//! # ed2k-peer
//!
//! Peer-to-peer (client-to-client) connection handling: handshake,
//! attachment, misc-options negotiation, and pipelined block transfer.
//!
//! - [`error`] — [`error::PeerError`] and [`error::DisconnectReason`]
//! - [`miscoptions`] — the two misc-options bitfields exchanged in hello
//! - [`message`] — client-to-client message bodies
//! - [`connection`] — [`connection::PeerConnection`], the per-peer state
//!   machine tying handshake, attachment, and request/download queues
//!   together
//! - [`upload_queue`] — [`upload_queue::UploadSlotQueue`], the upload-side
//!   slot/wait-list gate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod error;
pub mod message;
pub mod miscoptions;
pub mod upload_queue;

pub use connection::{DownloadQueueEntry, Origin, PeerConnection, PeerState, RequestQueueEntry, UploadSlotState};
pub use error::{DisconnectReason, PeerError, Result};
pub use message::{
    AcceptUpload, CompressedPart, FileStatus, FilenameAnswer, HashSetAnswer, HashSetRequest, Hello,
    HelloAnswer, NetworkPoint, NoFile, QueueRanking, RequestFilename, RequestParts, SendingPart,
    SetReqFileId, StartUploadRequest,
};
pub use miscoptions::{MiscOptions1, MiscOptions2};
pub use upload_queue::UploadSlotQueue;
