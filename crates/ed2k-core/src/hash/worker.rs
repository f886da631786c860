//! Cancellable hashing worker.
//!
//! Grounded on `original_source/include/libed2k/file.hpp`'s `monitor_order`
//! (a mutex/condvar FIFO whose `popWait` throws on cancel) and `file_hasher`
//! (the thread that drains it). Re-expressed per spec §9's guidance to turn
//! "cancel by exception" into an explicit sentinel: here, a closed channel.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::hash::{HashSet, StreamingHasher};

/// One hashing job: a file to hash, optionally as part of a collection
/// (a directory share) identified by `collection_path`.
#[derive(Debug, Clone)]
pub struct HashJob {
    /// Root of the share this file was discovered under, if any.
    pub collection_path: Option<PathBuf>,
    /// The file to hash.
    pub file_path: PathBuf,
}

/// Result posted back to the session's alert queue on job completion
/// (spec §4.2: "an `add_transfer_params` record is posted back to the
/// session via the alert queue").
#[derive(Debug, Clone)]
pub struct AddTransferParams {
    /// The job that produced this result.
    pub job: HashJob,
    /// The computed hash set, or `None` if the job was cancelled or failed.
    pub hash_set: Option<HashSet>,
    /// Size of the hashed file, for convenience.
    pub file_size: u64,
}

/// A FIFO of pending hash jobs that can be cancelled mid-drain.
///
/// The queue itself is a plain `mpsc` channel; cancellation is modeled as a
/// `Cancelled` sentinel rather than the original's exception-based `popWait`,
/// per spec §9.
pub struct HashQueue {
    sender: mpsc::UnboundedSender<HashJob>,
}

/// What the worker loop observed when it asked for the next job.
pub enum NextJob {
    /// A job was dequeued.
    Job(HashJob),
    /// The queue was cancelled (sender dropped or explicit shutdown).
    Cancelled,
}

impl HashQueue {
    /// Create a queue and its paired worker receiver.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HashJob>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Enqueue a job. Returns `false` if the worker side has gone away.
    pub fn push(&self, job: HashJob) -> bool {
        self.sender.send(job).is_ok()
    }
}

/// Run the hashing worker loop: pull jobs from `receiver`, hash each file,
/// and post the result to `results`. Exits when `receiver` is closed.
///
/// Intended to run on a dedicated blocking task (`tokio::task::spawn_blocking`),
/// since piece hashing is CPU-bound synchronous I/O (spec §5: "a separate
/// hashing worker thread consumes a cancellable FIFO").
pub async fn run(
    mut receiver: mpsc::UnboundedReceiver<HashJob>,
    results: mpsc::UnboundedSender<AddTransferParams>,
) {
    info!("hashing worker started");
    while let Some(job) = receiver.recv().await {
        debug!(path = %job.file_path.display(), "hashing job received");
        let params = hash_job(job);
        if results.send(params).is_err() {
            warn!("hashing worker: result channel closed, stopping");
            break;
        }
    }
    info!("hashing worker stopped");
}

fn hash_job(job: HashJob) -> AddTransferParams {
    let metadata = std::fs::metadata(&job.file_path);
    let file_size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);

    let hash_set = (|| -> Option<HashSet> {
        if file_size == 0 {
            return None;
        }
        let file = std::fs::File::open(&job.file_path).ok()?;
        let mut hasher = StreamingHasher::new(file, file_size).ok()?;
        while !hasher.is_done() {
            hasher.hash_next_piece().ok()?;
        }
        Some(hasher.finish())
    })();

    AddTransferParams {
        job,
        hash_set,
        file_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn worker_hashes_enqueued_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![b'X'; 100]).unwrap();
        let path = tmp.path().to_path_buf();

        let (queue, receiver) = HashQueue::new();
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(run(receiver, result_tx));

        assert!(queue.push(HashJob {
            collection_path: None,
            file_path: path,
        }));
        drop(queue);

        let result = result_rx.recv().await.unwrap();
        let hs = result.hash_set.unwrap();
        assert_eq!(hs.file_hash.to_string(), "1AA8AFE3018B38D9B4D880D0683CCEB5");

        handle.await.unwrap();
    }
}
