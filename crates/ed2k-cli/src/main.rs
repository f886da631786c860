//! Interactive ed2k client.
//!
//! Grounded on `original_source/test/conn/conn.cpp`'s sample client: a
//! single positional-argument startup (`server_host server_port
//! incoming_dir`) followed by a colon-delimited command REPL read from
//! stdin (`command:argument`).

mod config;
mod progress;

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ed2k_core::frame::{Packet, Protocol};
use ed2k_core::hash::Hash;
use ed2k_core::opcode::server as opcodes;
use ed2k_core::tag::{names, Tag, TagList, TagValue};
use ed2k_files::{KnownFileCollection, KnownFileEntry, ResumeData};
use ed2k_net::server::{decode_found_sources, FoundSources, IdChange, ServerConnection, ShareEntry};
use ed2k_net::search::Node;
use ed2k_transfer::Transfer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use config::SessionSettings;

/// Connects to an ed2k index server and drives an interactive session.
#[derive(Parser)]
#[command(name = "ed2k", author, version, about, long_about = None)]
struct Cli {
    /// Index server hostname or address.
    server_host: String,
    /// Index server TCP port.
    server_port: u16,
    /// Directory new downloads and shared files live in.
    incoming_dir: PathBuf,
    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,
}

/// A locally shared file: its hash set, tags, and disk path.
struct SharedFile {
    hash: Hash,
    size: u64,
    tags: TagList,
}

/// Live connection to the index server: outgoing-frame channel plus the
/// protocol state machine guarding what may be sent.
struct ServerHandle {
    conn: Arc<Mutex<ServerConnection>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// All REPL-visible state for one session.
struct App {
    settings: SessionSettings,
    client_hash: Hash,
    server: Option<ServerHandle>,
    known: KnownFileCollection,
    shares: HashMap<Hash, SharedFile>,
    transfers: HashMap<Hash, Transfer>,
    found_sources_tx: mpsc::UnboundedSender<FoundSources>,
    found_sources_rx: mpsc::UnboundedReceiver<FoundSources>,
}

impl App {
    fn new(settings: SessionSettings) -> Self {
        let (found_sources_tx, found_sources_rx) = mpsc::unbounded_channel();
        Self {
            client_hash: Hash::of(settings.client_name.as_bytes()),
            settings,
            server: None,
            known: KnownFileCollection::new(),
            shares: HashMap::new(),
            transfers: HashMap::new(),
            found_sources_tx,
            found_sources_rx,
        }
    }

    /// Record sources the index server reported for a transfer (spec §4.6
    /// "Policy... maintains the peer list"), feeding them into that
    /// transfer's policy under the configured cap. Sources for a hash we
    /// aren't currently transferring are dropped; we only track peers for
    /// transfers the user has actually loaded.
    fn record_found_sources(&mut self, found: FoundSources) {
        let Some(transfer) = self.transfers.get_mut(&found.hash) else {
            return;
        };
        let max_peerlist_size = self.settings.max_peerlist_size;
        let mut added = 0;
        for (id, port) in found.sources {
            let endpoint = SocketAddr::from((Ipv4Addr::from(id.to_le_bytes()), port));
            if transfer.policy_mut().add_peer(endpoint, 0, max_peerlist_size).is_some() {
                added += 1;
            }
        }
        info!(hash = %found.hash, added, "recorded found sources");
    }

    async fn connect(&mut self) {
        if self.server.is_some() {
            warn!("already connected, disconnect first");
            return;
        }
        let addr = format!("{}:{}", self.settings.server_host, self.settings.server_port);
        let stream = match TcpStream::connect(&addr).await {
            Ok(s) => s,
            Err(e) => {
                error!(%addr, error = %e, "failed to connect to server");
                return;
            }
        };
        info!(%addr, "connected to server");

        let conn = Arc::new(Mutex::new(ServerConnection::new()));
        conn.lock().await.on_resolved();

        let (mut read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write_half.write_all(&frame).await {
                    error!(error = %e, "server write failed");
                    break;
                }
            }
        });

        let reader_conn = conn.clone();
        let found_sources_tx = self.found_sources_tx.clone();
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                use tokio::io::AsyncReadExt;
                let n = match read_half.read(&mut chunk).await {
                    Ok(0) => {
                        info!("server closed connection");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        error!(error = %e, "server read failed");
                        break;
                    }
                };
                buf.extend_from_slice(&chunk[..n]);

                loop {
                    match Packet::parse(&buf, ed2k_core::DEFAULT_MAX_PACKET_SIZE) {
                        Ok((packet, consumed)) => {
                            dispatch_server_packet(&reader_conn, &found_sources_tx, packet.opcode, &packet.body).await;
                            buf.drain(..consumed);
                        }
                        Err(ed2k_core::error::ProtocolError::TooShort { .. }) => break,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed server frame");
                            buf.clear();
                            break;
                        }
                    }
                }
            }
        });

        let tags = TagList(vec![
            Tag::with_id(names::CT_NAME, TagValue::Str(self.settings.client_name.clone())),
            Tag::with_id(names::CT_VERSION, TagValue::U32(1)),
        ]);
        let body = conn
            .lock()
            .await
            .build_login_request(self.client_hash, self.settings.listen_port, &tags);
        let frame = ServerConnection::frame(opcodes::LOGIN_REQUEST, &body);
        let _ = tx.send(frame);

        self.server = Some(ServerHandle { conn, outbound: tx });
    }

    fn disconnect(&mut self) {
        if self.server.take().is_some() {
            info!("disconnected from server");
        } else {
            warn!("not connected");
        }
    }

    async fn search(&mut self, query: &str) {
        let Some(handle) = &self.server else {
            warn!("not connected");
            return;
        };
        let Some(expr) = parse_query(query) else {
            warn!(query, "empty search query");
            return;
        };
        let mut conn = handle.conn.lock().await;
        match conn.build_search_request(&expr) {
            Ok(body) => {
                let frame = ServerConnection::frame(opcodes::SEARCH_REQUEST, &body);
                let _ = handle.outbound.send(frame);
                info!(query, "search sent");
            }
            Err(e) => error!(error = %e, "failed to build search request"),
        }
    }

    async fn share(&mut self, path: &str) {
        let path = PathBuf::from(path);
        let data = match tokio::fs::read(&path).await {
            Ok(d) => d,
            Err(e) => {
                error!(?path, error = %e, "failed to read file to share");
                return;
            }
        };
        let hash_set = match ed2k_core::hash::hash_bytes(&data) {
            Ok(hs) => hs,
            Err(e) => {
                error!(?path, error = %e, "failed to hash file");
                return;
            }
        };
        let size = data.len() as u64;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        let tags = TagList(vec![
            Tag::with_id(names::FT_FILENAME, TagValue::Str(name.clone())),
            Tag::with_id(names::FT_FILESIZE, TagValue::U32(size as u32)),
        ]);

        self.known.upsert(KnownFileEntry {
            last_changed: epoch_secs(),
            file_hash: hash_set.file_hash,
            hash_list: hash_set.pieces.clone(),
            tag_list: tags.clone(),
        });
        self.shares.insert(
            hash_set.file_hash,
            SharedFile {
                hash: hash_set.file_hash,
                size,
                tags,
            },
        );
        info!(%hash_set.file_hash, %name, size, "now sharing");

        if let Some(handle) = &self.server {
            let point = self.announce_point();
            let entry = ShareEntry {
                hash: hash_set.file_hash,
                point,
                tags: self.shares[&hash_set.file_hash].tags.clone(),
            };
            let mut conn = handle.conn.lock().await;
            match conn.build_offer_files(std::slice::from_ref(&entry)) {
                Ok(body) => {
                    let frame = ServerConnection::frame(opcodes::OFFER_FILES, &body);
                    let _ = handle.outbound.send(frame);
                }
                Err(e) => warn!(error = %e, "could not announce share yet"),
            }
        }
    }

    fn announce_point(&self) -> (u32, u16) {
        match self.server.as_ref() {
            Some(_) => (0, self.settings.listen_port),
            None => ed2k_net::server::SENTINEL_INCOMPLETE,
        }
    }

    fn remove(&mut self, hash_hex: &str) {
        match hash_hex.parse::<Hash>() {
            Ok(hash) => {
                if self.shares.remove(&hash).is_some() {
                    info!(%hash, "removed from shares");
                } else {
                    warn!(%hash, "not currently shared");
                }
            }
            Err(e) => error!(error = %e, "invalid hash"),
        }
    }

    fn dump(&self) {
        println!("client hash: {}", self.client_hash);
        println!("connected: {}", self.server.is_some());
        println!("shares ({}):", self.shares.len());
        for share in self.shares.values() {
            println!("  {} ({} bytes)", share.hash, share.size);
        }
        println!("transfers ({}):", self.transfers.len());
        for (hash, transfer) in &self.transfers {
            println!("  {} state={:?} downloaded={}", hash, transfer.state(), transfer.total_downloaded());
        }
    }

    fn tr(&self) {
        for (hash, transfer) in &self.transfers {
            let pct = if transfer.file_size() == 0 {
                0.0
            } else {
                100.0 * transfer.total_downloaded() as f64 / transfer.file_size() as f64
            };
            println!(
                "{} [{:?}] {} / {} ({:.1}%)",
                hash,
                transfer.state(),
                progress::format_bytes(transfer.total_downloaded()),
                progress::format_bytes(transfer.file_size()),
                pct
            );
        }
    }

    async fn save(&self) {
        for (hash, transfer) in &self.transfers {
            let resume = transfer.save_resume_data();
            match resume.encode() {
                Ok(blob) => {
                    let path = self.resume_path(*hash);
                    if let Err(e) = tokio::fs::write(&path, blob).await {
                        error!(?path, error = %e, "failed to write resume data");
                    }
                }
                Err(e) => error!(error = %e, "failed to encode resume data"),
            }
        }
        info!(count = self.transfers.len(), "saved resume data");
    }

    async fn restore(&mut self) {
        let mut dir = match tokio::fs::read_dir(&self.settings.incoming_dir).await {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "failed to read incoming directory");
                return;
            }
        };
        let mut restored = 0;
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("resume") {
                continue;
            }
            let Ok(blob) = tokio::fs::read(&path).await else {
                continue;
            };
            match ResumeData::decode(&blob) {
                Ok(resume) => {
                    let hash_set = ed2k_core::hash::HashSet {
                        pieces: resume.hashset_values.clone(),
                        file_hash: resume.transfer_hash,
                    };
                    let size: u64 = resume.pieces.len() as u64 * ed2k_core::hash::PIECE_SIZE;
                    let mut transfer = Transfer::new(hash_set, size);
                    let _ = transfer.enter_checking_resume_data(Some(&resume));
                    self.transfers.insert(resume.transfer_hash, transfer);
                    restored += 1;
                }
                Err(e) => warn!(?path, error = %e, "skipping unreadable resume file"),
            }
        }
        info!(restored, "restored transfers from resume data");
    }

    fn load(&mut self, hash_hex: &str) {
        let Ok(hash) = hash_hex.parse::<Hash>() else {
            error!(hash_hex, "invalid hash");
            return;
        };
        if self.transfers.contains_key(&hash) {
            warn!(%hash, "transfer already loaded");
            return;
        }
        warn!(%hash, "no sources known yet, use search/connect first");
    }

    fn resume_path(&self, hash: Hash) -> PathBuf {
        self.settings.incoming_dir.join(format!("{hash}.resume"))
    }

    async fn listen(&mut self, port: u16) {
        let addr = format!("0.0.0.0:{port}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!(%addr, "listening for incoming peer connections");
                tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((_stream, remote)) => info!(%remote, "peer connection accepted"),
                            Err(e) => {
                                error!(error = %e, "accept failed");
                                break;
                            }
                        }
                    }
                });
            }
            Err(e) => error!(%addr, error = %e, "failed to bind listener"),
        }
    }
}

async fn dispatch_server_packet(
    conn: &Arc<Mutex<ServerConnection>>,
    found_sources_tx: &mpsc::UnboundedSender<FoundSources>,
    opcode: u8,
    body: &[u8],
) {
    match opcode {
        opcodes::ID_CHANGE => match conn.lock().await.on_id_change(body) {
            Ok(IdChange { client_id, .. }) => info!(client_id, "assigned client id"),
            Err(e) => error!(error = %e, "failed to process id_change"),
        },
        opcodes::REJECT => {
            let err = conn.lock().await.on_reject();
            error!(error = %err, "server rejected login");
        }
        opcodes::SERVER_MESSAGE => {
            if let Ok(text) = std::str::from_utf8(body) {
                info!(message = text, "server message");
            }
        }
        opcodes::SEARCH_RESULT => {
            info!(bytes = body.len(), "search results received");
        }
        opcodes::FOUND_SOURCES => match decode_found_sources(body) {
            Ok(found) => {
                info!(hash = %found.hash, count = found.sources.len(), "sources found");
                let _ = found_sources_tx.send(found);
            }
            Err(e) => warn!(error = %e, "malformed found_sources body"),
        },
        other => {
            info!(opcode = other, bytes = body.len(), "unhandled server opcode");
        }
    }
}

/// Builds a search tree from a plain-text query: every whitespace-separated
/// term is AND'ed together, matching the sample client's default search
/// behavior (`original_source/test/conn/conn.cpp`'s `cc_simplesearch`).
fn parse_query(query: &str) -> Option<Node> {
    let mut terms = query.split_whitespace().map(|t| Node::Str(t.to_string()));
    let first = terms.next()?;
    Some(terms.fold(first, |acc, term| Node::and(acc, term)))
}

fn epoch_secs() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level))
        .init();

    let settings = SessionSettings::from_args(cli.server_host, cli.server_port, cli.incoming_dir.clone());
    tokio::fs::create_dir_all(&cli.incoming_dir).await.ok();

    let mut app = App::new(settings);
    info!("ed2k client ready; type a command (search/load/save/restore/share/remove/dump/connect/disconnect/listen/tr)");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        tokio::select! {
            found = app.found_sources_rx.recv() => {
                match found {
                    Some(found) => app.record_found_sources(found),
                    None => continue,
                }
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" || line == "exit" {
                    break;
                }
                let (cmd, arg) = line.split_once(':').unwrap_or((line, ""));
                match cmd {
                    "connect" => app.connect().await,
                    "disconnect" => app.disconnect(),
                    "search" | "simplesearch" => app.search(arg).await,
                    "share" => app.share(arg).await,
                    "remove" => app.remove(arg),
                    "dump" => app.dump(),
                    "tr" => app.tr(),
                    "save" => app.save().await,
                    "restore" => app.restore().await,
                    "load" => app.load(arg),
                    "listen" => {
                        let port = arg.parse().unwrap_or(app.settings.listen_port);
                        app.listen(port).await;
                    }
                    other => {
                        warn!(command = other, "unrecognized command");
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_app() -> App {
        App::new(SessionSettings::from_args(
            "server.example".into(),
            4661,
            "/tmp/ed2k-test".into(),
        ))
    }

    #[test]
    fn record_found_sources_adds_peers_to_matching_transfer() {
        let mut app = test_app();
        let hash_set = ed2k_core::hash::HashSet {
            pieces: vec![Hash::of(b"piece")],
            file_hash: Hash::of(b"file"),
        };
        let hash = hash_set.file_hash;
        app.transfers.insert(hash, Transfer::new(hash_set, 1000));

        app.record_found_sources(FoundSources {
            hash,
            sources: vec![(0x0A00_0001, 4662), (0x0A00_0002, 4663)],
        });

        assert_eq!(app.transfers[&hash].policy().len(), 2);
    }

    #[test]
    fn record_found_sources_ignores_unknown_transfer() {
        let mut app = test_app();
        app.record_found_sources(FoundSources {
            hash: Hash::of(b"nobody loads this"),
            sources: vec![(1, 2)],
        });
        assert!(app.transfers.is_empty());
    }
}
