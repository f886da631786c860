//! Session settings, grounded on
//! `original_source/include/libed2k/session_settings.hpp`. Carries the
//! tunables the core crates reference by name: timeouts, rate limits,
//! half-open cap, file-pool size, and hashing thread count.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Session-wide tunables (spec §5/§6), loaded from a TOML config file with
/// field-level defaults matching the reference client where documented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Seconds of server wire inactivity before disconnecting.
    #[serde(default = "default_server_timeout")]
    pub server_timeout_secs: u64,
    /// Seconds of peer wire inactivity before disconnecting.
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout_secs: u64,
    /// Seconds to wait for an outbound connect to complete.
    #[serde(default = "default_peer_connect_timeout")]
    pub peer_connect_timeout_secs: u64,
    /// Seconds to wait for a requested block before considering it stalled.
    #[serde(default = "default_block_request_timeout")]
    pub block_request_timeout_secs: u64,

    /// Index server hostname.
    pub server_host: String,
    /// Index server TCP port.
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Local TCP port peers dial in on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Advertised client name tag.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Directory incoming files are written to.
    pub incoming_dir: PathBuf,
    /// Seconds between `server_get_list` keep-alives.
    #[serde(default = "default_keepalive")]
    pub server_keep_alive_secs: u64,
    /// Seconds to wait before reconnecting after a server-connection
    /// failure; a negative value (represented as `None`) disables retry.
    #[serde(default = "default_reconnect")]
    pub server_reconnect_secs: Option<u64>,

    /// Maximum peers tracked per transfer's policy list.
    #[serde(default = "default_max_peerlist_size")]
    pub max_peerlist_size: usize,
    /// Download rate limit in bytes/sec; `None` means unlimited.
    #[serde(default)]
    pub download_rate_limit: Option<u64>,
    /// Upload rate limit in bytes/sec; `None` means unlimited.
    #[serde(default)]
    pub upload_rate_limit: Option<u64>,

    /// Upper bound on concurrently open file descriptors for shared files.
    #[serde(default = "default_file_pool_size")]
    pub file_pool_size: usize,
    /// Bytes of pending disk-write queue before a connection's download
    /// rate is throttled.
    #[serde(default = "default_max_queued_disk_bytes")]
    pub max_queued_disk_bytes: u64,
    /// Global cap on concurrent outbound half-open connections.
    #[serde(default = "default_half_open_cap")]
    pub half_open_connection_cap: usize,
    /// Number of hashing worker threads.
    #[serde(default = "default_hashing_threads")]
    pub hashing_threads: usize,
    /// Maximum accepted wire-packet body size.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: u32,
}

fn default_server_timeout() -> u64 {
    220
}
fn default_peer_timeout() -> u64 {
    120
}
fn default_peer_connect_timeout() -> u64 {
    7
}
fn default_block_request_timeout() -> u64 {
    (ed2k_core::BLOCK_SIZE / 1024) as u64
}
fn default_server_port() -> u16 {
    4661
}
fn default_listen_port() -> u16 {
    4662
}
fn default_client_name() -> String {
    "ed2k".to_string()
}
fn default_keepalive() -> u64 {
    200
}
fn default_reconnect() -> Option<u64> {
    Some(5)
}
fn default_max_peerlist_size() -> usize {
    4000
}
fn default_file_pool_size() -> usize {
    40
}
fn default_max_queued_disk_bytes() -> u64 {
    16 * 1024 * 1024
}
fn default_half_open_cap() -> usize {
    ed2k_net::session::DEFAULT_HALF_OPEN_CAP
}
fn default_hashing_threads() -> usize {
    1
}
fn default_max_packet_size() -> u32 {
    ed2k_core::DEFAULT_MAX_PACKET_SIZE
}

impl SessionSettings {
    /// Build settings from the required positional CLI arguments, with
    /// everything else defaulted (spec §6 "expects `server_host server_port
    /// incoming_dir`").
    #[must_use]
    pub fn from_args(server_host: String, server_port: u16, incoming_dir: PathBuf) -> Self {
        Self {
            server_timeout_secs: default_server_timeout(),
            peer_timeout_secs: default_peer_timeout(),
            peer_connect_timeout_secs: default_peer_connect_timeout(),
            block_request_timeout_secs: default_block_request_timeout(),
            server_host,
            server_port,
            listen_port: default_listen_port(),
            client_name: default_client_name(),
            incoming_dir,
            server_keep_alive_secs: default_keepalive(),
            server_reconnect_secs: default_reconnect(),
            max_peerlist_size: default_max_peerlist_size(),
            download_rate_limit: None,
            upload_rate_limit: None,
            file_pool_size: default_file_pool_size(),
            max_queued_disk_bytes: default_max_queued_disk_bytes(),
            half_open_connection_cap: default_half_open_cap(),
            hashing_threads: default_hashing_threads(),
            max_packet_size: default_max_packet_size(),
        }
    }

    /// Load settings from a TOML file on disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or fails to parse.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Serialize settings to a TOML file on disk.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let text = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Default config file location under the user's config directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ed2k")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_args_fills_in_defaults() {
        let settings = SessionSettings::from_args("server.example".into(), 4661, "/tmp/incoming".into());
        assert_eq!(settings.server_port, 4661);
        assert_eq!(settings.listen_port, 4662);
        assert_eq!(settings.file_pool_size, 40);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let settings = SessionSettings::from_args("server.example".into(), 4661, "/tmp/incoming".into());
        settings.save(&path).unwrap();
        let loaded = SessionSettings::load(&path).unwrap();
        assert_eq!(loaded.server_host, settings.server_host);
        assert_eq!(loaded.server_port, settings.server_port);
    }
}
