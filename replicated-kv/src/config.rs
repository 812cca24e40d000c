//! Cluster configuration and the replica address book.
//!
//! The cluster file is JSON with two index-aligned lists, the same shape
//! every replica reads at startup:
//!
//! ```json
//! {
//!   "peers": ["127.0.0.1:7101", "127.0.0.1:7102", "127.0.0.1:7103"],
//!   "apis":  ["127.0.0.1:8101", "127.0.0.1:8102", "127.0.0.1:8103"],
//!   "replay_interval_ms": 100,
//!   "submit_timeout_ms": 5000
//! }
//! ```
//!
//! A replica's id is its position in those lists.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::consensus::ReplicaId;

fn default_replay_interval_ms() -> u64 {
    100
}

fn default_submit_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Raft transport addresses, indexed by replica id.
    pub peers: Vec<String>,
    /// Client-facing API addresses, indexed by replica id.
    pub apis: Vec<String>,
    /// How often the background worker catches the store up.
    #[serde(default = "default_replay_interval_ms")]
    pub replay_interval_ms: u64,
    /// How long a write waits for its entry to commit.
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
}

impl ClusterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read cluster file {}", path.display()))?;
        let config: ClusterConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse cluster file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid cluster file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.peers.is_empty(), "cluster requires at least one replica");
        ensure!(
            self.peers.len() == self.apis.len(),
            "peers ({}) and apis ({}) must list the same replicas",
            self.peers.len(),
            self.apis.len()
        );
        ensure!(
            self.peers.iter().chain(&self.apis).all(|addr| !addr.trim().is_empty()),
            "addresses must not be empty"
        );
        ensure!(self.replay_interval_ms > 0, "replay_interval_ms must be positive");
        ensure!(self.submit_timeout_ms > 0, "submit_timeout_ms must be positive");
        Ok(())
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn address_book(&self) -> Result<AddressBook> {
        AddressBook::new(self.peers.clone(), self.apis.clone())
    }
}

/// Maps replica ids to their peer and API addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBook {
    peers: Vec<String>,
    apis: Vec<String>,
}

impl AddressBook {
    pub fn new(peers: Vec<String>, apis: Vec<String>) -> Result<Self> {
        ensure!(!peers.is_empty(), "address book requires at least one replica");
        ensure!(
            peers.len() == apis.len(),
            "address book lists must be index-aligned"
        );
        Ok(Self { peers, apis })
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ReplicaId> {
        0..self.peers.len() as ReplicaId
    }

    pub fn contains(&self, id: ReplicaId) -> bool {
        (id as usize) < self.peers.len()
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn peer(&self, id: ReplicaId) -> Option<&str> {
        self.peers.get(id as usize).map(String::as_str)
    }

    /// The address clients should use to reach replica `id`.
    pub fn api(&self, id: ReplicaId) -> Option<&str> {
        self.apis.get(id as usize).map(String::as_str)
    }
}
