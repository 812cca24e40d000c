//! Read and write entry points.
//!
//! Writes are encoded and handed to the consensus service; the store is only
//! touched later, when the applier folds the committed entry in. Reads catch
//! the store up first, then answer from it.
//!
//! Reads are best-effort: they reflect everything this replica has seen
//! committed, which on a lagging follower may trail the leader. Every answer
//! carries the current leader's address so callers can tell.

use std::sync::Arc;

use tracing::{debug, info};

use crate::applier::LogApplier;
use crate::command::CommandPayload;
use crate::config::AddressBook;
use crate::consensus::{ConsensusService, ReplicaId};
use crate::errors::KvError;
use crate::store::KvStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The entry was committed.
    Committed {
        key: String,
        value: String,
        leader: Option<String>,
    },
    /// This replica could not commit the entry; retry against `leader`.
    Redirect { leader: Option<String> },
}

impl WriteOutcome {
    pub fn leader(&self) -> Option<&str> {
        match self {
            WriteOutcome::Committed { leader, .. } | WriteOutcome::Redirect { leader } => {
                leader.as_deref()
            }
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, WriteOutcome::Committed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub key: String,
    /// `None` when the key has never been written.
    pub value: Option<String>,
    pub leader: Option<String>,
}

/// Shared context for every request on this replica.
///
/// Built once at startup and shared behind an `Arc` by the HTTP handlers.
/// Writes go straight to the consensus service and never touch the store;
/// the committed command reaches the store later, when some `catch_up`
/// applies it. Reads catch up first so a replica always answers from
/// everything it has seen committed.
pub struct Coordinator {
    consensus: Arc<dyn ConsensusService>,
    /// Shared with the background replay worker.
    applier: Arc<LogApplier>,
    /// Maps the leader id reported by consensus to an API address.
    addresses: AddressBook,
}

impl Coordinator {
    /// Builds a coordinator with an empty store and a cursor at zero.
    pub fn new(consensus: Arc<dyn ConsensusService>, addresses: AddressBook) -> Self {
        let store = Arc::new(KvStore::new());
        let applier = Arc::new(LogApplier::new(Arc::clone(&consensus), store));
        Self {
            consensus,
            applier,
            addresses,
        }
    }

    /// The applier, shared with the background replay worker.
    pub fn applier(&self) -> &Arc<LogApplier> {
        &self.applier
    }

    pub fn addresses(&self) -> &AddressBook {
        &self.addresses
    }

    /// Submits a write and blocks until the consensus service decides it.
    pub fn write(&self, key: String, value: String) -> Result<WriteOutcome, KvError> {
        if key.is_empty() {
            return Err(KvError::invalid("key must not be empty"));
        }

        let payload = CommandPayload::put(key.as_str(), value.as_str()).encode()?;
        let submission = self.consensus.submit(payload)?;
        let leader = self.leader_address(submission.leader);

        if submission.accepted {
            info!(key = %key, "write committed");
            Ok(WriteOutcome::Committed { key, value, leader })
        } else {
            debug!(key = %key, leader = ?leader, "write rejected, redirecting");
            Ok(WriteOutcome::Redirect { leader })
        }
    }

    /// Catches the store up, then reads `key`.
    pub fn read(&self, key: String) -> Result<ReadOutcome, KvError> {
        if key.is_empty() {
            return Err(KvError::invalid("key must not be empty"));
        }

        self.applier.catch_up()?;
        let value = self.applier.store().get(&key);
        let leader = self.leader_address(self.consensus.current_leader());
        Ok(ReadOutcome { key, value, leader })
    }

    /// Resolves a leader id to its client-facing address.
    ///
    /// Unknown leaders and ids outside the address book both map to `None`.
    pub fn leader_address(&self, leader: Option<ReplicaId>) -> Option<String> {
        leader
            .and_then(|id| self.addresses.api(id))
            .map(str::to_string)
    }
}
