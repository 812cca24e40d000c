//! The narrow interface the coordinator needs from a consensus log.
//!
//! Leader election, replication and quorum safety all live behind
//! [`ConsensusService`]. Two implementations ship with the crate:
//!
//! - [`memory::MemoryConsensus`]: a deterministic in-process log for tests
//! - [`raft`]: a tikv/raft cluster over TCP, used by the `kv-node` binary

pub mod memory;
pub mod raft;

use crate::errors::ConsensusError;

/// Position of a replica in the address book (0-based).
pub type ReplicaId = u64;

/// Outcome of proposing a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// `true` once the entry is committed.
    pub accepted: bool,
    /// Currently known leader, if any.
    pub leader: Option<ReplicaId>,
}

impl Submission {
    pub fn accepted(leader: Option<ReplicaId>) -> Self {
        Self {
            accepted: true,
            leader,
        }
    }

    pub fn rejected(leader: Option<ReplicaId>) -> Self {
        Self {
            accepted: false,
            leader,
        }
    }
}

/// A committed log entry.
///
/// `position` is assigned by the consensus service and counts committed
/// commands from zero; the core never assigns positions itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub position: u64,
    pub payload: Vec<u8>,
}

/// A replicated, ordered command log with leader election.
pub trait ConsensusService: Send + Sync {
    /// Proposes a payload and blocks until it is committed or rejected.
    fn submit(&self, payload: Vec<u8>) -> Result<Submission, ConsensusError>;

    /// Returns every committed entry at or after `from`, in log order.
    fn retrieve(&self, from: u64) -> Result<Vec<LogEntry>, ConsensusError>;

    /// Returns the leader this replica currently believes in.
    fn current_leader(&self) -> Option<ReplicaId>;
}
