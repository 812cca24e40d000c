//! Deterministic in-process consensus log.
//!
//! Every replica sharing a `MemoryConsensus` sees the same committed log.
//! Tests flip the leader and the availability switch to drive the
//! coordinator through redirects and outages without any networking.

use std::sync::Mutex;

use super::{ConsensusService, LogEntry, ReplicaId, Submission};
use crate::errors::ConsensusError;

struct Inner {
    committed: Vec<Vec<u8>>,
    leader: Option<ReplicaId>,
    available: bool,
}

pub struct MemoryConsensus {
    local: ReplicaId,
    inner: Mutex<Inner>,
}

impl MemoryConsensus {
    /// Creates a log viewed from replica `local` with `leader` in charge.
    pub fn new(local: ReplicaId, leader: Option<ReplicaId>) -> Self {
        Self {
            local,
            inner: Mutex::new(Inner {
                committed: Vec::new(),
                leader,
                available: true,
            }),
        }
    }

    /// A single-replica log where this replica is always the leader.
    pub fn single_node() -> Self {
        Self::new(0, Some(0))
    }

    pub fn local_id(&self) -> ReplicaId {
        self.local
    }

    pub fn set_leader(&self, leader: Option<ReplicaId>) {
        self.lock().leader = leader;
    }

    /// While unavailable, `submit` and `retrieve` fail.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Appends an entry as though another replica had it committed.
    pub fn commit_external(&self, payload: Vec<u8>) -> u64 {
        let mut inner = self.lock();
        inner.committed.push(payload);
        inner.committed.len() as u64 - 1
    }

    /// Number of committed entries.
    pub fn committed_len(&self) -> u64 {
        self.lock().committed.len() as u64
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConsensusService for MemoryConsensus {
    fn submit(&self, payload: Vec<u8>) -> Result<Submission, ConsensusError> {
        let mut inner = self.lock();
        if !inner.available {
            return Err(ConsensusError::Unavailable("memory log switched off".into()));
        }
        if inner.leader != Some(self.local) {
            return Ok(Submission::rejected(inner.leader));
        }
        inner.committed.push(payload);
        Ok(Submission::accepted(inner.leader))
    }

    fn retrieve(&self, from: u64) -> Result<Vec<LogEntry>, ConsensusError> {
        let inner = self.lock();
        if !inner.available {
            return Err(ConsensusError::Unavailable("memory log switched off".into()));
        }
        let start = usize::try_from(from).unwrap_or(usize::MAX);
        Ok(inner
            .committed
            .iter()
            .enumerate()
            .skip(start)
            .map(|(position, payload)| LogEntry {
                position: position as u64,
                payload: payload.clone(),
            })
            .collect())
    }

    fn current_leader(&self) -> Option<ReplicaId> {
        self.lock().leader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_accepts_and_appends() {
        let log = MemoryConsensus::single_node();
        let outcome = log.submit(b"one".to_vec()).unwrap();
        assert_eq!(outcome, Submission::accepted(Some(0)));
        assert_eq!(log.committed_len(), 1);
    }

    #[test]
    fn test_follower_rejects_with_hint() {
        let log = MemoryConsensus::new(1, Some(2));
        let outcome = log.submit(b"one".to_vec()).unwrap();
        assert_eq!(outcome, Submission::rejected(Some(2)));
        assert_eq!(log.committed_len(), 0);
    }

    #[test]
    fn test_retrieve_from_offset() {
        let log = MemoryConsensus::new(1, Some(0));
        for payload in [b"a", b"b", b"c"] {
            log.commit_external(payload.to_vec());
        }
        let tail = log.retrieve(1).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].position, 1);
        assert_eq!(tail[1].payload, b"c".to_vec());
        assert!(log.retrieve(3).unwrap().is_empty());
        assert!(log.retrieve(10).unwrap().is_empty());
    }

    #[test]
    fn test_unavailable_log_fails() {
        let log = MemoryConsensus::single_node();
        log.set_available(false);
        assert!(log.submit(b"x".to_vec()).is_err());
        assert!(log.retrieve(0).is_err());
    }
}
