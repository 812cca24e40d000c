//! Core Raft node.
//!
//! Wraps the tikv/raft `RawNode` and turns its ready/advance protocol into
//! two observable effects: outbound messages, and committed command payloads
//! appended to a [`CommittedLog`] that the log applier reads from.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ::raft::prelude::{ConfState, Config, Entry, EntryType, Message, RawNode};
use ::raft::storage::MemStorage;
use ::raft::StateRole;
use anyhow::{Context, Result};
use slog::{o, Logger};

/// The tikv/raft library requires a logger; we log through `tracing` instead.
fn silent_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// Committed command payloads in commit order, shared with readers.
///
/// Only the worker that owns the [`RaftNode`] appends. Positions count
/// committed commands from zero; Raft's own no-op and configuration entries
/// are not included, so a position is not a Raft log index.
#[derive(Clone, Default)]
pub struct CommittedLog {
    entries: Arc<RwLock<Vec<Vec<u8>>>>,
}

impl CommittedLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, payload: Vec<u8>) -> u64 {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.push(payload);
        entries.len() as u64 - 1
    }

    /// Copies every payload at or after `from`, paired with its position.
    ///
    /// A `from` past the end yields an empty batch rather than an error, so
    /// a caught-up applier simply finds nothing to do. Payloads are cloned
    /// out so the read lock is released before the caller decodes them.
    pub fn read_from(&self, from: u64) -> Vec<(u64, Vec<u8>)> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let start = usize::try_from(from).unwrap_or(usize::MAX);
        entries
            .iter()
            .enumerate()
            .skip(start)
            .map(|(pos, payload)| (pos as u64, payload.clone()))
            .collect()
    }

    pub fn len(&self) -> u64 {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolution of a proposal this node made while leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposalOutcome {
    /// Raft log index the proposal was appended at.
    pub index: u64,
    /// `false` if a different entry (from a newer term) won that index.
    pub committed: bool,
}

/// Output from one pass of the ready/advance protocol.
///
/// Committed payloads are not part of the bundle: they have already been
/// appended to the [`CommittedLog`] by the time `poll_ready` returns. What
/// is left for the caller is the work the node cannot do itself.
pub struct ReadyBundle {
    /// Messages for peers, from both the ready and the light ready phase.
    /// Messages addressed to this node must be stepped back into it.
    pub messages: Vec<Message>,
    /// Proposals of this node whose Raft index was committed in this pass,
    /// in log order.
    pub resolved: Vec<ProposalOutcome>,
}

/// A Raft consensus node appending committed commands to a shared log.
///
/// Uses `MemStorage`; a restarted replica rejoins empty and is caught up by
/// the leader.
pub struct RaftNode {
    id: u64,
    raw: RawNode<MemStorage>,
    storage: MemStorage,
    committed: CommittedLog,
    /// Raft index → term of proposals still waiting to commit.
    proposals: HashMap<u64, u64>,
}

impl RaftNode {
    /// Creates a node with Raft id `id` among `voters`.
    ///
    /// With the runtime ticking every 100ms, elections start after roughly
    /// one second without a heartbeat and leaders heartbeat every 300ms.
    pub fn new(id: u64, voters: &[u64], committed: CommittedLog) -> Result<Self> {
        let cfg = Config {
            id,
            election_tick: 10,
            heartbeat_tick: 3,
            max_inflight_msgs: 256,
            ..Default::default()
        };
        let storage = MemStorage::new_with_conf_state(ConfState::from((voters.to_vec(), vec![])));
        let logger = silent_logger();
        let raw = RawNode::new(&cfg, storage.clone(), &logger)
            .with_context(|| format!("failed to construct RawNode {id}"))?;
        Ok(Self {
            id,
            raw,
            storage,
            committed,
            proposals: HashMap::new(),
        })
    }

    pub fn tick(&mut self) {
        self.raw.tick();
    }

    pub fn campaign(&mut self) -> Result<()> {
        self.raw.campaign().context("campaign failed")
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> StateRole {
        self.raw.raft.state
    }

    /// Returns the current leader's Raft id, or 0 if no leader is known.
    pub fn leader_id(&self) -> u64 {
        self.raw.raft.leader_id
    }

    pub fn term(&self) -> u64 {
        self.raw.raft.term
    }

    pub fn committed_log(&self) -> &CommittedLog {
        &self.committed
    }

    /// Appends `data` to the leader's log and returns its Raft index.
    ///
    /// Returns `Ok(None)` when this node is not the leader; proposals are
    /// never forwarded, the caller is redirected instead. Success only means
    /// "appended": the outcome arrives later through [`Self::poll_ready`].
    pub fn propose(&mut self, data: Vec<u8>) -> Result<Option<u64>> {
        if self.role() != StateRole::Leader {
            return Ok(None);
        }
        self.raw.propose(vec![], data).context("propose failed")?;
        let index = self.raw.raft.raft_log.last_index();
        self.proposals.insert(index, self.term());
        Ok(Some(index))
    }

    pub fn step(&mut self, msg: Message) -> Result<()> {
        self.raw.step(msg).context("step failed")
    }

    /// Processes pending Raft work, if any.
    ///
    /// Phase 1 persists hard state, entries and snapshots, applies committed
    /// entries and collects messages. Phase 2 (light ready) picks up the
    /// commit index and any further committed entries after `advance`.
    pub fn poll_ready(&mut self) -> Result<Option<ReadyBundle>> {
        if !self.raw.has_ready() {
            return Ok(None);
        }

        let mut ready = self.raw.ready();
        let mut resolved = Vec::new();
        let mut outbound = Vec::new();

        if let Some(hard_state) = ready.hs() {
            self.storage.wl().set_hardstate(hard_state.clone());
        }

        if !ready.entries().is_empty() {
            self.storage
                .wl()
                .append(ready.entries())
                .context("append entries failed")?;
        }

        if !ready.snapshot().is_empty() {
            self.storage
                .wl()
                .apply_snapshot(ready.snapshot().clone())
                .context("apply snapshot failed")?;
        }

        resolved.extend(self.apply_entries(ready.take_committed_entries()));
        outbound.extend(ready.take_messages());
        outbound.extend(ready.take_persisted_messages());

        let mut light_ready = self.raw.advance(ready);

        if let Some(commit) = light_ready.commit_index() {
            self.storage.wl().mut_hard_state().set_commit(commit);
        }

        resolved.extend(self.apply_entries(light_ready.take_committed_entries()));
        outbound.extend(light_ready.take_messages());

        self.raw.advance_apply();

        Ok(Some(ReadyBundle {
            messages: outbound,
            resolved,
        }))
    }

    /// Appends committed command entries to the shared log.
    ///
    /// Empty entries (the no-op a new leader commits) and configuration
    /// changes carry no command and are skipped.
    fn apply_entries(&mut self, entries: Vec<Entry>) -> Vec<ProposalOutcome> {
        let mut resolved = Vec::new();
        for entry in entries {
            if let Some(term) = self.proposals.remove(&entry.index) {
                resolved.push(ProposalOutcome {
                    index: entry.index,
                    committed: term == entry.term,
                });
            }
            if entry.data.is_empty() || entry.entry_type() != EntryType::EntryNormal {
                continue;
            }
            self.committed.push(entry.data.to_vec());
        }
        resolved
    }
}
