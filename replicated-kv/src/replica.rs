//! Wires one replica together: Raft consensus, coordinator, replay worker.

use std::sync::Arc;

use anyhow::{ensure, Result};
use tracing::info;

use crate::applier::{spawn_replay, ReplayHandle};
use crate::config::ClusterConfig;
use crate::consensus::raft::{spawn_raft, RaftConfig, RaftHandle};
use crate::consensus::ReplicaId;
use crate::coordinator::Coordinator;

/// A running replica. Dropping it stops the replay worker; call
/// [`Replica::shutdown`] to stop the Raft worker as well.
pub struct Replica {
    id: ReplicaId,
    raft: RaftHandle,
    coordinator: Arc<Coordinator>,
    replay: ReplayHandle,
}

impl Replica {
    /// Starts replica `id` of the cluster described by `config`.
    pub fn start(config: &ClusterConfig, id: ReplicaId) -> Result<Self> {
        config.validate()?;
        let addresses = config.address_book()?;
        ensure!(
            addresses.contains(id),
            "replica id {id} is not in the cluster (size {})",
            addresses.len()
        );

        let raft = spawn_raft(RaftConfig {
            replica: id,
            peers: addresses.peers().to_vec(),
            submit_timeout: config.submit_timeout(),
        })?;
        let coordinator = Arc::new(Coordinator::new(Arc::new(raft.clone()), addresses));
        let replay = spawn_replay(Arc::clone(coordinator.applier()), config.replay_interval())?;

        info!(
            replica = id,
            peer = ?coordinator.addresses().peer(id),
            api = ?coordinator.addresses().api(id),
            replay_interval = ?config.replay_interval(),
            "replica started"
        );

        Ok(Self {
            id,
            raft,
            coordinator,
            replay,
        })
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn raft(&self) -> &RaftHandle {
        &self.raft
    }

    /// Address clients should use for this replica.
    pub fn api_address(&self) -> Option<&str> {
        self.coordinator.addresses().api(self.id)
    }

    /// Stops the replay worker, then the Raft worker.
    pub fn shutdown(self) -> Result<()> {
        self.replay.shutdown();
        self.raft.shutdown()?;
        info!(replica = self.id, "replica stopped");
        Ok(())
    }
}
