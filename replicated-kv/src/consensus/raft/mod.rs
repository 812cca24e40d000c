//! Raft-backed [`ConsensusService`](crate::consensus::ConsensusService).
//!
//! [`node`] drives the tikv/raft state machine; [`runtime`] runs it on a
//! worker thread with a TCP transport between replicas.

pub mod node;
pub mod runtime;

pub use node::CommittedLog;
pub use runtime::{spawn_raft, RaftConfig, RaftHandle};
