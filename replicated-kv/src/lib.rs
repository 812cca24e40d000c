//! Leader-aware key-value view over a replicated command log.
//!
//! Writes become commands in a consensus log; every replica applies the
//! committed log, exactly once and in order, to its own in-memory store, and
//! serves reads from it after catching up.
//!
//! # Architecture
//!
//! - **Request handlers** (Tokio tasks) call the [`coordinator`] on the
//!   blocking pool
//! - **Replay worker** (one thread) calls [`applier::LogApplier::catch_up`]
//!   on a fixed interval so followers stay fresh without local traffic
//! - **Raft worker** (one thread plus network threads) owns the consensus
//!   state machine; see [`consensus::raft`]
//!
//! The store and the application cursor are the only shared mutable state.
//! Both change only inside the applier's critical section.
//!
//! # Modules
//!
//! - [`command`]: commands replicated through the log
//! - [`store`]: thread-safe in-memory key-value storage
//! - [`applier`]: catch-up logic and the periodic replay worker
//! - [`coordinator`]: read and write entry points, leader redirects
//! - [`consensus`]: the consensus interface and its implementations
//! - [`config`]: cluster file and address book
//! - [`http`]: JSON API
//! - [`replica`]: startup wiring for the `kv-node` binary

pub mod applier;
pub mod command;
pub mod config;
pub mod consensus;
pub mod coordinator;
pub mod errors;
pub mod http;
pub mod replica;
pub mod store;
