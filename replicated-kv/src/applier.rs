//! Folds committed log entries into the local store.
//!
//! The application cursor counts entries already applied. It lives inside
//! the applier's mutex, and the whole read-cursor → fetch → apply → advance
//! sequence runs while that mutex is held. Concurrent `catch_up` calls from
//! the replay worker and from read requests therefore serialize: each entry
//! is applied exactly once and in log order.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, warn};

use crate::command::CommandPayload;
use crate::consensus::ConsensusService;
use crate::errors::KvError;
use crate::store::KvStore;

/// What one `catch_up` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUp {
    /// Entries applied by this call.
    pub applied: u64,
    /// Cursor after the call.
    pub cursor: u64,
}

/// Folds committed log entries into the local [`KvStore`].
///
/// The applier is the only writer of the store. Its cursor counts the
/// entries applied so far and doubles as the position of the next entry to
/// fetch. Request threads and the replay worker all call
/// [`LogApplier::catch_up`] on the same instance; the cursor mutex makes each
/// call a single fetch-apply-advance step, so no entry is applied twice or
/// out of order.
pub struct LogApplier {
    consensus: Arc<dyn ConsensusService>,
    /// Shared with the coordinator for reads.
    store: Arc<KvStore>,
    /// Next log position to apply. Held for the whole of `catch_up`.
    cursor: Mutex<u64>,
}

impl LogApplier {
    pub fn new(consensus: Arc<dyn ConsensusService>, store: Arc<KvStore>) -> Self {
        Self {
            consensus,
            store,
            cursor: Mutex::new(0),
        }
    }

    /// Number of log entries applied so far.
    pub fn cursor(&self) -> u64 {
        *self.lock_cursor()
    }

    pub fn store(&self) -> &Arc<KvStore> {
        &self.store
    }

    /// Applies every committed entry past the cursor.
    ///
    /// A call with nothing new leaves the cursor and store untouched. If an
    /// entry fails to decode, the entries before it stay applied, the cursor
    /// stops in front of it and the error is returned.
    pub fn catch_up(&self) -> Result<CatchUp, KvError> {
        let mut cursor = self.lock_cursor();
        let entries = self.consensus.retrieve(*cursor)?;

        let start = *cursor;
        for entry in entries {
            let position = *cursor;
            let command = CommandPayload::decode(&entry.payload)
                .map_err(|source| KvError::CorruptEntry { position, source })?;
            let (key, value) = command.into_pair();
            self.store.set(key, value);
            *cursor += 1;
        }

        let applied = *cursor - start;
        if applied > 0 {
            debug!(applied, cursor = *cursor, "applied committed entries");
        }
        Ok(CatchUp {
            applied,
            cursor: *cursor,
        })
    }

    fn lock_cursor(&self) -> MutexGuard<'_, u64> {
        self.cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Stops the replay worker when asked, or when dropped.
pub struct ReplayHandle {
    shutdown_tx: Sender<()>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ReplayHandle {
    /// Stops the worker and waits for its current pass to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for ReplayHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs `catch_up` every `interval` on a background thread.
///
/// Keeps follower stores fresh even when this replica serves no reads.
/// Failures are logged and retried on the next tick.
pub fn spawn_replay(applier: Arc<LogApplier>, interval: Duration) -> Result<ReplayHandle> {
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    let worker = thread::Builder::new()
        .name("log-replay".into())
        .spawn(move || loop {
            crossbeam_channel::select! {
                recv(shutdown_rx) -> _ => break,
                default(interval) => {
                    if let Err(err) = applier.catch_up() {
                        warn!(error = %err, cursor = applier.cursor(), "periodic catch-up failed");
                    }
                }
            }
        })
        .context("failed to spawn replay worker")?;

    Ok(ReplayHandle {
        shutdown_tx,
        worker: Some(worker),
    })
}
