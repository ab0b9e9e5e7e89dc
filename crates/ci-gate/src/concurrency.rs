//! Concurrency groups: at most one active run per key.
//!
//! Registering a run under a key that is already held signals cancellation
//! to the previous holder and takes the key over. Cancellation is
//! cooperative; the superseded run observes it at its next step boundary.

use crate::run::RunId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info};

/// Identifier of a concurrency group, derived from the workflow's group
/// expression (by default workflow name and git ref).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConcurrencyGroupKey(String);

impl ConcurrencyGroupKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConcurrencyGroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receiving side of a cancellation signal, polled at step boundaries.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Outcome of registering a run under a key.
#[derive(Debug)]
pub struct Registration {
    pub token: CancelToken,

    /// Run that held the key before and was signalled to cancel.
    pub superseded: Option<RunId>,
}

#[derive(Debug)]
struct ActiveRun {
    run_id: RunId,
    cancel: watch::Sender<bool>,
}

/// Tracks the active run of every concurrency group.
#[derive(Debug, Default)]
pub struct ConcurrencyCanceller {
    active: Mutex<HashMap<ConcurrencyGroupKey, ActiveRun>>,
}

impl ConcurrencyCanceller {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConcurrencyGroupKey, ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `run_id` the active run for `key`, cancelling the previous one.
    pub fn register(&self, key: &ConcurrencyGroupKey, run_id: &RunId) -> Registration {
        let (tx, rx) = watch::channel(false);
        let previous = self.lock().insert(
            key.clone(),
            ActiveRun {
                run_id: run_id.clone(),
                cancel: tx,
            },
        );

        let superseded = previous.map(|prev| {
            prev.cancel.send_replace(true);
            info!(
                group = %key,
                cancelled = %prev.run_id,
                by = %run_id,
                "Cancelling superseded run"
            );
            prev.run_id
        });

        debug!(group = %key, run_id = %run_id, "Registered active run");

        Registration {
            token: CancelToken { rx },
            superseded,
        }
    }

    /// Drop `run_id` from `key` if it still owns it. Returns whether an
    /// entry was removed; a superseded run never evicts its successor.
    pub fn release(&self, key: &ConcurrencyGroupKey, run_id: &RunId) -> bool {
        let mut active = self.lock();
        match active.get(key) {
            Some(current) if &current.run_id == run_id => {
                active.remove(key);
                debug!(group = %key, run_id = %run_id, "Released concurrency group");
                true
            }
            _ => false,
        }
    }

    /// Signal cancellation to the active run of `key` and free the key.
    pub fn cancel(&self, key: &ConcurrencyGroupKey) -> Option<RunId> {
        let removed = self.lock().remove(key)?;
        removed.cancel.send_replace(true);
        info!(group = %key, cancelled = %removed.run_id, "Cancelled active run");
        Some(removed.run_id)
    }

    pub fn active_run(&self, key: &ConcurrencyGroupKey) -> Option<RunId> {
        self.lock().get(key).map(|a| a.run_id.clone())
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}
