//! Interception Queue (C6): holds transactions paused awaiting operator action.
//!
//! A single FIFO per direction. Pausing is opt-in: a transaction only enters the
//! queue if its metadata has `intercepted=true` (spec.md §4.6), typically set by a
//! `checkpoint`-style extension during the pre-script intercept phase (§4.7).

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{MarasiError, Result};
use crate::transaction::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// The action an operator takes to release a paused transaction.
#[derive(Debug, Clone)]
pub enum ReleaseAction {
    Forward,
    Drop,
    /// Replaces the raw bytes; the pipeline re-parses from the edited buffer before
    /// continuing (spec.md §4.6).
    Edit(Bytes),
}

/// A paused transaction as seen from `list()`.
#[derive(Debug, Clone)]
pub struct PausedDescriptor {
    pub id: TransactionId,
    pub direction: Direction,
}

struct PausedEntry {
    id: TransactionId,
    direction: Direction,
    release_tx: oneshot::Sender<ReleaseAction>,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<PausedEntry>,
}

/// Shared interception queue; one instance per proxy.
#[derive(Clone, Default)]
pub struct InterceptionQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InterceptionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a transaction and return a future that resolves once the operator
    /// releases it. The pipeline task awaits this future at the
    /// `InterceptWait(request|response)` state (spec.md §4.5).
    pub fn enqueue(
        &self,
        direction: Direction,
        id: TransactionId,
    ) -> oneshot::Receiver<ReleaseAction> {
        let (release_tx, release_rx) = oneshot::channel();
        let mut state = self.state.lock();
        state.entries.push_back(PausedEntry {
            id,
            direction,
            release_tx,
        });
        release_rx
    }

    /// Release a specific paused transaction. Releases are served strictly in
    /// enqueue order only in the sense that `list()` reports FIFO order per
    /// direction; the operator addresses a specific id directly (spec.md §4.6).
    pub fn release(&self, id: TransactionId, action: ReleaseAction) -> Result<()> {
        let mut state = self.state.lock();
        let idx = state
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| MarasiError::Internal(format!("no paused transaction with id {id}")))?;
        let entry = state.entries.remove(idx).unwrap();
        let _ = entry.release_tx.send(action);
        Ok(())
    }

    pub fn list(&self) -> Vec<PausedDescriptor> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|e| PausedDescriptor {
                id: e.id,
                direction: e.direction,
            })
            .collect()
    }
}
