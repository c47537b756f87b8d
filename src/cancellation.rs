//! Run cancellation: the caller owns each run's CancellationToken; the
//! controller remembers the active one so that starting a new run cancels the
//! previous run, and a generation counter lets a superseded run detect that
//! it is stale before touching shared run state.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

struct ActiveRun {
    generation: u64,
    token: CancellationToken,
}

pub struct RunController {
    active: RwLock<Option<ActiveRun>>,
    generation: AtomicU64,
}

impl Default for RunController {
    fn default() -> Self {
        Self::new()
    }
}

impl RunController {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Register `token` as the active run. Any previously active run is
    /// cancelled. Returns the new run's generation.
    pub fn begin(&self, token: CancellationToken) -> u64 {
        let mut active = self.active.write();
        if let Some(previous) = active.take() {
            if !previous.token.is_cancelled() {
                previous.token.cancel();
                info!(generation = previous.generation, "previous run cancelled by new run");
            }
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *active = Some(ActiveRun { generation, token });
        generation
    }

    /// Cancel the active run, if any. Returns true if a run was signalled.
    pub fn cancel_active(&self) -> bool {
        let active = self.active.read();
        match active.as_ref() {
            Some(run) if !run.token.is_cancelled() => {
                run.token.cancel();
                info!(generation = run.generation, "active run cancelled");
                true
            }
            _ => false,
        }
    }

    /// Release `generation`. Returns true if it was still the current run.
    pub fn finish(&self, generation: u64) -> bool {
        let mut active = self.active.write();
        match active.as_ref() {
            Some(run) if run.generation == generation => {
                *active = None;
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub fn is_active(&self) -> bool {
        self.active.read().is_some()
    }
}
