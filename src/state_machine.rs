//! Run lifecycle: Idle → Running → {Completed, Cancelled, Failed}.
//! A new run may start from any terminal state, or preempt a running one.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Running => write!(f, "Running"),
            RunState::Completed => write!(f, "Completed"),
            RunState::Cancelled => write!(f, "Cancelled"),
            RunState::Failed => write!(f, "Failed"),
        }
    }
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }

    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Idle, RunState::Running)
                | (RunState::Running, RunState::Completed)
                | (RunState::Running, RunState::Cancelled)
                | (RunState::Running, RunState::Failed)
                // a new run preempts the active one
                | (RunState::Running, RunState::Running)
                | (RunState::Completed, RunState::Running)
                | (RunState::Cancelled, RunState::Running)
                | (RunState::Failed, RunState::Running)
                | (RunState::Completed, RunState::Idle)
                | (RunState::Cancelled, RunState::Idle)
                | (RunState::Failed, RunState::Idle)
        )
    }
}

/// Thread-safe state holder with a watch channel for observers.
pub struct StateMachine {
    state: RwLock<RunState>,
    state_tx: watch::Sender<RunState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(RunState::Idle);
        Self {
            state: RwLock::new(RunState::Idle),
            state_tx,
        }
    }

    pub fn current(&self) -> RunState {
        *self.state.read()
    }

    /// Attempt a state transition. Returns Ok(new_state) or Err with reason.
    pub fn transition(&self, next: RunState) -> Result<RunState, String> {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            let msg = format!("invalid transition: {} -> {}", current, next);
            warn!("{}", msg);
            return Err(msg);
        }
        *state = next;
        self.state_tx.send_replace(next);
        info!(from = %current, to = %next, "run_state_transition");
        Ok(next)
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), RunState::Idle);
        assert!(sm.transition(RunState::Completed).is_err());
        sm.transition(RunState::Running).unwrap();
        sm.transition(RunState::Cancelled).unwrap();
        assert!(sm.current().is_terminal());
        assert!(sm.transition(RunState::Completed).is_err());
        sm.transition(RunState::Running).unwrap();
        sm.transition(RunState::Running).unwrap();
        sm.transition(RunState::Completed).unwrap();
        sm.transition(RunState::Idle).unwrap();
    }

    #[test]
    fn subscribers_see_latest_state() {
        let sm = StateMachine::new();
        let rx = sm.subscribe();
        sm.transition(RunState::Running).unwrap();
        sm.transition(RunState::Failed).unwrap();
        assert_eq!(*rx.borrow(), RunState::Failed);
    }
}
