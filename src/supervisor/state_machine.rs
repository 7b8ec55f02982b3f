use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::error::SupervisorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    /// No loop running; "Run" is enabled
    Idle,
    /// Restart loop active
    Running,
    /// Stop requested, loop has not observed it yet
    StopRequested,
    /// Terminating the current child
    Stopping,
}

impl SupervisorState {
    pub fn can_transition(&self, to: &SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, to),
            (Idle, Running)
                | (Running, StopRequested)
                | (Running, Idle)
                | (StopRequested, Stopping)
                | (StopRequested, Idle)
                | (Stopping, Idle)
        )
    }
}

/// Shared supervisor state. Every change is published to watchers.
pub struct StateCell {
    tx: watch::Sender<SupervisorState>,
}

impl Default for StateCell {
    fn default() -> Self {
        let (tx, _) = watch::channel(SupervisorState::Idle);
        Self { tx }
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> SupervisorState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.tx.subscribe()
    }

    /// Move to `to` if the transition is legal from the current state.
    pub fn transition(&self, to: SupervisorState) -> Result<(), SupervisorError> {
        let mut from = None;
        let changed = self.tx.send_if_modified(|state| {
            if state.can_transition(&to) {
                *state = to;
                true
            } else {
                from = Some(*state);
                false
            }
        });
        match (changed, from) {
            (true, _) => {
                tracing::debug!("[Supervisor] State -> {:?}", to);
                Ok(())
            }
            (false, Some(from)) => Err(SupervisorError::InvalidTransition { from, to }),
            (false, None) => Ok(()),
        }
    }

    /// Compare-and-set: only moves when the current state is exactly `from`.
    pub fn transition_from(&self, from: SupervisorState, to: SupervisorState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == from && from.can_transition(&to) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Unconditional reset used when the loop exits.
    pub(crate) fn reset(&self) {
        self.tx.send_if_modified(|state| {
            if *state != SupervisorState::Idle {
                *state = SupervisorState::Idle;
                true
            } else {
                false
            }
        });
    }
}
