//! # Failure Escalation
//!
//! Recovery ladder applied when a sync round makes no progress:
//! cooldown, then snapshot rollback every `rollback_every` failures, then a
//! node restart every `restart_every` failures. Restart wins when both land
//! on the same failure.

use crate::domain::{RESTART_EVERY, ROLLBACK_EVERY};

/// Action to take after the cooldown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscalationAction {
    /// Cooldown only.
    None,
    /// Roll the chain state back to this snapshot height.
    Rollback {
        /// Snapshot height to restore.
        height: u64,
    },
    /// Ask the host to restart the node.
    Restart,
}

/// Escalation cadence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EscalationPolicy {
    /// Rollback on every n-th cumulative failure.
    pub rollback_every: u64,
    /// Restart on every n-th cumulative failure.
    pub restart_every: u64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            rollback_every: ROLLBACK_EVERY,
            restart_every: RESTART_EVERY,
        }
    }
}

impl EscalationPolicy {
    /// Decide what follows the cooldown for the `total_failures`-th failure.
    ///
    /// Rollbacks walk backward from the newest snapshot: the first rollback
    /// targets the newest, the second the one before it, wrapping around
    /// once the oldest was tried. `snapshot_heights` must be ascending.
    pub fn decide(&self, total_failures: u64, snapshot_heights: &[u64]) -> EscalationAction {
        if total_failures == 0 {
            return EscalationAction::None;
        }
        if self.restart_every > 0 && total_failures % self.restart_every == 0 {
            return EscalationAction::Restart;
        }
        if self.rollback_every == 0
            || total_failures % self.rollback_every != 0
            || snapshot_heights.is_empty()
        {
            return EscalationAction::None;
        }
        let rollback_number = total_failures / self.rollback_every;
        let steps_back = ((rollback_number - 1) % snapshot_heights.len() as u64) as usize;
        let height = snapshot_heights[snapshot_heights.len() - 1 - steps_back];
        EscalationAction::Rollback { height }
    }
}
