// SPDX-License-Identifier: MIT

//! Worker lifecycle phase.

use serde::{Deserialize, Serialize};

/// `Starting -> Running -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Just spawned; not yet passed its first health probe.
    Starting,
    /// Passed at least one health probe; eligible for dispatch when healthy.
    Running,
    /// Termination has begun (idle scale-down, unhealthy eviction, or shutdown).
    Draining,
    /// Runtime has confirmed exit. A worker in this phase is removed from the
    /// pool immediately rather than lingering.
    Stopped,
}

impl Phase {
    pub fn is_running(self) -> bool {
        matches!(self, Phase::Running)
    }
}
