// SPDX-License-Identifier: MIT

//! Dispatcher: per-request selection of the least-loaded
//! healthy worker.

use std::sync::Arc;

use dynproxy_core::Clock;

use crate::registry::{Registry, Worker};

/// Stateless beyond reading registry snapshots; no per-selection locking on
/// the Pool beyond what the registry's own dispatch-critical-section
/// requires.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// `pick() -> Worker | none`. `None` means the caller
    /// must respond 503 without attempting an upstream connection.
    pub fn pick(&self, clock: &impl Clock) -> Option<Worker> {
        self.registry.pick_and_dispatch(clock.now_ms())
    }
}
