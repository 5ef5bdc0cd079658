// SPDX-License-Identifier: MIT

//! Autoscaler: periodic evaluation of aggregate pool load against
//! thresholds and bounds, issuing at most one scale action per tick.
//!
//! Pure decision logic lives here, separated from the side-effecting
//! spawn/terminate machinery in [`crate::controller`], so the decision order
//! (rules evaluated in order, first match wins) is directly unit-testable
//! against a [`Registry`] snapshot.

use std::sync::Arc;

use dynproxy_core::{Clock, Phase, WorkerId};

use crate::registry::Registry;

/// A single scaling decision, at most one per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    ScaleUp,
    ScaleDown(WorkerId),
    NoAction,
}

pub struct Autoscaler {
    registry: Arc<Registry>,
    min_instances: u32,
    max_instances: u32,
    scale_up_threshold: f64,
    scale_down_threshold: f64,
    idle_timeout_ms: u64,
}

impl Autoscaler {
    pub fn new(
        registry: Arc<Registry>,
        min_instances: u32,
        max_instances: u32,
        scale_up_threshold: f64,
        scale_down_threshold: f64,
        idle_timeout_ms: u64,
    ) -> Self {
        Self { registry, min_instances, max_instances, scale_up_threshold, scale_down_threshold, idle_timeout_ms }
    }

    /// Compute this tick's action without performing it.
    pub fn decide(&self, clock: &impl Clock) -> Decision {
        let now_ms = clock.now_ms();
        let pool = self.registry.snapshot();
        let pool_len = pool.len() as u32;
        let healthy: Vec<_> = pool.iter().filter(|w| w.is_healthy_running()).collect();
        let healthy_count = healthy.len() as u32;

        // Rule 1: below minInstances and room to grow.
        if healthy_count < self.min_instances && pool_len < self.max_instances {
            return Decision::ScaleUp;
        }

        let avg_load = if healthy.is_empty() {
            None
        } else {
            Some(healthy.iter().map(|w| w.load()).sum::<f64>() / healthy.len() as f64)
        };

        // Rule 2: average load over the scale-up threshold and room to grow.
        if let Some(avg) = avg_load {
            if avg > self.scale_up_threshold && healthy_count < self.max_instances {
                return Decision::ScaleUp;
            }
        }

        // Rule 3: above minInstances, load comfortably low, and an idle
        // candidate exists. Tie-break: oldest last_request_ms, then earliest
        // insertion.
        if healthy_count > self.min_instances {
            if let Some(avg) = avg_load {
                if avg < self.scale_down_threshold {
                    let candidate = healthy
                        .iter()
                        .filter(|w| {
                            w.active_requests == 0
                                && now_ms.saturating_sub(w.last_request_ms) > self.idle_timeout_ms
                        })
                        .min_by(|a, b| {
                            a.last_request_ms
                                .cmp(&b.last_request_ms)
                                .then(a.inserted_at.cmp(&b.inserted_at))
                        });
                    if let Some(candidate) = candidate {
                        return Decision::ScaleDown(candidate.id);
                    }
                }
            }
        }

        Decision::NoAction
    }
}
