// SPDX-License-Identifier: MIT

//! Health Prober.

use std::sync::Arc;
use std::time::Duration;

use dynproxy_core::{Clock, WorkerId};

use crate::registry::Registry;

/// Unhealthy-eviction window, fixed at 60s.
pub const UNHEALTHY_EVICTION_WINDOW: Duration = Duration::from_secs(60);

pub struct Prober {
    registry: Arc<Registry>,
    client: reqwest::Client,
    health_endpoint: String,
    health_timeout: Duration,
}

impl Prober {
    pub fn new(registry: Arc<Registry>, health_endpoint: impl Into<String>, health_timeout: Duration) -> Self {
        Self {
            registry,
            client: reqwest::Client::new(),
            health_endpoint: health_endpoint.into(),
            health_timeout,
        }
    }

    /// One probe tick: concurrently GET every Worker's health endpoint and
    /// write the outcome into the registry. Returns the set of workers whose
    /// unhealthy window has exceeded [`UNHEALTHY_EVICTION_WINDOW`] and must
    /// be drained by the caller.
    pub async fn tick(&self, clock: &impl Clock) -> Vec<WorkerId> {
        let now_ms = clock.now_ms();
        let workers = self.registry.snapshot();
        let futures = workers.iter().map(|w| self.probe_one(w.id, w.port, now_ms));
        futures::future::join_all(futures).await;

        self.registry
            .snapshot()
            .into_iter()
            .filter(|w| {
                !w.healthy && now_ms.saturating_sub(w.last_healthy_ms) > UNHEALTHY_EVICTION_WINDOW.as_millis() as u64
            })
            .map(|w| w.id)
            .collect()
    }

    /// Probe exactly one worker and write the outcome.
    async fn probe_one(&self, id: WorkerId, port: u16, now_ms: u64) {
        let url = format!("http://localhost:{port}{}", self.health_endpoint);
        let start = std::time::Instant::now();
        let outcome = self.client.get(&url).timeout(self.health_timeout).send().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(resp) if resp.status().is_success() => {
                self.registry.mutate(id, |w| {
                    w.healthy = true;
                    w.last_healthy_ms = now_ms;
                    w.response_time_ms = elapsed_ms;
                    if matches!(w.phase, dynproxy_core::Phase::Starting) {
                        w.phase = dynproxy_core::Phase::Running;
                    }
                });
            }
            _ => {
                self.registry.mutate(id, |w| w.healthy = false);
            }
        }
    }

    /// Bounded warm-up probing after spawn: probe at 1s cadence until the
    /// first 200 OK or `window` elapses. Returns `true` on success.
    pub async fn warm_up(&self, id: WorkerId, port: u16, window: Duration, clock: &impl Clock) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            self.probe_one(id, port, clock.now_ms()).await;
            if self.registry.get(id).map(|w| w.healthy).unwrap_or(false) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}
