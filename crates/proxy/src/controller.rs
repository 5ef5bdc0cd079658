// SPDX-License-Identifier: MIT

//! Controller: lifecycle orchestrator binding the runtime adapter,
//! registry, prober, autoscaler, and dispatcher together.

use std::sync::Arc;
use std::time::Duration;

use dynproxy_core::{Clock, Phase, WorkerId};
use parking_lot::Mutex as SyncMutex;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::adapter::container::ContainerAdapter;
use crate::adapter::process::ProcessAdapter;
use crate::adapter::{Handle, RuntimeAdapter};
use crate::autoscaler::{Autoscaler, Decision};
use crate::config::{Backend, Config};
use crate::dispatcher::Dispatcher;
use crate::error::LifecycleError;
use crate::prober::Prober;
use crate::registry::{Registry, Worker};

/// Binds the Worker Runtime Adapter, Registry, Prober, Autoscaler, and
/// Dispatcher into the single pool controller.
pub struct Controller<C: Clock> {
    config: Config,
    adapter: Arc<dyn RuntimeAdapter>,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    prober: Arc<Prober>,
    autoscaler: Autoscaler,
    clock: C,
    started_at_ms: u64,
    timers: SyncMutex<Vec<JoinHandle<()>>>,
    http_client: reqwest::Client,
}

impl<C: Clock> Controller<C> {
    pub fn new(config: Config, clock: C) -> Self {
        let registry = Arc::new(Registry::new(config.base_port));
        let adapter: Arc<dyn RuntimeAdapter> = match &config.backend {
            Backend::Process(p) => Arc::new(ProcessAdapter::new(p.clone())),
            Backend::Container(c) => Arc::new(ContainerAdapter::new(c.clone())),
        };
        let prober = Arc::new(Prober::new(registry.clone(), config.backend.health_endpoint(), config.health_timeout));
        let autoscaler = Autoscaler::new(
            registry.clone(),
            config.min_instances,
            config.max_instances,
            config.scale_up_threshold,
            config.scale_down_threshold,
            config.idle_timeout.as_millis() as u64,
        );
        let dispatcher = Dispatcher::new(registry.clone());
        let started_at_ms = clock.now_ms();

        Self {
            config,
            adapter,
            registry,
            dispatcher,
            prober,
            autoscaler,
            clock,
            started_at_ms,
            timers: SyncMutex::new(Vec::new()),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Reverse-proxy HTTP client: shared so connection pooling works
    /// across dispatched requests.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub fn upstream_timeout(&self) -> Duration {
        crate::env::upstream_timeout()
    }

    /// Bring the pool up: orphan sweep, image prepare, minimum-instance
    /// warm-up, timer start.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), LifecycleError> {
        self.reclaim_orphans().await;

        if let Err(e) = self.adapter.prepare().await {
            tracing::warn!(error = %e, "adapter prepare failed");
        }

        let results = futures::future::join_all((0..self.config.min_instances).map(|_| self.spawn_worker())).await;
        let spawned = results.iter().filter(|r| r.is_ok()).count();
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            tracing::warn!(error = %err, "initial worker spawn failed");
        }
        if spawned == 0 && self.config.min_instances > 0 {
            return Err(LifecycleError::NoWorkersSpawned);
        }

        self.start_timers();
        Ok(())
    }

    /// On start, reclaim any previously-owned workers by name prefix and
    /// terminate them.
    async fn reclaim_orphans(&self) {
        match self.adapter.list_owned().await {
            Ok(names) => {
                for name in names {
                    tracing::info!(%name, "reclaiming orphaned worker from a prior controller lifetime");
                    let handle = Handle::new(name, 0);
                    if let Err(e) = self.adapter.terminate(&handle).await {
                        tracing::warn!(error = %e, "failed to terminate orphan");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "orphan reclaim list_owned failed"),
        }
    }

    fn start_timers(self: &Arc<Self>) {
        let prober_interval = self.config.prober_interval();
        let check_interval = self.config.check_interval;

        let this = self.clone();
        let prober_handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(prober_interval).await;
                this.run_prober_tick().await;
            }
        });

        let this = self.clone();
        let autoscaler_handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(check_interval).await;
                this.run_autoscaler_tick().await;
            }
        });

        let mut timers = self.timers.lock();
        timers.push(prober_handle);
        timers.push(autoscaler_handle);
    }

    async fn run_prober_tick(&self) {
        let to_evict = self.prober.tick(&self.clock).await;
        for id in to_evict {
            tracing::info!(worker_id = %id, "evicting worker after sustained unhealthy probes");
            self.evict_worker(id).await;
        }
    }

    async fn run_autoscaler_tick(&self) {
        match self.autoscaler.decide(&self.clock) {
            Decision::ScaleUp => match self.spawn_worker().await {
                Ok(id) => tracing::info!(worker_id = %id, "autoscaler scaled up"),
                Err(e) => tracing::warn!(error = %e, "autoscaler scale-up failed, retrying next tick"),
            },
            Decision::ScaleDown(id) => {
                tracing::info!(worker_id = %id, "autoscaler scaling down idle worker");
                self.evict_worker(id).await;
            }
            Decision::NoAction => {}
        }

        let snapshot = self.registry.snapshot();
        let healthy = snapshot.iter().filter(|w| w.is_healthy_running()).count();
        let avg_load = if healthy == 0 {
            0.0
        } else {
            snapshot.iter().filter(|w| w.is_healthy_running()).map(|w| w.load()).sum::<f64>() / healthy as f64
        };
        tracing::info!(pool_size = snapshot.len(), healthy, avg_load, "autoscaler tick complete");
    }

    /// Spawn one Worker: allocate a port, invoke the adapter, insert in
    /// Starting, and warm-up probe. On warm-up failure the Worker is
    /// evicted.
    async fn spawn_worker(&self) -> Result<WorkerId, crate::error::AdapterError> {
        let port = self.registry.allocate_port();

        let id = WorkerId::new();
        let name = match &self.config.backend {
            Backend::Container(c) => format!("{}-{}", c.name_prefix, id.short()),
            Backend::Process(_) => format!("worker-{}", id.short()),
        };
        let handle = self.adapter.create(port, &name).await?;
        let now_ms = self.clock.now_ms();
        self.registry.insert(Worker::new(id, port, handle, name, now_ms));

        let warmed = self.prober.warm_up(id, port, self.config.warmup_window(), &self.clock).await;
        if !warmed {
            tracing::warn!(worker_id = %id, "worker failed to warm up within window, evicting");
            self.evict_worker(id).await;
            return Err(crate::error::AdapterError::CreateFailed("warm-up window elapsed".into()));
        }
        Ok(id)
    }

    /// The Worker is removed from the pool regardless of whether
    /// `terminate` succeeds.
    async fn evict_worker(&self, id: WorkerId) {
        self.registry.mutate(id, |w| w.phase = Phase::Draining);
        if let Some(worker) = self.registry.get(id) {
            if let Err(e) = self.adapter.terminate(&worker.handle).await {
                tracing::warn!(worker_id = %id, error = %e, "terminate failed, evicting from pool anyway");
            }
        }
        self.registry.mutate(id, |w| w.phase = Phase::Stopped);
        self.registry.remove(id);
    }

    /// Current pool status as a JSON document.
    pub fn status(&self) -> serde_json::Value {
        let snapshot = self.registry.snapshot();
        let total = snapshot.len();
        let healthy = snapshot.iter().filter(|w| w.is_healthy_running()).count();

        let workers: Vec<_> = snapshot
            .iter()
            .map(|w| {
                json!({
                    "id": w.id.to_string(),
                    "native_id": w.handle.native_id,
                    "name": w.name,
                    "port": w.port,
                    "healthy": w.healthy,
                    "phase": phase_str(w.phase),
                    "active_requests": w.active_requests,
                    "total_requests": w.total_requests,
                    "response_time_ms": w.response_time_ms,
                    "load": w.load(),
                })
            })
            .collect();

        let mut status = json!({
            "total": total,
            "healthy": healthy,
            "workers": workers,
        });
        if let Backend::Container(c) = &self.config.backend {
            status["image"] = json!(c.image);
        }
        status
    }

    /// Liveness payload for `GET /health`.
    pub fn liveness(&self) -> serde_json::Value {
        json!({
            "status": "healthy",
            "uptime_ms": self.clock.now_ms().saturating_sub(self.started_at_ms),
            "instances": self.status(),
        })
    }

    /// Stop timers, concurrently terminate every Worker, and return when
    /// all resolve or the deadline expires.
    pub async fn shutdown(&self) {
        for handle in self.timers.lock().drain(..) {
            handle.abort();
        }

        let ids: Vec<_> = self.registry.snapshot().into_iter().map(|w| w.id).collect();
        let deadline = crate::env::shutdown_timeout();
        let terminations = futures::future::join_all(ids.iter().map(|id| self.evict_worker(*id)));

        if tokio::time::timeout(deadline, terminations).await.is_err() {
            tracing::warn!("shutdown deadline exceeded with workers still terminating");
        }
    }
}

fn phase_str(phase: Phase) -> &'static str {
    match phase {
        Phase::Starting => "starting",
        Phase::Running => "running",
        Phase::Draining => "draining",
        Phase::Stopped => "stopped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::fake::FakeAdapter;
    use dynproxy_core::{FakeClock, ProcessConfig};

    fn test_config() -> Config {
        Config {
            backend: Backend::Process(ProcessConfig::new("true", "")),
            listen_port: 0,
            base_port: 6000,
            min_instances: 2,
            max_instances: 4,
            check_interval: Duration::from_millis(50),
            health_timeout: Duration::from_millis(50),
            scale_up_threshold: 3.0,
            scale_down_threshold: 0.5,
            idle_timeout: Duration::from_millis(50),
        }
    }

    /// Builds a Controller with a FakeAdapter wired in (bypassing the
    /// Process/Container construction `new()` does), for tests that need
    /// deterministic create/terminate outcomes.
    fn controller_with_fake(config: Config, clock: FakeClock, fake: Arc<FakeAdapter>) -> Arc<Controller<FakeClock>> {
        let registry = Arc::new(Registry::new(config.base_port));
        let prober = Arc::new(Prober::new(registry.clone(), config.backend.health_endpoint(), config.health_timeout));
        let autoscaler = Autoscaler::new(
            registry.clone(),
            config.min_instances,
            config.max_instances,
            config.scale_up_threshold,
            config.scale_down_threshold,
            config.idle_timeout.as_millis() as u64,
        );
        let dispatcher = Dispatcher::new(registry.clone());
        let started_at_ms = clock.now_ms();
        Arc::new(Controller {
            config,
            adapter: fake,
            registry,
            dispatcher,
            prober,
            autoscaler,
            clock,
            started_at_ms,
            timers: SyncMutex::new(Vec::new()),
            http_client: reqwest::Client::new(),
        })
    }

    #[tokio::test]
    async fn status_reports_zero_before_any_spawn() {
        let controller = controller_with_fake(test_config(), FakeClock::new(), Arc::new(FakeAdapter::new()));
        let status = controller.status();
        assert_eq!(status["total"], 0);
        assert_eq!(status["healthy"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_worker_evicts_on_warmup_timeout() {
        // FakeAdapter's entities never answer a real HTTP health probe
        // (no listener bound on the allocated port), so warm-up must fail
        // and the worker must not remain in the pool.
        let mut config = test_config();
        config.min_instances = 1;
        let controller = controller_with_fake(config, FakeClock::new(), Arc::new(FakeAdapter::new()));

        let result = controller.spawn_worker().await;
        assert!(result.is_err());
        assert_eq!(controller.registry.len(), 0);
    }

    #[tokio::test]
    async fn evict_worker_removes_from_pool_even_if_terminate_fails() {
        let fake = Arc::new(FakeAdapter::new());
        fake.set_fail_terminate(true);
        let controller = controller_with_fake(test_config(), FakeClock::new(), fake);

        let id = WorkerId::new();
        let handle = controller.adapter.create(6000, "w").await.unwrap();
        controller.registry.insert(Worker::new(id, 6000, handle, "w".into(), 0));

        controller.evict_worker(id).await;
        assert!(controller.registry.get(id).is_none());
    }

    #[tokio::test]
    async fn autoscaler_tick_scales_down_idle_worker_above_min() {
        let mut config = test_config();
        config.min_instances = 1;
        let fake = Arc::new(FakeAdapter::new());
        let clock = FakeClock::new();
        let controller = controller_with_fake(config, clock.clone(), fake.clone());

        // Two already-Running healthy workers, inserted directly (bypassing
        // spawn/warm-up, which this test isn't exercising).
        for port in [6100u16, 6101] {
            let handle = controller.adapter.create(port, &format!("w-{port}")).await.unwrap();
            let id = WorkerId::new();
            let mut w = Worker::new(id, port, handle, format!("w-{port}"), clock.now_ms());
            w.healthy = true;
            w.phase = Phase::Running;
            controller.registry.insert(w);
        }
        assert_eq!(controller.registry.len(), 2);

        clock.advance(Duration::from_millis(200));
        controller.run_autoscaler_tick().await;

        assert_eq!(controller.registry.len(), 1);
    }

    #[tokio::test]
    async fn prober_tick_evicts_worker_unhealthy_past_sixty_seconds() {
        let controller = controller_with_fake(test_config(), FakeClock::new(), Arc::new(FakeAdapter::new()));

        // No listener bound on this port: every probe fails transport-wise.
        let handle = controller.adapter.create(1, "w").await.unwrap();
        let id = WorkerId::new();
        let mut w = Worker::new(id, 1, handle, "w".into(), 0);
        w.phase = Phase::Running;
        w.healthy = false;
        w.last_healthy_ms = 0;
        controller.registry.insert(w);

        controller.clock.set_now_ms(crate::prober::UNHEALTHY_EVICTION_WINDOW.as_millis() as u64 + 1);
        controller.run_prober_tick().await;

        assert!(controller.registry.get(id).is_none());
    }
}
