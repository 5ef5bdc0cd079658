// SPDX-License-Identifier: MIT

//! Worker Record & Registry — the pool of backend workers.
//!
//! The sole owner of mutations to a Worker's fields. Readers (the Prober,
//! the Autoscaler, `/lb-status`) take a [`snapshot`](Registry::snapshot)
//! clone instead of holding the map open across a suspension point.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use dashmap::DashMap;
use dynproxy_core::{Phase, WorkerId};
use parking_lot::Mutex;

use crate::adapter::Handle;

/// A single backend worker and its live dispatch state.
#[derive(Debug, Clone)]
pub struct Worker {
    pub id: WorkerId,
    pub port: u16,
    pub handle: Handle,
    pub name: String,
    pub phase: Phase,
    pub healthy: bool,
    pub last_healthy_ms: u64,
    pub active_requests: u64,
    pub total_requests: u64,
    pub last_request_ms: u64,
    pub response_time_ms: u64,
    /// Insertion sequence, used for "earliest insertion" tie-breaks.
    pub inserted_at: u64,
}

impl Worker {
    pub fn new(id: WorkerId, port: u16, handle: Handle, name: String, now_ms: u64) -> Self {
        Self {
            id,
            port,
            handle,
            name,
            phase: Phase::Starting,
            healthy: false,
            last_healthy_ms: now_ms,
            active_requests: 0,
            total_requests: 0,
            last_request_ms: now_ms,
            response_time_ms: 0,
            inserted_at: 0,
        }
    }

    /// `load(w) = active_requests(w) + max(0, (response_time_ms(w) − 100) / 1000)`.
    pub fn load(&self) -> f64 {
        self.active_requests as f64 + ((self.response_time_ms as f64 - 100.0) / 1000.0).max(0.0)
    }

    pub fn is_healthy_running(&self) -> bool {
        self.healthy && self.phase.is_running()
    }
}

/// The ordered multiset of Worker records.
///
/// Dispatch order is immaterial; iteration order for status reporting is
/// kept stable via [`Worker::inserted_at`].
pub struct Registry {
    workers: DashMap<WorkerId, Worker>,
    port_counter: AtomicU16,
    insertion_counter: AtomicU64,
    /// Serializes `pick + increment` so two concurrent dispatches never both
    /// observe the same worker as least-loaded-with-zero-active.
    dispatch_lock: Mutex<()>,
}

impl Registry {
    pub fn new(base_port: u16) -> Self {
        Self {
            workers: DashMap::new(),
            port_counter: AtomicU16::new(base_port),
            insertion_counter: AtomicU64::new(0),
            dispatch_lock: Mutex::new(()),
        }
    }

    /// Monotonic port allocator: ports are never reused within a
    /// controller's lifetime.
    pub fn allocate_port(&self) -> u16 {
        self.port_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn insert(&self, mut worker: Worker) {
        worker.inserted_at = self.insertion_counter.fetch_add(1, Ordering::SeqCst);
        self.workers.insert(worker.id, worker);
    }

    pub fn remove(&self, id: WorkerId) -> Option<Worker> {
        self.workers.remove(&id).map(|(_, w)| w)
    }

    pub fn get(&self, id: WorkerId) -> Option<Worker> {
        self.workers.get(&id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stable-order clone of the pool for readers that must not hold the map
    /// open across suspension points.
    pub fn snapshot(&self) -> Vec<Worker> {
        let mut workers: Vec<Worker> = self.workers.iter().map(|e| e.value().clone()).collect();
        workers.sort_by_key(|w| w.inserted_at);
        workers
    }

    /// Scoped mutation of a single Worker's fields. Returns `false` if the
    /// worker is no longer in the pool (already evicted).
    pub fn mutate(&self, id: WorkerId, f: impl FnOnce(&mut Worker)) -> bool {
        match self.workers.get_mut(&id) {
            Some(mut entry) => {
                f(&mut entry);
                true
            }
            None => false,
        }
    }

    /// Select the minimum-load healthy+Running Worker, tie-breaking on
    /// earliest insertion, and increment its `active_requests`/
    /// `total_requests` atomically with the selection.
    pub fn pick_and_dispatch(&self, now_ms: u64) -> Option<Worker> {
        let _guard = self.dispatch_lock.lock();

        let chosen_id = self
            .workers
            .iter()
            .filter(|e| e.value().is_healthy_running())
            .min_by(|a, b| {
                a.value()
                    .load()
                    .partial_cmp(&b.value().load())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.value().inserted_at.cmp(&b.value().inserted_at))
            })
            .map(|e| *e.key())?;

        let mut entry = self.workers.get_mut(&chosen_id)?;
        entry.active_requests = entry.active_requests.saturating_add(1);
        entry.total_requests = entry.total_requests.saturating_add(1);
        entry.last_request_ms = now_ms;
        Some(entry.clone())
    }

    /// Saturating decrement, run exactly once per dispatched request on
    /// whichever exit path fires.
    pub fn release(&self, id: WorkerId) {
        self.mutate(id, |w| {
            w.active_requests = w.active_requests.saturating_sub(1);
        });
    }
}
