// SPDX-License-Identifier: MIT

//! In-memory [`RuntimeAdapter`] test double: no subprocess or container is
//! ever spawned. Used by the registry/prober/autoscaler/controller test
//! suites so they can exercise scaling and eviction decisions deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::AdapterError;

use super::{Handle, RuntimeAdapter, RuntimeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeEntity {
    Running,
    Exited,
}

/// Fake runtime adapter with controllable `create`/`terminate` outcomes.
pub struct FakeAdapter {
    entities: Mutex<HashMap<String, FakeEntity>>,
    next_id: AtomicU64,
    fail_create: Arc<std::sync::atomic::AtomicBool>,
    fail_terminate: Arc<std::sync::atomic::AtomicBool>,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self {
            entities: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fail_create: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            fail_terminate: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_terminate(&self, fail: bool) {
        self.fail_terminate.store(fail, Ordering::SeqCst);
    }

    /// Force an entity to report `Exited` without going through `terminate`,
    /// simulating an out-of-band crash.
    pub fn kill_externally(&self, native_id: &str) {
        if let Some(entity) = self.entities.lock().get_mut(native_id) {
            *entity = FakeEntity::Exited;
        }
    }

    pub fn live_count(&self) -> usize {
        self.entities.lock().values().filter(|e| **e == FakeEntity::Running).count()
    }
}

#[async_trait]
impl RuntimeAdapter for FakeAdapter {
    async fn prepare(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn create(&self, port: u16, _name: &str) -> Result<Handle, AdapterError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AdapterError::CreateFailed("fake create failure injected".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let native_id = format!("fake-{id}");
        self.entities.lock().insert(native_id.clone(), FakeEntity::Running);
        Ok(Handle::new(native_id, port))
    }

    async fn terminate(&self, handle: &Handle) -> Result<(), AdapterError> {
        if self.fail_terminate.load(Ordering::SeqCst) {
            return Err(AdapterError::TerminateFailed("fake terminate failure injected".into()));
        }
        self.entities.lock().insert(handle.native_id.clone(), FakeEntity::Exited);
        Ok(())
    }

    async fn state(&self, handle: &Handle) -> RuntimeState {
        match self.entities.lock().get(&handle.native_id) {
            Some(FakeEntity::Running) => RuntimeState::Running,
            Some(FakeEntity::Exited) => RuntimeState::Exited,
            None => RuntimeState::NotFound,
        }
    }

    async fn list_owned(&self) -> Result<Vec<String>, AdapterError> {
        Ok(self
            .entities
            .lock()
            .iter()
            .filter(|(_, e)| **e == FakeEntity::Running)
            .map(|(id, _)| id.clone())
            .collect())
    }
}
