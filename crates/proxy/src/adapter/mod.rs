// SPDX-License-Identifier: MIT

//! Worker Runtime Adapter.
//!
//! Two interchangeable backends — local subprocess ([`process`]) and
//! container ([`container`]) — share this single contract so every upper
//! layer (registry, prober, autoscaler, controller) is parameterized by the
//! adapter and never by backend kind.

pub mod container;
pub mod process;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;

use crate::error::AdapterError;

/// Opaque reference to the subprocess or container backing a Worker,
/// embedding a runtime-native identifier (PID or short container ID).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    /// PID (subprocess) or short container ID (container).
    pub native_id: String,
    /// The port the worker was created with; adapters use this to build the
    /// health/proxy URL without a registry lookup.
    pub port: u16,
}

impl Handle {
    pub fn new(native_id: impl Into<String>, port: u16) -> Self {
        Self { native_id: native_id.into(), port }
    }
}

/// Four-value summary of a runtime entity's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Starting,
    Running,
    Exited,
    NotFound,
}

/// Abstraction over the two supported worker backends.
///
/// Implementations must be `Send + Sync + 'static` so a single adapter
/// instance can be shared behind an `Arc` across the prober, autoscaler,
/// and controller.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync + 'static {
    /// Image pull (container) or no-op (subprocess), per `pull_policy`.
    /// `always` fails the controller on pull failure; `missing` pulls and
    /// logs on failure but continues; `never` skips.
    async fn prepare(&self) -> Result<(), AdapterError>;

    /// Start a worker bound to `port` on localhost, named `name` (the
    /// container backend uses this verbatim as the `--name` flag so the
    /// running container's name matches the Worker record's `name`; the
    /// subprocess backend ignores it, having no naming surface of its own).
    /// Returns a handle embedding a runtime-native identifier.
    async fn create(&self, port: u16, name: &str) -> Result<Handle, AdapterError>;

    /// Initiate graceful termination, waiting up to a grace window before
    /// force-killing. Idempotent: terminating an already-gone entity is not
    /// an error.
    async fn terminate(&self, handle: &Handle) -> Result<(), AdapterError>;

    /// Query the runtime for the current state of `handle`.
    async fn state(&self, handle: &Handle) -> RuntimeState;

    /// Enumerate runtime entities matching this adapter's ownership marker.
    /// Used once during startup for orphan reclaim (container backend
    /// only; subprocess backends return an empty list since they cannot
    /// reclaim orphans).
    async fn list_owned(&self) -> Result<Vec<String>, AdapterError>;
}
