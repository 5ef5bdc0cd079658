// SPDX-License-Identifier: MIT

//! Error taxonomy for the runtime adapter and controller.

use thiserror::Error;

/// Errors from [`crate::adapter::RuntimeAdapter`] operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("runtime entity not found: {0}")]
    NotFound(String),
    #[error("create failed: {0}")]
    CreateFailed(String),
    #[error("terminate failed: {0}")]
    TerminateFailed(String),
    #[error("image pull failed: {0}")]
    PullFailed(String),
    #[error("runtime command failed: {0}")]
    CommandFailed(String),
}

/// Errors from [`crate::controller::Controller`] lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Config(#[from] dynproxy_core::ConfigError),
    #[error("listener bind failed: {0}")]
    BindFailed(#[source] std::io::Error),
    #[error("no workers could be spawned during initialization")]
    NoWorkersSpawned,
}
