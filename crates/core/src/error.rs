// SPDX-License-Identifier: MIT

//! Shared error taxonomy.

use thiserror::Error;

/// Configuration errors. Fatal at startup, before the listener binds.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("minInstances ({min}) must be <= maxInstances ({max})")]
    InstanceBoundsInverted { min: u32, max: u32 },

    #[error("minInstances must be >= 1 (got {0})")]
    MinInstancesZero(u32),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}
