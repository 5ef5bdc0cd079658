// SPDX-License-Identifier: MIT

//! Pool configuration.
//!
//! YAML/CLI parsing is out of scope for this module; it only materializes a
//! validated [`Config`] from already-resolved values (environment variables
//! here, stood in for whatever external loader the embedding binary uses).

use std::time::Duration;

use dynproxy_core::{ConfigError, ContainerConfig, ProcessConfig};

use crate::env;

/// Which runtime adapter backs the pool.
#[derive(Debug, Clone)]
pub enum Backend {
    Process(ProcessConfig),
    Container(ContainerConfig),
}

impl Backend {
    pub fn health_endpoint(&self) -> &str {
        match self {
            Backend::Process(p) => &p.health_endpoint,
            Backend::Container(c) => &c.health_endpoint,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Backend::Container(_))
    }
}

/// Pool-level scaling and timing configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub listen_port: u16,
    pub base_port: u16,
    pub min_instances: u32,
    pub max_instances: u32,
    pub check_interval: Duration,
    pub health_timeout: Duration,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub idle_timeout: Duration,
}

impl Config {
    /// Validate cross-field invariants. Fatal at startup, before the
    /// listener binds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_instances == 0 {
            return Err(ConfigError::MinInstancesZero(self.min_instances));
        }
        if self.min_instances > self.max_instances {
            return Err(ConfigError::InstanceBoundsInverted {
                min: self.min_instances,
                max: self.max_instances,
            });
        }
        Ok(())
    }

    /// Prober tick period: `min(checkInterval, 5000ms)`.
    pub fn prober_interval(&self) -> Duration {
        self.check_interval.min(Duration::from_millis(5000))
    }

    /// Warm-up probe window for the configured backend: 30s for
    /// containers, 10s for subprocesses.
    pub fn warmup_window(&self) -> Duration {
        if self.backend.is_container() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(10)
        }
    }

    /// Build configuration for a subprocess backend from environment
    /// variables and workspace defaults.
    pub fn load_process(command: impl Into<String>, entry_path: impl Into<String>) -> Result<Self, ConfigError> {
        let cfg = Self {
            backend: Backend::Process(ProcessConfig::new(command, entry_path)),
            listen_port: env::listen_port(),
            base_port: env::base_worker_port(),
            min_instances: env_u32("DYNPROXY_MIN_INSTANCES", 2),
            max_instances: env_u32("DYNPROXY_MAX_INSTANCES", 10),
            check_interval: Duration::from_millis(env_u64("DYNPROXY_CHECK_INTERVAL_MS", 5000)),
            health_timeout: Duration::from_millis(env_u64("DYNPROXY_HEALTH_TIMEOUT_MS", 2000)),
            scale_up_threshold: env_f64("DYNPROXY_SCALE_UP_THRESHOLD", 3.0),
            scale_down_threshold: env_f64("DYNPROXY_SCALE_DOWN_THRESHOLD", 0.5),
            idle_timeout: Duration::from_millis(env_u64("DYNPROXY_IDLE_TIMEOUT_MS", 30000)),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration for a container backend.
    pub fn load_container(image: impl Into<String>) -> Result<Self, ConfigError> {
        let cfg = Self {
            backend: Backend::Container(ContainerConfig::new(image)),
            listen_port: env::listen_port(),
            base_port: env::base_worker_port(),
            min_instances: env_u32("DYNPROXY_MIN_INSTANCES", 2),
            max_instances: env_u32("DYNPROXY_MAX_INSTANCES", 10),
            check_interval: Duration::from_millis(env_u64("DYNPROXY_CHECK_INTERVAL_MS", 5000)),
            health_timeout: Duration::from_millis(env_u64("DYNPROXY_HEALTH_TIMEOUT_MS", 2000)),
            scale_up_threshold: env_f64("DYNPROXY_SCALE_UP_THRESHOLD", 3.0),
            scale_down_threshold: env_f64("DYNPROXY_SCALE_DOWN_THRESHOLD", 0.5),
            idle_timeout: Duration::from_millis(env_u64("DYNPROXY_IDLE_TIMEOUT_MS", 30000)),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
