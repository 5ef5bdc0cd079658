// SPDX-License-Identifier: MIT

//! Container backend configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Image pull policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    Always,
    #[default]
    Missing,
    Never,
}

/// Container runtime configuration carried by the Controller into the
/// container-backed runtime adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Container image to run.
    pub image: String,
    /// Port the worker process listens on inside the container.
    pub container_port: u16,
    /// Environment variables forwarded into the container.
    pub env: Vec<(String, String)>,
    /// Bind mounts, `host:container[:ro]`.
    pub volumes: Vec<String>,
    /// Optional user-defined network to attach the container to.
    pub network: Option<String>,
    /// Name prefix used for ownership (`<prefix>-<short(id)>`) and orphan reclaim.
    pub name_prefix: String,
    /// Health probe path.
    pub health_endpoint: String,
    /// Image pull policy.
    pub pull_policy: PullPolicy,
}

impl ContainerConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            container_port: 8080,
            env: Vec::new(),
            volumes: Vec::new(),
            network: None,
            name_prefix: "dynproxy".to_string(),
            health_endpoint: "/health".to_string(),
            pull_policy: PullPolicy::Missing,
        }
    }
}

/// Subprocess backend configuration: interpreter + entry script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Interpreter/binary to launch (e.g. `node`, `python3`).
    pub command: String,
    /// Path to the worker entry point, passed as the first argument.
    pub entry_path: String,
    /// Extra environment variables forwarded to the child.
    pub env: HashMap<String, String>,
    /// Health probe path.
    pub health_endpoint: String,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>, entry_path: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            entry_path: entry_path.into(),
            env: HashMap::new(),
            health_endpoint: "/health".to_string(),
        }
    }
}
