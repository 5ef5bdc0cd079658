// SPDX-License-Identifier: MIT

//! Docker container runtime adapter.

use async_trait::async_trait;
use dynproxy_core::{ContainerConfig, PullPolicy};

use crate::error::AdapterError;

use super::{Handle, RuntimeAdapter, RuntimeState};

/// Runs each worker as a detached Docker container, publishing
/// `host_port:container_port`. Ownership is tracked by name prefix
/// (`<prefix>-<short(id)>`), which also drives orphan reclaim via
/// [`list_owned`](RuntimeAdapter::list_owned).
pub struct ContainerAdapter {
    config: ContainerConfig,
}

impl ContainerAdapter {
    pub fn new(config: ContainerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RuntimeAdapter for ContainerAdapter {
    async fn prepare(&self) -> Result<(), AdapterError> {
        match self.config.pull_policy {
            PullPolicy::Never => Ok(()),
            PullPolicy::Always => {
                run_docker(&["pull", &self.config.image])
                    .await
                    .map_err(AdapterError::PullFailed)?;
                Ok(())
            }
            PullPolicy::Missing => {
                if let Err(e) = run_docker(&["pull", &self.config.image]).await {
                    tracing::warn!(image = %self.config.image, error = %e, "image pull failed, continuing");
                }
                Ok(())
            }
        }
    }

    async fn create(&self, port: u16, name: &str) -> Result<Handle, AdapterError> {
        let name = name.to_string();
        let port_mapping = format!("{}:{}", port, self.config.container_port);

        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            name.clone(),
            "-p".into(),
            port_mapping,
            "--restart".into(),
            "unless-stopped".into(),
        ];

        for (k, v) in &self.config.env {
            args.push("-e".into());
            args.push(format!("{k}={v}"));
        }
        for vol in &self.config.volumes {
            args.push("-v".into());
            args.push(vol.clone());
        }
        if let Some(network) = &self.config.network {
            args.push("--network".into());
            args.push(network.clone());
        }
        args.push(self.config.image.clone());

        tracing::info!(%name, port, image = %self.config.image, "spawning container");

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let container_id = run_docker(&arg_refs).await.map_err(AdapterError::CreateFailed)?;
        let short_id = container_id.chars().take(12).collect::<String>();

        Ok(Handle::new(short_id, port))
    }

    async fn terminate(&self, handle: &Handle) -> Result<(), AdapterError> {
        // Idempotent: `stop`/`rm -f` on an already-gone container is not an error.
        let _ = run_docker(&["stop", &handle.native_id]).await;
        run_docker(&["rm", "-f", &handle.native_id]).await.map_err(AdapterError::TerminateFailed)?;
        Ok(())
    }

    async fn state(&self, handle: &Handle) -> RuntimeState {
        match run_docker(&["inspect", "--format", "{{.State.Status}}", &handle.native_id]).await {
            Ok(status) => map_state(status.trim()),
            Err(_) => RuntimeState::NotFound,
        }
    }

    async fn list_owned(&self) -> Result<Vec<String>, AdapterError> {
        let filter = format!("name={}", self.config.name_prefix);
        let output = run_docker(&["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"])
            .await
            .map_err(AdapterError::CommandFailed)?;
        Ok(output.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }
}

/// Maps docker's seven-value container status vocabulary down to the
/// four-value [`RuntimeState`] summary.
fn map_state(status: &str) -> RuntimeState {
    match status {
        "created" | "restarting" => RuntimeState::Starting,
        "running" | "paused" => RuntimeState::Running,
        "exited" | "dead" | "removing" => RuntimeState::Exited,
        _ => RuntimeState::NotFound,
    }
}

/// Run a docker CLI command and return trimmed stdout on success.
async fn run_docker(args: &[&str]) -> Result<String, String> {
    let output = tokio::process::Command::new("docker")
        .args(args)
        .output()
        .await
        .map_err(|e| format!("failed to exec docker: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!("docker {} failed: {}", args.first().unwrap_or(&""), stderr.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_all_seven_docker_states() {
        assert_eq!(map_state("created"), RuntimeState::Starting);
        assert_eq!(map_state("restarting"), RuntimeState::Starting);
        assert_eq!(map_state("running"), RuntimeState::Running);
        assert_eq!(map_state("paused"), RuntimeState::Running);
        assert_eq!(map_state("exited"), RuntimeState::Exited);
        assert_eq!(map_state("dead"), RuntimeState::Exited);
        assert_eq!(map_state("removing"), RuntimeState::Exited);
        assert_eq!(map_state("bogus"), RuntimeState::NotFound);
    }
}
