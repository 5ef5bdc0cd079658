// SPDX-License-Identifier: MIT

//! Local subprocess runtime adapter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dynproxy_core::ProcessConfig;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::process::Child;

use crate::error::AdapterError;

use super::{Handle, RuntimeAdapter, RuntimeState};

/// Grace window before a subprocess is force-killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Runs each worker as a local child process: `<command> <entry_path> --port <n>`.
///
/// Subprocess backends cannot reclaim orphans across restarts:
/// [`list_owned`](RuntimeAdapter::list_owned) always returns an empty list.
pub struct ProcessAdapter {
    config: ProcessConfig,
    children: Arc<Mutex<HashMap<String, Child>>>,
}

impl ProcessAdapter {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config, children: Arc::new(Mutex::new(HashMap::new())) }
    }
}

#[async_trait]
impl RuntimeAdapter for ProcessAdapter {
    async fn prepare(&self) -> Result<(), AdapterError> {
        // No image to pull for a local interpreter; existence is verified at spawn time.
        Ok(())
    }

    async fn create(&self, port: u16, _name: &str) -> Result<Handle, AdapterError> {
        let mut cmd = tokio::process::Command::new(&self.config.command);
        cmd.arg(&self.config.entry_path);
        cmd.args(["--port", &port.to_string()]);
        for (k, v) in &self.config.env {
            cmd.env(k, v);
        }
        cmd.kill_on_drop(false);
        cmd.stdout(std::process::Stdio::null());
        cmd.stderr(std::process::Stdio::null());

        let child = cmd
            .spawn()
            .map_err(|e| AdapterError::CreateFailed(format!("spawn failed: {e}")))?;
        let pid = child.id().ok_or_else(|| AdapterError::CreateFailed("child exited immediately".into()))?;
        let native_id = pid.to_string();

        self.children.lock().insert(native_id.clone(), child);
        Ok(Handle::new(native_id, port))
    }

    async fn terminate(&self, handle: &Handle) -> Result<(), AdapterError> {
        let pid: i32 = handle
            .native_id
            .parse()
            .map_err(|_| AdapterError::TerminateFailed(format!("invalid pid: {}", handle.native_id)))?;

        // Best-effort: the child may already have exited (idempotent terminate).
        let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);

        let deadline = tokio::time::Instant::now() + TERMINATE_GRACE;
        loop {
            let exited = {
                let mut children = self.children.lock();
                match children.get_mut(&handle.native_id) {
                    Some(child) => matches!(child.try_wait(), Ok(Some(_)) | Err(_)),
                    None => true,
                }
            };
            if exited || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let mut children = self.children.lock();
        if let Some(child) = children.get_mut(&handle.native_id) {
            if !matches!(child.try_wait(), Ok(Some(_))) {
                let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
                let _ = child.start_kill();
            }
        }
        children.remove(&handle.native_id);
        Ok(())
    }

    async fn state(&self, handle: &Handle) -> RuntimeState {
        let mut children = self.children.lock();
        match children.get_mut(&handle.native_id) {
            Some(child) => match child.try_wait() {
                Ok(Some(_)) => RuntimeState::Exited,
                Ok(None) => RuntimeState::Running,
                Err(_) => RuntimeState::NotFound,
            },
            None => RuntimeState::NotFound,
        }
    }

    async fn list_owned(&self) -> Result<Vec<String>, AdapterError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_terminate_long_running_process() {
        // `yes` loops forever echoing its arguments, ignoring `--port <n>`.
        let config = ProcessConfig::new("yes", "");
        let adapter = ProcessAdapter::new(config);
        let handle = adapter.create(9999, "worker-9999").await.expect("spawn yes");
        assert_eq!(adapter.state(&handle).await, RuntimeState::Running);
        adapter.terminate(&handle).await.expect("terminate");
    }

    #[tokio::test]
    async fn list_owned_is_always_empty() {
        let adapter = ProcessAdapter::new(ProcessConfig::new("true", ""));
        assert!(adapter.list_owned().await.unwrap().is_empty());
    }
}
