// SPDX-License-Identifier: MIT

//! Centralized environment variable access, one small accessor function
//! per setting with its default baked in.

use std::time::Duration;

/// Listening proxy port, default 4000.
pub fn listen_port() -> u16 {
    env_parse("DYNPROXY_LISTEN_PORT").unwrap_or(4000)
}

/// Base port for the worker port allocator, default 5001.
pub fn base_worker_port() -> u16 {
    env_parse("DYNPROXY_BASE_PORT").unwrap_or(5001)
}

/// Graceful-shutdown deadline, default 10s.
pub fn shutdown_timeout() -> Duration {
    env_parse("DYNPROXY_SHUTDOWN_TIMEOUT_MS").map(Duration::from_millis).unwrap_or(Duration::from_secs(10))
}

/// Per-upstream-request timeout, fixed at 30s.
pub fn upstream_timeout() -> Duration {
    Duration::from_secs(30)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
