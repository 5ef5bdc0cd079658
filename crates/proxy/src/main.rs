// SPDX-License-Identifier: MIT

//! `dynproxyd`: binds a dynamically scaled pool of backend workers behind
//! one reverse-proxy listener.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dynproxy_core::SystemClock;
use dynproxy_proxy::error::LifecycleError;
use dynproxy_proxy::{Config, Controller};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dynproxyd", version, about = "Dynamically scaled reverse-proxy worker pool")]
struct Cli {
    #[command(subcommand)]
    backend: BackendArgs,
}

#[derive(Subcommand)]
enum BackendArgs {
    /// Run workers as local subprocesses.
    Process {
        /// Interpreter/binary to launch for each worker.
        command: String,
        /// Path to the worker entry point, passed as the first argument.
        entry_path: String,
    },
    /// Run workers as Docker containers.
    Container {
        /// Image to run for each worker.
        image: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Binds the listening proxy socket. Fatal at startup (spec.md §7).
async fn bind_listener(port: u16) -> Result<tokio::net::TcpListener, LifecycleError> {
    tokio::net::TcpListener::bind(("0.0.0.0", port)).await.map_err(LifecycleError::BindFailed)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.backend {
        BackendArgs::Process { command, entry_path } => Config::load_process(command.as_str(), entry_path.as_str()),
        BackendArgs::Container { image } => Config::load_container(image.as_str()),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let listen_port = config.listen_port;
    let controller = Arc::new(Controller::new(config, SystemClock));

    if let Err(e) = controller.initialize().await {
        tracing::error!(error = %e, "pool failed to initialize");
        return ExitCode::FAILURE;
    }

    let listener = match bind_listener(listen_port).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, port = listen_port, "failed to bind listener");
            controller.shutdown().await;
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(port = listen_port, "dynproxyd listening");

    let app = dynproxy_proxy::proxy_http::router(controller.clone());
    let serve_result = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;

    controller.shutdown().await;

    match serve_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server exited with error");
            ExitCode::FAILURE
        }
    }
}

/// Resolves once SIGINT or SIGTERM is received, used to drive axum's
/// graceful shutdown before the controller drains its worker pool.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
