// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod logfile;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use ferry_core::{
    AcpHost, AgentFacade, CircuitBreaker, ContextMonitor, ResourceGuard, SessionManager,
};
use ferry_rpc::{LineTransport, RpcEndpoint, RpcHandler};
use logfile::{BufferedMakeWriter, LogFileWriter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config errors must be precise and fatal: a bridge that silently
    // corrects PERMISSION_MODE would run with the wrong policy.
    let config = match ferry_config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("ferry: {e}");
            std::process::exit(1);
        }
    };

    let log_file = init_logging(&config);

    let selection = ferry_backend::select_backend(&config);
    if let Some(reason) = &selection.fallback_reason {
        info!(mode = selection.mode.as_str(), "backend fallback: {reason}");
    }

    let guard = Arc::new(ResourceGuard::new(config.limits.clone()));
    let monitor = Arc::new(ContextMonitor::new());
    let sessions = Arc::new(SessionManager::new(guard.clone(), config.permission_mode));
    let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));

    // Stdout carries protocol frames only; everything readable goes to
    // stderr or the log file.
    let transport = LineTransport::new(tokio::io::stdin(), tokio::io::stdout());
    let endpoint = RpcEndpoint::new(transport.writer());

    let facade = Arc::new(AgentFacade {
        sessions: sessions.clone(),
        guard,
        monitor: monitor.clone(),
        breaker,
        backend: selection.backend,
        host: Arc::new(AcpHost::new(endpoint.clone())),
        config: config.clone(),
    });

    if cli.diagnose {
        let mut report = facade.diagnose().await;
        report["backend"]["mode"] = serde_json::json!(selection.mode.as_str());
        report["backend"]["fallback_reason"] = serde_json::json!(selection.fallback_reason);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(
        backend = selection.mode.as_str(),
        permission_mode = config.permission_mode.as_str(),
        "ferry bridge started"
    );

    let _sweeper = monitor.clone().spawn_sweeper();
    if let Some(writer) = &log_file {
        spawn_log_flusher(writer.clone());
    }

    run_bridge(transport, endpoint, facade.clone(), &sessions).await;

    if let Some(writer) = &log_file {
        writer.flush();
    }
    info!("ferry bridge stopped");
    Ok(())
}

/// Pump inbound frames until EOF or a termination signal, then dispose every
/// session (cancelling in-flight turns), reject pending host calls, and
/// flush the transport.
async fn run_bridge(
    mut transport: LineTransport,
    endpoint: RpcEndpoint,
    facade: Arc<AgentFacade>,
    sessions: &SessionManager,
) {
    let handler: Arc<dyn RpcHandler> = facade;

    #[cfg(unix)]
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };

    loop {
        #[cfg(unix)]
        let terminated = sigterm.recv();
        #[cfg(not(unix))]
        let terminated = std::future::pending::<Option<()>>();

        tokio::select! {
            frame = transport.recv() => match frame {
                Some(frame) => endpoint.dispatch(frame, handler.clone()),
                None => {
                    info!("stdin closed; shutting down");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT; shutting down");
                break;
            }
            _ = terminated => {
                info!("SIGTERM; shutting down");
                break;
            }
        }
    }

    sessions.dispose_all();
    endpoint.shutdown();
    transport.shutdown().await;
}

/// Stderr logging, plus a buffered duplicate file when `LOG_FILE` is set.
fn init_logging(config: &ferry_config::Config) -> Option<Arc<LogFileWriter>> {
    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let file_writer = config.log_file.as_ref().map(|path| {
        Arc::new(LogFileWriter::new(path.clone()))
    });
    let file_layer = file_writer.as_ref().map(|writer| {
        fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(BufferedMakeWriter(writer.clone()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    file_writer
}

/// Time-based flushing for the duplicate log file (the 5-second half of the
/// flush contract; the entry-count half lives in the writer).
fn spawn_log_flusher(writer: Arc<LogFileWriter>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            writer.flush();
        }
    });
}
