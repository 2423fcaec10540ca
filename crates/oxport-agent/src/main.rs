use anyhow::{Context, Result};
use oxport_agent::config::{self, AgentConfig};
use oxport_agent::credentials::ProcessEnv;
use oxport_agent::{app, scheduler, tasks};
use oxport_registry::MetricStore;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  oxport-agent [config.toml]    Start the agent (default: $CONFIG or config/agent.toml)");
    eprintln!("  oxport-agent --version        Print the version");
}

#[tokio::main]
async fn main() -> Result<()> {
    let arg = std::env::args().nth(1);
    match arg.as_deref() {
        Some("--version" | "-V") => {
            println!("oxport-agent {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        _ => {}
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("oxport=info".parse()?))
        .init();

    let config_path = config::resolve_config_path(arg, std::env::var("CONFIG").ok());
    let config = AgentConfig::load(&config_path)?;
    let addr = config::listen_addr(std::env::var("HOST").ok(), std::env::var("PORT").ok())?;
    tracing::info!(config = %config_path, version = env!("CARGO_PKG_VERSION"), "oxport-agent starting");

    let store = Arc::new(MetricStore::new());
    let poll_tasks = tasks::build_tasks(&config, &store, &ProcessEnv)?;
    if poll_tasks.is_empty() {
        tracing::warn!("No collectors enabled; only the health endpoints will be useful");
    }

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let handles: Vec<_> = poll_tasks.into_iter().map(scheduler::spawn).collect();
    tracing::info!(addr = %addr, tasks = handles.len(), "Serving metrics");

    let server = axum::serve(listener, app::build_app(Arc::clone(&store)));
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    for handle in handles {
        handle.abort();
    }
    Ok(())
}
