mod http;

use axum::Router;
use clap::Parser;
use gatekeeper_core::config::GateConfig;
use gatekeeper_core::error::GateError;
use gatekeeper_core::fsm::Graph;
use gatekeeper_core::state::run_rotation;
use gatekeeper_core::template::Template;
use gatekeeper_core::{clock::Clock, GateState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Reverse-proxy admission gate fronting an origin with client-side proof-of-work.
#[derive(Parser, Debug)]
#[command(name = "gatekeeper", version)]
struct Cli {
    /// Comma-separated list of addresses to listen on.
    #[arg(long, env = "GATEKEEPER_LISTEN_ADDRS", default_value = "0.0.0.0:8098")]
    listen_addrs: String,

    /// TOML config file. Unset fields fall back to built-in defaults.
    #[arg(long, env = "GATEKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Challenge page template, containing the `CHALLENGEPLACEHOLDER` marker.
    #[arg(long, env = "GATEKEEPER_TEMPLATE")]
    template: PathBuf,

    /// Address of the protected origin. Requests that clear admission are
    /// forwarded here; omit to run in admission-only mode.
    #[arg(long, env = "GATEKEEPER_ORIGIN")]
    origin: Option<SocketAddr>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "gatekeeper=info,tower_http=info".into()))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), GateError> {
    let config = match &cli.config {
        Some(path) => GateConfig::from_file(path)?,
        None => GateConfig::default(),
    };

    let clock = Clock::new();
    clock.spawn_updater();

    let gate = GateState::bootstrap(config, clock);
    tokio::spawn(run_rotation(gate.clone()));

    let template = Template::load(&cli.template, gate.config.pbkdf2_iterations)?;
    let graph = Graph::build()?;

    let app_state = Arc::new(http::AppState::new(gate, template, graph, cli.origin));
    let app = Router::new()
        .fallback(http::handle)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addrs: Vec<SocketAddr> = cli
        .listen_addrs
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<SocketAddr>().unwrap_or_else(|e| {
                error!(addr = s, error = %e, "invalid listen address");
                std::process::exit(1);
            })
        })
        .collect();

    let mut tasks = Vec::with_capacity(addrs.len());
    for addr in addrs {
        let app = app.clone();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GateError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        info!(%addr, "listening");
        tasks.push(tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(shutdown_signal())
                .await
        }));
    }

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "listener task panicked");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
}
