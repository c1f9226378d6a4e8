//! `purcrdrd`: the PurCRDR renderer server binary. Parses CLI flags over a
//! TOML config (`config.rs`), opens the US (and optional WS) listeners,
//! then hands off to the event loop in `multiplexer.rs`: parse args, init
//! logging, load config, run until a signal arrives.

mod config;
mod dispatcher;
mod endpoint;
mod error;
mod multiplexer;
mod registry;
mod session;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::{TcpListener, UnixListener};
use tracing::{error, info};

use config::{Args, ServerConfig};
use state::ServerState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = ServerConfig::from_args(&args).context("loading server configuration")?;
    info!(us_path = ?config.listener.us_path, ws_port = ?config.listener.ws_port, "starting purcrdrd");

    if config.listener.us_path.exists() {
        std::fs::remove_file(&config.listener.us_path)
            .context("removing stale Unix-socket path")?;
    }
    let us_listener = UnixListener::bind(&config.listener.us_path)
        .with_context(|| format!("binding US listener at {:?}", config.listener.us_path))?;

    let ws_listener = match config.listener.ws_port {
        Some(port) => {
            let addr = format!("0.0.0.0:{port}");
            Some(
                TcpListener::bind(&addr)
                    .await
                    .with_context(|| format!("binding WS listener at {addr}"))?,
            )
        }
        None => None,
    };

    let state = ServerState::new(config);
    let run = multiplexer::run(state, us_listener, ws_listener);

    tokio::select! {
        _ = run => {}
        _ = wait_for_shutdown() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        other => {
            eprintln!("unknown log level {other:?}, defaulting to info");
            tracing::Level::INFO
        }
    };

    let subscriber = tracing_subscriber::fmt().with_max_level(level);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl-C handler");
    }
}
