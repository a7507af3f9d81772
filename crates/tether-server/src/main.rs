//! Tether binary: serves the application and runs migration commands.
//!
//! Starts an axum HTTP server with structured logging and graceful shutdown
//! on SIGTERM/SIGINT, or runs one migration command and exits.

use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use tether_db::{ConnectHook, Database};
use tether_debug::{install_profiler, DebugState};
use tether_server::cli::{self, Cli, Command};
use tether_server::config::{self, Config};
use tether_server::{app, Tether, TetherError};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::load_config(Some(&cli.config)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {e}", cli.config);
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::debug!(path = %cli.config, "resolved startup configuration path");

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Serve => serve(config).await,
        Command::Migration(command) => {
            let tether = Tether::init(config.database)?;
            cli::run(command, &tether)?;
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let debug_secret = if config.debug.enabled {
        let secret = config.debug.secret_key.clone().ok_or_else(|| {
            TetherError::InvalidConfiguration(
                "debug.secret_key is required when the debug panel is enabled".to_string(),
            )
        })?;
        Some(secret)
    } else {
        None
    };

    let hook: Option<ConnectHook> = debug_secret.as_ref().map(|_| install_profiler as ConnectHook);
    let database = Database::open_with_hook(
        &config.database.uri,
        &config.database.connection_params,
        hook,
    )
    .map_err(TetherError::from)?;
    let tether = Tether::with_database(config.database, database.clone())?;

    let debug = debug_secret.map(|secret| {
        tracing::warn!("SQL debug panel enabled at /_debug/queries");
        DebugState::new(database, &secret)
    });

    let app = app(&tether, debug);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, manual = tether.is_manual(), "starting tether server");

    let listener = TcpListener::bind(addr).await?;

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("tether server shut down");
    Ok(())
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
