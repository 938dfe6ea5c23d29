//! modipc - local IPC for mod-loading hosts
//!
//! CLI entry point for serving the endpoint and querying a running host.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{info, warn};

use modipc::cli::{Cli, Command, OutputFormat};
use modipc::config::Config;
use modipc::ipc::{EndpointName, IpcClient, IpcService, ServiceState, ShutdownMode, platform_endpoint};
use modipc::router::MessageRouter;

fn setup_logging(level: &str) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("modipc")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let level = match tracing::Level::from_str(level) {
        Ok(level) => level,
        Err(_) => {
            eprintln!("{} unknown log level '{}', using info", "warning:".yellow(), level);
            tracing::Level::INFO
        }
    };

    // Append: a client command must not truncate the log of a running host
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("modipc.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    let level = cli.log_level.as_deref().or(config.log_level.as_deref()).unwrap_or("info");
    setup_logging(level).context("Failed to setup logging")?;

    let name = cli
        .name
        .clone()
        .map(EndpointName::new)
        .unwrap_or_else(|| config.endpoint.name.clone());

    info!(endpoint = %name, "modipc loaded config");

    match cli.command {
        Some(Command::Serve) => cmd_serve(&config, name).await,
        Some(Command::Send { request }) => cmd_send(name, &request).await,
        Some(Command::Ping) => cmd_ping(name).await,
        Some(Command::Status { format }) => cmd_status(name, format).await,
        Some(Command::Endpoint) => cmd_endpoint(&name),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Run the host IPC service until SIGINT/SIGTERM
async fn cmd_serve(config: &Config, name: EndpointName) -> Result<()> {
    let state = ServiceState::new();
    let router = Arc::new(MessageRouter::with_builtins(state.clone()));
    let endpoint = platform_endpoint(name.clone(), config.endpoint.buffer_size);

    let mut handle = IpcService::start(endpoint, router, state, config.service_config())
        .context("Failed to start IPC service")?;
    println!("modipc serving on {}", name.address());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let stopped = tokio::select! {
        result = &mut shutdown => {
            result?;
            None
        }
        result = handle.wait() => Some(result),
    };

    // The host outlives its IPC service
    if let Some(result) = stopped {
        match result {
            Err(e) => {
                warn!(error = %e, "IPC unavailable, host keeps running");
                eprintln!("{} IPC unavailable: {}", "warning:".yellow(), e);
            }
            Ok(()) => warn!("IPC dispatcher stopped, host keeps running"),
        }
        (&mut shutdown).await?;
    }

    println!("Shutting down...");
    handle.shutdown(ShutdownMode::Drain).await?;
    info!("modipc stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")
}

/// Send a raw request and print the reply
async fn cmd_send(name: EndpointName, request: &str) -> Result<()> {
    let client = IpcClient::new(name);
    let reply = client.send_raw(request.as_bytes()).await?;
    if reply.is_empty() {
        return Err(eyre::eyre!("Host closed the connection without replying"));
    }
    println!("{}", reply);
    Ok(())
}

async fn cmd_ping(name: EndpointName) -> Result<()> {
    let client = IpcClient::new(name);
    let version = client.ping().await?;
    println!("{} host {}", "ok".green(), version);
    Ok(())
}

/// Show the host's IPC health
async fn cmd_status(name: EndpointName, format: OutputFormat) -> Result<()> {
    let client = IpcClient::new(name.clone());
    let status = client.status().await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Text => {
            let alive = status["alive"].as_bool().unwrap_or(false);
            let lifecycle = &status["lifecycle"];

            println!("modipc Status");
            println!("-------------");
            println!("Endpoint: {}", name.address());
            if alive {
                println!("IPC: {}", "alive".green());
            } else {
                println!("IPC: {}", "down".red());
            }
            println!(
                "Instances: created {}, connected {}, closed {}, open {}",
                lifecycle["created"], lifecycle["connected"], lifecycle["closed"], lifecycle["open"]
            );
        }
    }

    Ok(())
}

fn cmd_endpoint(name: &EndpointName) -> Result<()> {
    println!("{}", name.address());
    Ok(())
}
