//! Loophole - Local SOCKS5 Proxy
//!
//! This is the main entry point for the Loophole application.

use anyhow::{Context, Result};
use clap::Parser;
use loophole::config::{load_config, Config};
use loophole::server::{EventSink, NoopSink, Socks5Server};
use loophole::stats::{spawn_ticker, TrafficLogger};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Loophole - local SOCKS5 proxy
#[derive(Parser, Debug)]
#[command(name = "loophole")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to listen on
    #[arg(short = 'a', long)]
    address: Option<IpAddr>,

    /// Listen on this local socket instead of TCP (Unix only)
    #[arg(short = 'l', long, value_name = "PATH")]
    local: Option<PathBuf>,

    /// Print a traffic status line every second
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

impl Args {
    /// File configuration with command line overrides applied
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => Config::default(),
        };
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(address) = self.address {
            config.server.bind_addr = address;
        }
        if let Some(local) = &self.local {
            config.server.local_socket = Some(local.clone());
        }
        config
            .server
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    let config = args.resolve_config()?;

    info!("Loophole v{}", loophole::VERSION);
    if let Some(path) = &args.config {
        info!("Configuration loaded from: {:?}", path);
    }

    let logger = args.verbose.then(|| Arc::new(TrafficLogger::new()));
    let sink: Arc<dyn EventSink> = match &logger {
        Some(logger) => logger.clone() as Arc<dyn EventSink>,
        None => Arc::new(NoopSink),
    };

    let ticker = logger.map(|logger| spawn_ticker(logger, Duration::from_secs(1)));

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C and termination signals (cross-platform)
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    match &config.server.local_socket {
        Some(path) => run_local(path, &config, sink, shutdown_rx).await?,
        None => {
            let server = Socks5Server::bind(&config.server, sink)
                .await
                .with_context(|| "Failed to start SOCKS5 proxy")?;
            info!("Accepting SOCKS5 clients on port {}", server.port());
            server.run(shutdown_rx).await?;
        }
    }

    if let Some(ticker) = ticker {
        ticker.abort();
    }
    Ok(())
}

#[cfg(unix)]
async fn run_local(
    path: &Path,
    config: &Config,
    sink: Arc<dyn EventSink>,
    shutdown_rx: broadcast::Receiver<bool>,
) -> Result<()> {
    let server = Socks5Server::bind_local(path, &config.server, sink)
        .await
        .with_context(|| "Failed to start SOCKS5 proxy")?;
    info!("Accepting SOCKS5 clients on {}", path.display());
    server.run(shutdown_rx).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn run_local(
    path: &Path,
    _config: &Config,
    _sink: Arc<dyn EventSink>,
    _shutdown_rx: broadcast::Receiver<bool>,
) -> Result<()> {
    anyhow::bail!("Local socket {} is only supported on Unix", path.display())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down...");
                    }
                }
                return;
            }
            Err(e) => warn!("Failed to setup SIGTERM handler: {}", e),
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down...");
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["loophole"]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config, Config::default());
        assert!(!args.verbose);
    }

    #[test]
    fn test_args_override_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[server]\nport = 1080\nbind_addr = \"0.0.0.0\"\n")
            .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let args = Args::parse_from(["loophole", "-c", &path, "-p", "9050", "-v"]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.server.port, 9050);
        assert_eq!(config.server.bind_addr, "0.0.0.0".parse::<IpAddr>().unwrap());
        assert!(args.verbose);
    }

    #[cfg(unix)]
    #[test]
    fn test_args_local_socket_and_log_level() {
        let args = Args::parse_from(["loophole", "-l", "/tmp/loophole.sock", "-L", "debug"]);
        assert_eq!(args.log_level, "debug");
        let config = args.resolve_config().unwrap();
        assert_eq!(
            config.server.local_socket,
            Some(PathBuf::from("/tmp/loophole.sock"))
        );

        let args = Args::parse_from(["loophole", "--local", "/tmp/other.sock"]);
        assert_eq!(args.local, Some(PathBuf::from("/tmp/other.sock")));
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_args_reject_bad_port() {
        assert!(Args::try_parse_from(["loophole", "--port", "70000"]).is_err());
    }
}
