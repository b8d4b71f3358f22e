// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// SSH Connector
// Exposes a local TCP service through a reverse tunnel on the fixed SSH endpoint

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ssh_connector::known_hosts::KNOWN_HOSTS_FILE_NAME;
use ssh_connector::{
    Backoff, ConnectionManager, ConnectionMonitor, KeyLocator, RusshTransport, SshTransport,
    DEFAULT_CHECK_INTERVAL,
};
use ssh_connector_common::{
    config_dir, AppConfig, ConnectionState, StateChange, TunnelEvent, TunnelSpec, SSH_HOST,
    SSH_PORT, SSH_USER,
};

#[derive(Parser)]
#[command(name = "ssh-connector")]
#[command(about = "Expose a local service through a reverse SSH tunnel", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding config.json, known_hosts and optionally tunnel_key
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Directory searched first for tunnel_key
    #[arg(long)]
    key_dir: Option<PathBuf>,

    /// Local service port on 127.0.0.1 (enables the tunnel)
    #[arg(short = 'l', long)]
    local_port: Option<u32>,

    /// Remote port on the endpoint, 12000-13000 (enables the tunnel)
    #[arg(short = 'r', long)]
    remote_port: Option<u32>,

    /// Do not reconnect automatically when the connection drops
    #[arg(long)]
    no_reconnect: bool,

    /// Write the effective configuration back to config.json
    #[arg(long)]
    save: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ssh_connector=info,ssh_connector_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("SSH Connector starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Endpoint: {}@{}:{}", SSH_USER, SSH_HOST, SSH_PORT);

    let config_dir = match cli.config_dir.clone() {
        Some(dir) => dir,
        None => config_dir().context("Failed to determine configuration directory")?,
    };
    let config_path = AppConfig::path_in(&config_dir);
    let mut config = AppConfig::load_or_create(&config_path)
        .context(format!("Failed to load configuration: {}", config_path.display()))?;
    apply_overrides(&mut config, &cli);
    config.validate().context("Invalid configuration")?;

    if cli.save {
        config
            .save_to(&config_path)
            .context(format!("Failed to save configuration: {}", config_path.display()))?;
    }

    let transport = RusshTransport::new(config_dir.join(KNOWN_HOSTS_FILE_NAME));
    let mut keys = KeyLocator::new(Some(config_dir.clone()));
    if let Some(dir) = cli.key_dir {
        keys = keys.with_override_dir(dir);
    }
    let manager = Arc::new(ConnectionManager::new(transport, keys));

    tokio::spawn(log_state_changes(manager.subscribe_state()));
    tokio::spawn(log_tunnel_events(manager.subscribe_tunnel()));

    let tunnel = config.tunnel.to_spec()?;
    let connected = match manager.connect().await {
        Ok(()) => true,
        Err(e) if config.auto_reconnect => {
            warn!("Initial connection failed, will retry: {}", e);
            false
        }
        Err(e) => return Err(e).context("Failed to connect"),
    };

    if tunnel.enabled() {
        if connected {
            manager
                .start_tunnel(tunnel.local_port() as u32, tunnel.remote_port() as u32)
                .await
                .context("Failed to start tunnel")?;
        } else {
            tokio::spawn(start_tunnel_when_connected(manager.clone(), tunnel));
        }
    } else {
        info!("Tunnel disabled in configuration, keeping the connection only");
    }

    let monitor = config.auto_reconnect.then(|| {
        ConnectionMonitor::start(
            manager.clone(),
            DEFAULT_CHECK_INTERVAL,
            Backoff::from_config(&config),
        )
    });

    wait_for_shutdown().await;

    if let Some(monitor) = monitor {
        monitor.stop().await;
    }
    manager.disconnect().await;

    info!("SSH Connector shut down");
    Ok(())
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(port) = cli.local_port {
        config.tunnel.local_port = port;
        config.tunnel.enabled = true;
    }
    if let Some(port) = cli.remote_port {
        config.tunnel.remote_port = port;
        config.tunnel.enabled = true;
    }
    if cli.no_reconnect {
        config.auto_reconnect = false;
    }
}

/// Start the configured tunnel once the monitor has brought the connection up
async fn start_tunnel_when_connected<T: SshTransport>(
    manager: Arc<ConnectionManager<T>>,
    tunnel: TunnelSpec,
) {
    if let Err(e) = manager.start_tunnel_when_connected(tunnel).await {
        error!("Failed to start tunnel: {}", e);
    }
}

async fn log_state_changes(mut rx: broadcast::Receiver<StateChange>) {
    loop {
        match rx.recv().await {
            Ok(change) => match &change.state {
                ConnectionState::Error(message) => error!("Connection state: error ({})", message),
                state => info!("Connection state: {}", state),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("State log lagged, {} changes skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn log_tunnel_events(mut rx: broadcast::Receiver<TunnelEvent>) {
    loop {
        match rx.recv().await {
            Ok(TunnelEvent::Error { remote_port, kind, message }) => {
                error!("Tunnel {} error ({:?}): {}", remote_port, kind, message);
            }
            Ok(event) => info!("Tunnel event on remote port {}: {:?}", event.remote_port(), event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Tunnel event log lagged, {} events skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                };
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}
