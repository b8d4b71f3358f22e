// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// SSH Connector - Connection Monitor
// Periodic health checks with automatic reconnection and exponential backoff

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ssh_connector_common::AppConfig;

use crate::manager::ConnectionManager;
use crate::transport::SshTransport;

/// Default interval between keepalive checks
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Reconnect delays: `initial * 2^attempt`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.reconnect_delay(), config.max_reconnect_delay())
    }

    /// Delay before reconnect attempt number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Background task keeping the connection (and the requested tunnel) up
pub struct ConnectionMonitor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConnectionMonitor {
    pub fn start<T: SshTransport>(
        manager: Arc<ConnectionManager<T>>,
        check_interval: Duration,
        backoff: Backoff,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor_loop(manager, check_interval, backoff, cancel.clone()));
        info!(
            "Connection monitor started (check every {:?}, backoff {:?} up to {:?})",
            check_interval, backoff.initial, backoff.max
        );
        Self { cancel, task }
    }

    /// Stop the monitor and wait for it to exit
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Connection monitor task failed: {}", e);
        }
        debug!("Connection monitor stopped");
    }
}

async fn is_healthy<T: SshTransport>(manager: &ConnectionManager<T>) -> bool {
    manager.is_connected().await && manager.check_connection().await
}

async fn monitor_loop<T: SshTransport>(
    manager: Arc<ConnectionManager<T>>,
    check_interval: Duration,
    backoff: Backoff,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(check_interval) => {}
        }

        if is_healthy(&manager).await {
            debug!("Connection check passed");
            continue;
        }

        warn!("Connection lost ({}), reconnecting", manager.state());
        if !reconnect(&manager, backoff, &cancel).await {
            return;
        }
    }
}

/// Retry until connected. Returns false if cancelled first.
async fn reconnect<T: SshTransport>(
    manager: &ConnectionManager<T>,
    backoff: Backoff,
    cancel: &CancellationToken,
) -> bool {
    let mut attempt: u32 = 0;
    loop {
        manager.disconnect().await;

        let delay = backoff.delay(attempt);
        info!("Reconnect attempt {} in {:?}", attempt + 1, delay);
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }

        match manager.connect().await {
            Ok(()) => break,
            Err(e) => {
                warn!("Reconnect attempt {} failed: {}", attempt + 1, e);
                attempt = attempt.saturating_add(1);
            }
        }
    }

    info!("Reconnected");
    if let Some(spec) = manager.requested_tunnel().await {
        info!("Restoring tunnel on remote port {}", spec.remote_port());
        if let Err(e) = manager
            .start_tunnel(spec.local_port() as u32, spec.remote_port() as u32)
            .await
        {
            warn!("Failed to restore tunnel: {}", e);
        }
    }
    true
}
