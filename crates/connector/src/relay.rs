// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// SSH Connector - Tunnel relay
// Registers the remote forward, accepts forwarded channels and relays each
// one to the local service on its own task.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use ssh_connector_common::{TunnelErrorKind, TunnelEvent, TunnelSpec, LOOPBACK_ADDR};

use crate::bridge::bridge;
use crate::dialer::dial_local;
use crate::error::RelayError;
use crate::transport::SshSession;

/// Upper bound for one wait on the session's forwarded-channel queue
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A running reverse tunnel.
///
/// Holds a shared handle to the session until the worker exits, so the owner
/// must `stop` and `join` the relay before tearing the session down.
pub struct TunnelRelay {
    spec: TunnelSpec,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl TunnelRelay {
    /// Spawn the relay worker. Returns immediately; progress is reported on `events`.
    pub fn start<S: SshSession>(
        session: Arc<S>,
        spec: TunnelSpec,
        events: broadcast::Sender<TunnelEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_relay(session, spec, events, cancel.clone()));

        Self {
            spec,
            cancel,
            worker: Some(worker),
        }
    }

    pub fn spec(&self) -> TunnelSpec {
        self.spec
    }

    /// Request shutdown; in-flight connections stop at their next await point
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// True once the worker has exited (stopped, failed registration, or lost the session)
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |worker| worker.is_finished())
    }

    /// Wait for the worker to exit
    pub async fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!("Tunnel relay worker for remote port {} failed: {}", self.spec.remote_port(), e);
            }
        }
    }

    /// `stop` followed by `join`
    pub async fn shutdown(self) {
        self.stop();
        self.join().await;
    }
}

impl Drop for TunnelRelay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn emit(events: &broadcast::Sender<TunnelEvent>, event: TunnelEvent) {
    if let Err(e) = events.send(event) {
        debug!("No tunnel event subscribers: {}", e);
    }
}

fn emit_error(events: &broadcast::Sender<TunnelEvent>, remote_port: u16, kind: TunnelErrorKind, error: &RelayError) {
    emit(
        events,
        TunnelEvent::Error {
            remote_port,
            kind,
            message: error.to_string(),
        },
    );
}

async fn run_relay<S: SshSession>(
    session: Arc<S>,
    spec: TunnelSpec,
    events: broadcast::Sender<TunnelEvent>,
    cancel: CancellationToken,
) {
    let remote_port = spec.remote_port();
    let local_port = spec.local_port();

    if let Err(e) = session.request_remote_forward(LOOPBACK_ADDR, remote_port).await {
        let error = RelayError::PortForwardRegistrationFailed(e.to_string());
        error!("{}", error);
        emit_error(&events, remote_port, TunnelErrorKind::Registration, &error);
        return;
    }

    info!(
        "Tunnel started: remote port {} -> {}:{}",
        remote_port, LOOPBACK_ADDR, local_port
    );
    emit(&events, TunnelEvent::Started { remote_port });

    let connections = TaskTracker::new();
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = session.accept_forwarded(ACCEPT_POLL_INTERVAL) => accepted,
        };

        match accepted {
            Ok(Some(channel)) => {
                debug!("Accepted forwarded connection on remote port {}", remote_port);
                connections.spawn(serve_connection(
                    channel,
                    local_port,
                    remote_port,
                    events.clone(),
                    cancel.child_token(),
                ));
            }
            Ok(None) => continue,
            Err(e) => {
                let error = RelayError::AcceptFailed(e.to_string());
                warn!("{}", error);
                emit_error(&events, remote_port, TunnelErrorKind::Transport, &error);
                break;
            }
        }
    }

    // stop in-flight connections as well, then wait for them
    cancel.cancel();
    connections.close();
    connections.wait().await;

    if let Err(e) = session.cancel_remote_forward(LOOPBACK_ADDR, remote_port).await {
        debug!("Failed to cancel remote forward on port {}: {}", remote_port, e);
    }
    close_pending_channels(session.as_ref(), remote_port).await;

    info!("Tunnel stopped: remote port {}", remote_port);
    emit(&events, TunnelEvent::Stopped { remote_port });
}

/// Close channels that arrived after the accept loop ended so they are not
/// picked up by a later relay on the same session
async fn close_pending_channels<S: SshSession>(session: &S, remote_port: u16) {
    while let Ok(Some(mut channel)) = session.accept_forwarded(Duration::ZERO).await {
        debug!("Closing late forwarded connection on remote port {}", remote_port);
        if let Err(e) = channel.shutdown().await {
            debug!("Channel shutdown failed: {}", e);
        }
    }
}

async fn serve_connection<C>(
    mut channel: C,
    local_port: u16,
    remote_port: u16,
    events: broadcast::Sender<TunnelEvent>,
    cancel: CancellationToken,
) where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let dialed = tokio::select! {
        _ = cancel.cancelled() => return,
        dialed = dial_local(local_port) => dialed,
    };

    let socket = match dialed {
        Ok(socket) => socket,
        Err(error) => {
            warn!("{}", error);
            if let Err(e) = channel.shutdown().await {
                debug!("Channel shutdown failed: {}", e);
            }
            drop(channel);
            emit_error(&events, remote_port, TunnelErrorKind::Connection, &error);
            return;
        }
    };

    match bridge(channel, socket, &cancel).await {
        Ok(stats) => debug!(
            "Forwarded connection closed ({} bytes to local, {} bytes to remote)",
            stats.channel_to_local, stats.local_to_channel
        ),
        Err(e) => {
            warn!("Forwarded connection on remote port {} failed: {}", remote_port, e);
            emit(
                &events,
                TunnelEvent::Error {
                    remote_port,
                    kind: TunnelErrorKind::Connection,
                    message: e.to_string(),
                },
            );
        }
    }
}
