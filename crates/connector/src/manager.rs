// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// SSH Connector - Connection Manager
// Owns the session and key, drives the connection state machine and the tunnel relay

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use ssh_connector_common::{ConnectionState, StateChange, TunnelEvent, TunnelSpec};

use crate::error::{ConnectError, TunnelStartError};
use crate::keys::KeyLocator;
use crate::relay::TunnelRelay;
use crate::transport::{SshSession, SshTarget, SshTransport};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Resources owned by the manager. Guarded by the lifecycle lock.
struct Resources<T: SshTransport> {
    session: Option<Arc<T::Session>>,
    key: Option<Arc<T::Key>>,
    relay: Option<TunnelRelay>,
    /// Tunnel last requested by `start_tunnel` and not stopped since
    requested_tunnel: Option<TunnelSpec>,
}

/// Connection lifecycle for the fixed SSH endpoint.
///
/// States move `Disconnected -> Connecting -> Connected | Error -> Disconnected`.
/// Every transition is broadcast on the state channel; relay progress is
/// broadcast on the tunnel channel.
pub struct ConnectionManager<T: SshTransport> {
    transport: T,
    target: SshTarget,
    keys: KeyLocator,
    state: Mutex<ConnectionState>,
    resources: tokio::sync::Mutex<Resources<T>>,
    state_tx: broadcast::Sender<StateChange>,
    tunnel_tx: broadcast::Sender<TunnelEvent>,
}

impl<T: SshTransport> ConnectionManager<T> {
    pub fn new(transport: T, keys: KeyLocator) -> Self {
        let (state_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (tunnel_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            transport,
            target: SshTarget::fixed(),
            keys,
            state: Mutex::new(ConnectionState::Disconnected),
            resources: tokio::sync::Mutex::new(Resources {
                session: None,
                key: None,
                relay: None,
                requested_tunnel: None,
            }),
            state_tx,
            tunnel_tx,
        }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> ConnectionState {
        self.lock_state().clone()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_tunnel(&self) -> broadcast::Receiver<TunnelEvent> {
        self.tunnel_tx.subscribe()
    }

    /// Establish an authenticated session. No-op while connecting or connected.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        if !self.state().is_idle() {
            debug!("Connect ignored, state is {}", self.state());
            return Ok(());
        }

        let mut resources = self.resources.lock().await;
        {
            let mut state = self.lock_state();
            if !state.is_idle() {
                debug!("Connect ignored, state is {}", *state);
                return Ok(());
            }
            self.transition(&mut state, ConnectionState::Connecting);
        }

        // a failed attempt may have left the previous key behind
        resources.key = None;

        match self.establish().await {
            Ok((session, key)) => {
                resources.session = Some(Arc::new(session));
                resources.key = Some(key);
                info!("Connected to {}@{}:{}", self.target.user, self.target.host, self.target.port);
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                error!("Connection failed: {}", e);
                self.set_state(ConnectionState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(T::Session, Arc<T::Key>), ConnectError> {
        let key_path = self.keys.resolve().ok_or_else(|| ConnectError::KeyNotFound {
            searched: self.keys.candidates(),
        })?;
        info!("Using private key: {}", key_path.display());

        let key = self
            .transport
            .load_key(&key_path)
            .map_err(|e| ConnectError::KeyLoadFailed {
                path: key_path.clone(),
                reason: e.to_string(),
            })?;
        let key = Arc::new(key);

        let mut session = self
            .transport
            .create_session(&self.target)
            .map_err(|e| ConnectError::SessionCreateFailed(e.to_string()))?;

        session
            .connect()
            .await
            .map_err(|e| ConnectError::ConnectFailed(e.to_string()))?;

        if let Err(e) = session.authenticate(key.clone()).await {
            session.disconnect().await;
            return Err(ConnectError::AuthFailed(e.to_string()));
        }

        Ok((session, key))
    }

    /// Stop the tunnel, then close the session and release the key. Idempotent.
    pub async fn disconnect(&self) {
        let mut resources = self.resources.lock().await;
        if *self.lock_state() == ConnectionState::Disconnected {
            debug!("Disconnect ignored, already disconnected");
            return;
        }

        // the relay holds the session; it must be gone first
        if let Some(relay) = resources.relay.take() {
            relay.shutdown().await;
        }
        if let Some(session) = resources.session.take() {
            session.disconnect().await;
        }
        resources.key = None;

        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected from {}", self.target.host);
    }

    /// Connected state and a transport that still reports the link alive
    pub async fn is_connected(&self) -> bool {
        if !self.state().is_connected() {
            return false;
        }
        match self.current_session().await {
            Some(session) => session.is_alive().await,
            None => false,
        }
    }

    /// Send a keepalive; false when there is no session or it fails. Never changes state.
    pub async fn check_connection(&self) -> bool {
        let Some(session) = self.current_session().await else {
            return false;
        };
        match session.send_keepalive().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Keepalive failed: {}", e);
                false
            }
        }
    }

    /// Start forwarding `remote_port` on the endpoint to `127.0.0.1:local_port`,
    /// replacing any running tunnel
    pub async fn start_tunnel(&self, local_port: u32, remote_port: u32) -> Result<(), TunnelStartError> {
        let spec = TunnelSpec::new(local_port, remote_port, true)
            .map_err(|e| TunnelStartError::InvalidSpec(e.to_string()))?;

        let mut resources = self.resources.lock().await;
        let session = match (&resources.session, self.state().is_connected()) {
            (Some(session), true) => session.clone(),
            _ => {
                warn!("Cannot start tunnel on remote port {}: not connected", remote_port);
                return Err(TunnelStartError::NotConnected);
            }
        };

        if let Some(previous) = resources.relay.take() {
            info!("Replacing tunnel on remote port {}", previous.spec().remote_port());
            previous.shutdown().await;
        }

        resources.relay = Some(TunnelRelay::start(session, spec, self.tunnel_tx.clone()));
        resources.requested_tunnel = Some(spec);
        Ok(())
    }

    /// Wait until the connection is up, then start `spec` unless a tunnel has
    /// been requested in the meantime
    pub async fn start_tunnel_when_connected(&self, spec: TunnelSpec) -> Result<(), TunnelStartError> {
        let mut states = self.subscribe_state();
        // the connection may have come up before the subscription
        while !self.state().is_connected() {
            match states.recv().await {
                Ok(change) if change.state.is_connected() => break,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Err(TunnelStartError::NotConnected),
            }
        }

        if let Some(requested) = self.requested_tunnel().await {
            debug!("Tunnel on remote port {} already requested", requested.remote_port());
            return Ok(());
        }
        self.start_tunnel(spec.local_port() as u32, spec.remote_port() as u32)
            .await
    }

    /// Stop the running tunnel, if any, and wait for it to exit
    pub async fn stop_tunnel(&self) {
        let mut resources = self.resources.lock().await;
        resources.requested_tunnel = None;
        if let Some(relay) = resources.relay.take() {
            relay.shutdown().await;
        }
    }

    /// Spec of the relay that is currently running
    pub async fn active_tunnel(&self) -> Option<TunnelSpec> {
        let resources = self.resources.lock().await;
        resources
            .relay
            .as_ref()
            .filter(|relay| !relay.is_finished())
            .map(TunnelRelay::spec)
    }

    /// Tunnel last started and not explicitly stopped, surviving disconnects
    pub async fn requested_tunnel(&self) -> Option<TunnelSpec> {
        self.resources.lock().await.requested_tunnel
    }

    async fn current_session(&self) -> Option<Arc<T::Session>> {
        self.resources.lock().await.session.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        // state is a plain value, a poisoned guard still holds a valid one
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.lock_state();
        self.transition(&mut state, next);
    }

    /// Called with the state lock held so observers see transitions in order
    fn transition(&self, state: &mut ConnectionState, next: ConnectionState) {
        debug!("Connection state: {} -> {}", state, next);
        *state = next.clone();
        if let Err(e) = self.state_tx.send(StateChange::new(next)) {
            debug!("No state subscribers: {}", e);
        }
    }
}
