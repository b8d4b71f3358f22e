// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

//! Seam between the connection/relay core and the SSH implementation.
//!
//! The core only needs a handful of session primitives. `crate::ssh` provides
//! them on top of russh; tests plug in an in-memory transport.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use ssh_connector_common::{SSH_CONNECT_TIMEOUT, SSH_HOST, SSH_PORT, SSH_USER};

use crate::error::TransportError;

/// Identity of the endpoint a session connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub connect_timeout: Duration,
}

impl SshTarget {
    /// The fixed tunnel endpoint
    pub fn fixed() -> Self {
        Self {
            host: SSH_HOST.to_string(),
            port: SSH_PORT,
            user: SSH_USER.to_string(),
            connect_timeout: SSH_CONNECT_TIMEOUT,
        }
    }
}

/// Factory for keys and sessions
pub trait SshTransport: Send + Sync + 'static {
    type Key: Send + Sync + 'static;
    type Session: SshSession<Key = Self::Key>;

    /// Parse private key material from a file
    fn load_key(&self, path: &Path) -> Result<Self::Key, TransportError>;

    /// Allocate a session configured for `target`. Nothing is sent yet.
    fn create_session(&self, target: &SshTarget) -> Result<Self::Session, TransportError>;
}

/// One SSH session. Dropping it releases every resource it holds.
#[async_trait]
pub trait SshSession: Send + Sync + 'static {
    type Key: Send + Sync + 'static;
    /// A forwarded channel as a byte stream; shutdown sends EOF, drop closes
    type Channel: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn authenticate(&mut self, key: Arc<Self::Key>) -> Result<(), TransportError>;

    /// Whether the transport still considers the link open
    async fn is_alive(&self) -> bool;

    /// Send a no-op message to prove the link still works
    async fn send_keepalive(&self) -> Result<(), TransportError>;

    async fn request_remote_forward(
        &self,
        bind_addr: &str,
        bind_port: u16,
    ) -> Result<(), TransportError>;

    async fn cancel_remote_forward(
        &self,
        bind_addr: &str,
        bind_port: u16,
    ) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the endpoint to open a forwarded channel.
    /// `Ok(None)` means the wait elapsed; `Err` means no channel will ever come.
    async fn accept_forwarded(
        &self,
        timeout: Duration,
    ) -> Result<Option<Self::Channel>, TransportError>;

    /// Close the session politely. Errors are logged, not returned.
    async fn disconnect(&self);
}
