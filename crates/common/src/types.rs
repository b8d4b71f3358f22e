// Common types for SSH Connector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lowest remote port the endpoint allows forwards on
pub const REMOTE_PORT_MIN: u16 = 12000;
/// Highest remote port the endpoint allows forwards on
pub const REMOTE_PORT_MAX: u16 = 13000;

/// State of the connection to the SSH endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,  // no session
    Connecting,    // key lookup + TCP + SSH handshake + auth
    Connected,     // authenticated session available
    Error(String), // last attempt failed (reason)
}

impl ConnectionState {
    /// Check if the state represents an active connection
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Idle states accept a new connect attempt
    pub fn is_idle(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error(_))
    }

    /// Error message carried by the state, if any
    pub fn error_message(&self) -> Option<&str> {
        match self {
            ConnectionState::Error(message) => Some(message),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// Notification sent to observers on every state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StateChange {
    pub fn new(state: ConnectionState) -> Self {
        let error = state.error_message().map(str::to_string);
        Self {
            state,
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Validated reverse tunnel parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunnelSpec {
    local_port: u16,
    remote_port: u16,
    enabled: bool,
}

impl TunnelSpec {
    /// Build a spec, checking both ports against their allowed ranges
    pub fn new(local_port: u32, remote_port: u32, enabled: bool) -> Result<Self> {
        if local_port == 0 || local_port > u16::MAX as u32 {
            return Err(Error::InvalidLocalPort(local_port));
        }
        if remote_port < REMOTE_PORT_MIN as u32 || remote_port > REMOTE_PORT_MAX as u32 {
            return Err(Error::InvalidRemotePort {
                port: remote_port,
                min: REMOTE_PORT_MIN,
                max: REMOTE_PORT_MAX,
            });
        }

        Ok(Self {
            local_port: local_port as u16,
            remote_port: remote_port as u16,
            enabled,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

/// What went wrong inside a tunnel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TunnelErrorKind {
    /// The endpoint refused the remote forward; the relay did not start
    Registration,
    /// A single forwarded connection failed; the relay keeps running
    Connection,
    /// The session stopped delivering forwarded channels
    Transport,
}

/// Events emitted by a running tunnel relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TunnelEvent {
    /// Remote forward registered, accepting connections
    Started { remote_port: u16 },

    /// Remote forward cancelled, relay exited
    Stopped { remote_port: u16 },

    /// Tunnel error occurred
    Error {
        remote_port: u16,
        kind: TunnelErrorKind,
        message: String,
    },
}

impl TunnelEvent {
    pub fn remote_port(&self) -> u16 {
        match self {
            TunnelEvent::Started { remote_port }
            | TunnelEvent::Stopped { remote_port }
            | TunnelEvent::Error { remote_port, .. } => *remote_port,
        }
    }
}
