// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// SSH Connector - Error types for the connection and relay core

use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by the SSH transport, carrying the library's message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<russh::Error> for TransportError {
    fn from(e: russh::Error) -> Self {
        Self(e.to_string())
    }
}

/// Why a connect attempt failed. Every variant ends in the Error state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("No private key found (searched: {})", format_paths(.searched))]
    KeyNotFound { searched: Vec<PathBuf> },

    #[error("Failed to load private key {}: {reason}", .path.display())]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("Failed to create SSH session: {0}")]
    SessionCreateFailed(String),

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),
}

/// Why a tunnel could not be started
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunnelStartError {
    #[error("Cannot start tunnel: not connected")]
    NotConnected,

    #[error("Invalid tunnel configuration: {0}")]
    InvalidSpec(String),
}

/// Failures inside the relay worker, reported on the tunnel event stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Port forward registration failed: {0}")]
    PortForwardRegistrationFailed(String),

    #[error("Failed to connect to local port {port}: {reason}")]
    LocalDialFailed { port: u16, reason: String },

    #[error("Failed to accept forwarded connection: {0}")]
    AcceptFailed(String),
}

/// I/O failure in the middle of relaying one forwarded connection
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("channel read failed: {0}")]
    ChannelRead(std::io::Error),

    #[error("channel write failed: {0}")]
    ChannelWrite(std::io::Error),

    #[error("local socket read failed: {0}")]
    LocalRead(std::io::Error),

    #[error("local socket write failed: {0}")]
    LocalWrite(std::io::Error),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
