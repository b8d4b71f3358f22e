// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// SSH Connector - Common Library
// Shared types, configuration and endpoint constants

pub mod config;
pub mod error;
pub mod network;
pub mod types;

pub use config::{
    config_dir, AppConfig, TunnelConfig, CONFIG_FILE_NAME, KEY_FILE_NAME, SSH_CONNECT_TIMEOUT,
    SSH_HOST, SSH_PORT, SSH_USER,
};
pub use error::{Error, Result};
pub use network::{format_host_port, LOOPBACK_ADDR};
pub use types::{
    ConnectionState, StateChange, TunnelErrorKind, TunnelEvent, TunnelSpec, REMOTE_PORT_MAX,
    REMOTE_PORT_MIN,
};
