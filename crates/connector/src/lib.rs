// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// SSH Connector - Library
// Connection lifecycle and reverse tunnel relay for a fixed SSH endpoint

pub mod bridge;
pub mod dialer;
pub mod error;
pub mod keys;
pub mod known_hosts;
pub mod manager;
pub mod monitor;
pub mod relay;
pub mod ssh;
pub mod transport;

#[cfg(test)]
mod mock;

pub use error::{BridgeError, ConnectError, RelayError, TransportError, TunnelStartError};
pub use keys::KeyLocator;
pub use manager::ConnectionManager;
pub use monitor::{Backoff, ConnectionMonitor, DEFAULT_CHECK_INTERVAL};
pub use relay::TunnelRelay;
pub use ssh::RusshTransport;
pub use transport::{SshSession, SshTarget, SshTransport};
