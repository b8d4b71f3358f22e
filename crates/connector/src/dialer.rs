// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// SSH Connector - Local service dialer

use tokio::net::TcpStream;
use tracing::debug;

use ssh_connector_common::{format_host_port, LOOPBACK_ADDR};

use crate::error::RelayError;

/// Open a TCP connection to the local service on the loopback interface
pub async fn dial_local(port: u16) -> Result<TcpStream, RelayError> {
    let addr = format_host_port(LOOPBACK_ADDR, port);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| RelayError::LocalDialFailed {
            port,
            reason: e.to_string(),
        })?;

    // interactive traffic, do not batch small writes
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY on {}: {}", addr, e);
    }

    debug!("Connected to local service {}", addr);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = dial_local(port).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_dial_closed_port_fails() {
        // bind then drop to get a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        match dial_local(port).await {
            Err(RelayError::LocalDialFailed { port: failed, .. }) => assert_eq!(failed, port),
            other => panic!("expected dial failure, got {:?}", other.map(|_| ())),
        }
    }
}
