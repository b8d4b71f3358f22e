// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// SSH Connector - Bidirectional relay between a forwarded channel and a local socket

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::BridgeError;

const BUFFER_SIZE: usize = 32 * 1024;

/// Bytes moved in each direction
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub channel_to_local: u64,
    pub local_to_channel: u64,
}

/// Copy bytes both ways until either side ends, an I/O error occurs, or
/// `cancel` fires. Both directions run concurrently. Both ends are shut down
/// and dropped on every path.
pub async fn bridge<C, L>(
    channel: C,
    local: L,
    cancel: &CancellationToken,
) -> Result<BridgeStats, BridgeError>
where
    C: AsyncRead + AsyncWrite,
    L: AsyncRead + AsyncWrite,
{
    let (mut channel_reader, mut channel_writer) = tokio::io::split(channel);
    let (mut local_reader, mut local_writer) = tokio::io::split(local);

    let mut stats = BridgeStats::default();
    let result = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Relay cancelled");
            Ok(())
        }

        copied = pump(
            &mut channel_reader,
            &mut local_writer,
            &mut stats.channel_to_local,
            BridgeError::ChannelRead,
            BridgeError::LocalWrite,
        ) => {
            if copied.is_ok() {
                debug!("Forwarded channel reached EOF");
            }
            copied
        }

        copied = pump(
            &mut local_reader,
            &mut channel_writer,
            &mut stats.local_to_channel,
            BridgeError::LocalRead,
            BridgeError::ChannelWrite,
        ) => {
            if copied.is_ok() {
                debug!("Local service closed the connection");
            }
            copied
        }
    };

    // EOF to the remote peer, then close both ends
    if let Err(e) = channel_writer.shutdown().await {
        debug!("Channel shutdown failed: {}", e);
    }
    drop(channel_writer);
    drop(channel_reader);
    if let Err(e) = local_writer.shutdown().await {
        debug!("Local socket shutdown failed: {}", e);
    }
    drop(local_writer);
    drop(local_reader);

    result.map(|()| stats)
}

/// Copy one direction until EOF, counting bytes once they are fully written
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    copied: &mut u64,
    read_error: fn(io::Error) -> BridgeError,
    write_error: fn(io::Error) -> BridgeError,
) -> Result<(), BridgeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await.map_err(read_error)?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await.map_err(write_error)?;
        *copied += n as u64;
    }
}
