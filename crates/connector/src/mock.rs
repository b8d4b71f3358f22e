// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// SSH Connector - In-memory transport for tests

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, Mutex};

use crate::error::TransportError;
use crate::transport::{SshSession, SshTarget, SshTransport};

/// Key file content that fails to parse
pub const INVALID_KEY: &str = "not a key";

/// Shared knobs and counters for every session of a [`MockTransport`]
pub struct MockState {
    pub fail_create: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_auth: AtomicBool,
    pub fail_forward: AtomicBool,
    pub fail_keepalive: AtomicBool,
    /// Link state seen by `is_alive`, keepalives and the accept loop
    pub alive: AtomicBool,

    pub sessions_created: AtomicUsize,
    pub live_sessions: AtomicUsize,
    pub active_forwards: AtomicUsize,
    pub max_active_forwards: AtomicUsize,
    pub forward_requests: AtomicUsize,
    pub keepalives: AtomicUsize,
    pub disconnects: AtomicUsize,

    incoming_tx: mpsc::UnboundedSender<MockChannel>,
    incoming_rx: Mutex<mpsc::UnboundedReceiver<MockChannel>>,
    /// Channels the endpoint opens while a forward is being cancelled
    opened_on_cancel: std::sync::Mutex<Vec<MockChannel>>,
}

impl MockState {
    fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            fail_create: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_auth: AtomicBool::new(false),
            fail_forward: AtomicBool::new(false),
            fail_keepalive: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            sessions_created: AtomicUsize::new(0),
            live_sessions: AtomicUsize::new(0),
            active_forwards: AtomicUsize::new(0),
            max_active_forwards: AtomicUsize::new(0),
            forward_requests: AtomicUsize::new(0),
            keepalives: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            incoming_tx,
            incoming_rx: Mutex::new(incoming_rx),
            opened_on_cancel: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Simulate the endpoint opening a forwarded channel; returns the remote end
    pub fn open_forwarded(&self) -> DuplexStream {
        let (relay_end, remote_end) = duplex(64 * 1024);
        self.deliver(MockChannel::Open(relay_end));
        remote_end
    }

    /// Simulate a channel whose reads and writes fail
    pub fn open_broken_forwarded(&self) {
        self.deliver(MockChannel::Broken);
    }

    /// Simulate a connection that races the next `cancel_remote_forward`:
    /// the channel is delivered while the forward is being torn down
    pub fn open_forwarded_on_cancel(&self) -> DuplexStream {
        let (relay_end, remote_end) = duplex(64 * 1024);
        if let Ok(mut pending) = self.opened_on_cancel.lock() {
            pending.push(MockChannel::Open(relay_end));
        }
        remote_end
    }

    fn deliver(&self, channel: MockChannel) {
        // the receiver lives as long as the state
        let _ = self.incoming_tx.send(channel);
    }
}

/// Forwarded channel of a [`MockSession`]
pub enum MockChannel {
    Open(DuplexStream),
    /// Every read and write fails with a reset
    Broken,
}

fn reset() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, "channel reset by peer")
}

impl AsyncRead for MockChannel {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MockChannel::Open(stream) => Pin::new(stream).poll_read(cx, buf),
            MockChannel::Broken => Poll::Ready(Err(reset())),
        }
    }
}

impl AsyncWrite for MockChannel {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MockChannel::Open(stream) => Pin::new(stream).poll_write(cx, buf),
            MockChannel::Broken => Poll::Ready(Err(reset())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MockChannel::Open(stream) => Pin::new(stream).poll_flush(cx),
            MockChannel::Broken => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MockChannel::Open(stream) => Pin::new(stream).poll_shutdown(cx),
            MockChannel::Broken => Poll::Ready(Ok(())),
        }
    }
}

#[derive(Clone)]
pub struct MockTransport {
    pub state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::new()),
        }
    }
}

/// Parsed key; any file other than [`INVALID_KEY`] parses
#[derive(Debug)]
pub struct MockKey;

impl SshTransport for MockTransport {
    type Key = MockKey;
    type Session = MockSession;

    fn load_key(&self, path: &Path) -> Result<MockKey, TransportError> {
        let contents = std::fs::read_to_string(path).map_err(|e| TransportError::new(e.to_string()))?;
        if contents.trim() == INVALID_KEY {
            return Err(TransportError::new("invalid key format"));
        }
        Ok(MockKey)
    }

    fn create_session(&self, _target: &SshTarget) -> Result<MockSession, TransportError> {
        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::new("out of memory"));
        }
        self.state.sessions_created.fetch_add(1, Ordering::SeqCst);
        self.state.live_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            state: self.state.clone(),
            connected: false,
            authenticated: false,
        })
    }
}

pub struct MockSession {
    state: Arc<MockState>,
    connected: bool,
    authenticated: bool,
}

impl MockSession {
    fn link_up(&self) -> bool {
        self.connected && self.state.alive.load(Ordering::SeqCst)
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SshSession for MockSession {
    type Key = MockKey;
    type Channel = MockChannel;

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::new("connection refused"));
        }
        self.connected = true;
        Ok(())
    }

    async fn authenticate(&mut self, _key: Arc<MockKey>) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::new("not connected"));
        }
        if self.state.fail_auth.load(Ordering::SeqCst) {
            return Err(TransportError::new("public key rejected by server"));
        }
        self.authenticated = true;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.link_up()
    }

    async fn send_keepalive(&self) -> Result<(), TransportError> {
        if !self.link_up() || self.state.fail_keepalive.load(Ordering::SeqCst) {
            return Err(TransportError::new("broken pipe"));
        }
        self.state.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn request_remote_forward(&self, _bind_addr: &str, _bind_port: u16) -> Result<(), TransportError> {
        self.state.forward_requests.fetch_add(1, Ordering::SeqCst);
        if !self.authenticated || self.state.fail_forward.load(Ordering::SeqCst) {
            return Err(TransportError::new("request denied"));
        }
        let active = self.state.active_forwards.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active_forwards.fetch_max(active, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel_remote_forward(&self, _bind_addr: &str, _bind_port: u16) -> Result<(), TransportError> {
        self.state.active_forwards.fetch_sub(1, Ordering::SeqCst);
        let opened = match self.state.opened_on_cancel.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => Vec::new(),
        };
        for channel in opened {
            self.state.deliver(channel);
        }
        Ok(())
    }

    async fn accept_forwarded(&self, timeout: Duration) -> Result<Option<MockChannel>, TransportError> {
        if !self.link_up() {
            return Err(TransportError::new("session closed"));
        }
        let mut incoming = self.state.incoming_rx.lock().await;
        match tokio::time::timeout(timeout, incoming.recv()).await {
            Ok(Some(channel)) => Ok(Some(channel)),
            Ok(None) => Err(TransportError::new("session closed")),
            Err(_) => Ok(None),
        }
    }

    async fn disconnect(&self) {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
