use crate::bridge::{Inner, Shared};
use crate::codec::{self, RecordBuffer};
use crate::config::ReconnectPolicy;
use crate::error::{BridgeError, Result};
use crate::notifier::BridgeEvent;
use crate::protocol::Command;
use crate::scheduler::{self, CommandSequence};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const READ_CHUNK: usize = 1024;

/// Lifecycle of the device socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Connection diagnostics for the external layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub state: LinkState,
    pub manually_disconnected: bool,
    pub reconnect_attempts: u32,
    pub reconnect_exhausted: bool,
    pub host: String,
    pub port: u16,
}

/// The device link: current socket session, if any
///
/// Each session gets a fresh epoch and cancellation token. Timers and socket tasks
/// bound to a session hold its token; tearing the session down cancels all of them.
pub(crate) struct Link {
    state: LinkState,
    writer: Option<mpsc::UnboundedSender<Vec<u8>>>,
    session: CancellationToken,
    epoch: u64,
}

impl Link {
    pub fn new() -> Self {
        let session = CancellationToken::new();
        session.cancel();
        Self {
            state: LinkState::Disconnected,
            writer: None,
            session,
            epoch: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Token of the current session; already cancelled when there is none
    pub fn session(&self) -> &CancellationToken {
        &self.session
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn begin_connecting(&mut self) {
        self.state = LinkState::Connecting;
    }

    /// Start a new session writing into `writer`
    pub fn attach(
        &mut self,
        writer: mpsc::UnboundedSender<Vec<u8>>,
        parent: &CancellationToken,
    ) -> (u64, CancellationToken) {
        self.session.cancel();
        self.epoch += 1;
        self.session = parent.child_token();
        self.writer = Some(writer);
        self.state = LinkState::Connected;
        (self.epoch, self.session.clone())
    }

    /// End the current session, returning whether one was live
    pub fn detach(&mut self) -> bool {
        let was_live = self.state != LinkState::Disconnected;
        self.session.cancel();
        self.writer = None;
        self.state = LinkState::Disconnected;
        was_live
    }

    /// Queue one command for the device
    ///
    /// Fails with [`BridgeError::NotConnected`] unless a session is live; nothing is
    /// buffered across an outage.
    pub fn send(&self, command: &Command) -> Result<()> {
        match (self.state, &self.writer) {
            (LinkState::Connected, Some(writer)) => {
                writer
                    .send(codec::encode(command))
                    .map_err(|_| BridgeError::NotConnected)?;
                tracing::debug!("Sent to NEETS: NEUNIT=1,{}", command);
                Ok(())
            }
            _ => Err(BridgeError::NotConnected),
        }
    }
}

/// Retry bookkeeping for automatic reconnection
#[derive(Debug, Clone)]
pub(crate) struct ReconnectState {
    policy: ReconnectPolicy,
    pub attempts: u32,
    pub delay: Duration,
    pub manually_disconnected: bool,
    pub exhausted: bool,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            attempts: 0,
            delay: policy.base_delay,
            manually_disconnected: false,
            exhausted: false,
            policy,
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.policy.base_delay;
        self.exhausted = false;
    }

    /// Delay before the next automatic attempt, or `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            self.exhausted = true;
            return None;
        }
        self.attempts += 1;
        let delay = self.delay;
        self.delay = self
            .delay
            .mul_f64(self.policy.multiplier)
            .min(self.policy.max_delay);
        Some(delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }
}

/// Owns the connect / wait / back off cycle for the lifetime of the bridge.
pub(crate) async fn supervise(shared: Arc<Shared>) {
    loop {
        // Registered before the flags are read so a connect in between is not lost
        let wake = shared.wake.notified();
        tokio::pin!(wake);
        wake.as_mut().enable();

        let wanted = {
            let inner = shared.inner.lock().await;
            !inner.reconnect.manually_disconnected && !inner.reconnect.exhausted
        };

        if !wanted {
            tokio::select! {
                _ = wake.as_mut() => continue,
                _ = shared.shutdown.cancelled() => break,
            }
        }

        let opened = tokio::select! {
            opened = open_session(&shared) => opened,
            _ = shared.shutdown.cancelled() => break,
        };

        match opened {
            Ok(Some(session)) => {
                tokio::select! {
                    _ = session.cancelled() => {}
                    _ = shared.shutdown.cancelled() => break,
                }
            }
            Ok(None) => continue,
            Err(e) => tracing::warn!("NEETS connection error: {}", e),
        }

        let wake = shared.wake.notified();
        tokio::pin!(wake);
        wake.as_mut().enable();

        let delay = {
            let mut inner = shared.inner.lock().await;
            if inner.reconnect.manually_disconnected {
                continue;
            }
            match inner.reconnect.next_delay() {
                Some(delay) => {
                    tracing::info!(
                        "Attempting to reconnect in {:?} (attempt {}/{})",
                        delay,
                        inner.reconnect.attempts,
                        inner.reconnect.max_attempts()
                    );
                    delay
                }
                None => {
                    let attempts = inner.reconnect.attempts;
                    tracing::error!(
                        "Max reconnection attempts reached. Please check NEETS amp connection."
                    );
                    inner
                        .notifier
                        .publish(BridgeEvent::ReconnectExhausted { attempts });
                    continue;
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wake.as_mut() => {}
            _ = shared.shutdown.cancelled() => break,
        }
    }

    tracing::debug!("Link supervisor stopped");
}

/// Open the socket and start a session.
///
/// Returns `Ok(None)` when a manual disconnect overtook the attempt.
async fn open_session(shared: &Arc<Shared>) -> Result<Option<CancellationToken>> {
    shared.inner.lock().await.link.begin_connecting();

    let addr = format!("{}:{}", shared.config.host, shared.config.port);
    tracing::info!("Connecting to NEETS amp at {}", addr);
    let connected = timeout(shared.config.connect_timeout, TcpStream::connect(&addr)).await;

    let mut inner = shared.inner.lock().await;
    let stream = match connected {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            inner.teardown();
            return Err(e.into());
        }
        Err(_) => {
            inner.teardown();
            return Err(BridgeError::Timeout);
        }
    };

    if inner.link.state() != LinkState::Connecting {
        tracing::info!("Connect to {} superseded by manual disconnect", addr);
        return Ok(None);
    }

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Could not set TCP_NODELAY: {}", e);
    }

    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let (epoch, session) = inner.link.attach(tx, &shared.shutdown);
    inner.reconnect.reset();

    tokio::spawn(write_loop(shared.clone(), epoch, session.clone(), write_half, rx));
    tokio::spawn(read_loop(shared.clone(), epoch, session.clone(), read_half));

    tracing::info!("Connected to NEETS amp at {}", addr);
    if inner.store.set_connected(true) {
        inner.publish_state();
    }

    let poll = CommandSequence::full_status(shared.config.poll_step);
    scheduler::start_sequence(shared, &mut inner, poll);

    Ok(Some(session))
}

async fn read_loop(
    shared: Arc<Shared>,
    epoch: u64,
    session: CancellationToken,
    mut reader: OwnedReadHalf,
) {
    let mut records = RecordBuffer::new();
    let mut buf = [0u8; READ_CHUNK];

    let reason = loop {
        let read = tokio::select! {
            _ = session.cancelled() => return,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break "closed by device".to_string(),
            Ok(n) => {
                let completed = records.push(&buf[..n]);
                if completed.is_empty() {
                    continue;
                }
                let mut inner = shared.inner.lock().await;
                if !deliver(&mut inner, epoch, &session, &completed) {
                    return;
                }
            }
            Err(e) => break e.to_string(),
        }
    };

    end_session(&mut *shared.inner.lock().await, epoch, &reason);
}

async fn write_loop(
    shared: Arc<Shared>,
    epoch: u64,
    session: CancellationToken,
    mut writer: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    loop {
        let bytes = tokio::select! {
            _ = session.cancelled() => break,
            bytes = outgoing.recv() => match bytes {
                Some(bytes) => bytes,
                None => break,
            },
        };

        if let Err(e) = writer.write_all(&bytes).await {
            tracing::error!("Failed to send to NEETS amp: {}", e);
            end_session(&mut *shared.inner.lock().await, epoch, &e.to_string());
            break;
        }
    }

    let _ = writer.shutdown().await;
}

/// Apply records read by session `epoch`; returns false once that session is over
fn deliver(inner: &mut Inner, epoch: u64, session: &CancellationToken, records: &[String]) -> bool {
    // A manual disconnect cancels the session without starting a new epoch
    if inner.link.epoch() != epoch || session.is_cancelled() {
        return false;
    }
    for record in records {
        inner.handle_record(record);
    }
    true
}

/// Tear down session `epoch` after a socket failure; stale epochs are ignored
fn end_session(inner: &mut Inner, epoch: u64, reason: &str) {
    if inner.link.epoch() != epoch || !inner.link.is_connected() {
        return;
    }
    tracing::warn!("NEETS connection closed: {}", reason);
    inner.teardown();
}

/// Manual connect: clears the manual flag and retry budget, then wakes the supervisor
pub(crate) async fn connect(shared: &Arc<Shared>) {
    let mut inner = shared.inner.lock().await;
    inner.reconnect.manually_disconnected = false;
    if inner.link.state() != LinkState::Disconnected {
        tracing::debug!("Connect requested while {:?}, ignoring", inner.link.state());
        return;
    }
    inner.reconnect.reset();
    tracing::info!("Manual connect to NEETS amp requested");
    // Wakes a waiting supervisor only
    shared.wake.notify_waiters();
}

/// Manual disconnect: closes the socket and holds off reconnection until [`connect`]
pub(crate) async fn disconnect(shared: &Arc<Shared>) {
    let mut inner = shared.inner.lock().await;
    inner.reconnect.manually_disconnected = true;
    inner.reconnect.reset();
    inner.teardown();
    tracing::info!("Manually disconnected from NEETS amp");
}

pub(crate) async fn toggle(shared: &Arc<Shared>) {
    let state = shared.inner.lock().await.link.state();
    if state == LinkState::Disconnected {
        connect(shared).await;
    } else {
        disconnect(shared).await;
    }
}

pub(crate) fn status(shared: &Shared, inner: &Inner) -> ConnectionStatus {
    ConnectionStatus {
        connected: inner.link.is_connected(),
        state: inner.link.state(),
        manually_disconnected: inner.reconnect.manually_disconnected,
        reconnect_attempts: inner.reconnect.attempts,
        reconnect_exhausted: inner.reconnect.exhausted,
        host: shared.config.host.clone(),
        port: shared.config.port,
    }
}
