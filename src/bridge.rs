use crate::action::{Action, Reply, Step};
use crate::config::BridgeConfig;
use crate::connection::{self, ConnectionStatus, Link, ReconnectState};
use crate::error::{BridgeError, Result};
use crate::interpreter;
use crate::notifier::{BridgeEvent, Notifier, Subscription, SubscriptionId};
use crate::scheduler;
use crate::state::{DeviceState, StateStore};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// State shared by the bridge's tasks
pub(crate) struct Shared {
    pub config: BridgeConfig,
    /// Single writer for device state, socket session and timers
    pub inner: Mutex<Inner>,
    /// Wakes the link supervisor after a manual connect
    pub wake: Notify,
    pub shutdown: CancellationToken,
}

pub(crate) struct Inner {
    pub store: StateStore,
    pub link: Link,
    pub reconnect: ReconnectState,
    /// Live press-and-hold repeats, keyed by the step they perform
    pub holds: HashMap<Step, CancellationToken>,
    pub notifier: Notifier,
}

impl Shared {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let inner = Inner {
            store: StateStore::new(),
            link: Link::new(),
            reconnect: ReconnectState::new(config.reconnect.clone()),
            holds: HashMap::new(),
            notifier: Notifier::new(config.subscriber_capacity),
        };
        Arc::new(Self {
            config,
            inner: Mutex::new(inner),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
        })
    }
}

impl Inner {
    pub fn publish_state(&mut self) {
        let snapshot = self.store.snapshot();
        self.notifier.publish(BridgeEvent::State(snapshot));
    }

    /// Interpret one device record and fold it into the state
    pub fn handle_record(&mut self, record: &str) {
        tracing::debug!("NEETS response: {}", record);
        match interpreter::interpret(record) {
            Ok(deltas) => {
                if self.store.apply(&deltas) {
                    self.publish_state();
                }
            }
            Err(BridgeError::DeviceError { record }) => {
                tracing::error!("NEETS error: {}", record);
                self.notifier.publish(BridgeEvent::DeviceError(record));
            }
            Err(e) => tracing::warn!("Error parsing NEETS response {:?}: {}", record, e),
        }
    }

    /// Cancel holds and session timers, close the socket, and publish the drop
    pub fn teardown(&mut self) {
        for (_, hold) in self.holds.drain() {
            hold.cancel();
        }
        self.link.detach();
        if self.store.set_connected(false) {
            self.publish_state();
        }
    }
}

/// Bridge between one NEETS amplifier and any number of clients
///
/// Owns the device connection, mirrors the amplifier's state, and accepts
/// [`Action`]s from clients. State changes are delivered to every [`Subscription`].
///
/// # Example
///
/// ```no_run
/// use neets_amp_bridge::{Action, AmpBridge, BridgeConfig, BridgeEvent};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let bridge = AmpBridge::start(BridgeConfig::new("192.168.10.109", 5000))?;
///     let mut events = bridge.subscribe().await;
///
///     bridge.submit(Action::VolumeSet { value: -20 }).await?;
///
///     while let Ok(event) = events.recv().await {
///         if let BridgeEvent::State(state) = event {
///             println!("Volume is now {} dB", state.volume_db);
///             break;
///         }
///     }
///
///     bridge.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct AmpBridge {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl AmpBridge {
    /// Start bridging the device described by `config`
    ///
    /// The connection is opened in the background and kept up with automatic
    /// reconnection. Must be called from within a Tokio runtime. Fails with
    /// [`BridgeError::Config`] if `config` does not pass [`BridgeConfig::validate`].
    pub fn start(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let shared = Shared::new(config);
        let tasks = vec![
            tokio::spawn(connection::supervise(shared.clone())),
            tokio::spawn(scheduler::run_background_poll(shared.clone())),
        ];
        Ok(Self { shared, tasks })
    }

    /// Submit a client action
    ///
    /// Parameters are validated before anything is sent; invalid ones are rejected
    /// with [`BridgeError::InvalidParameter`]. Device commands submitted while the
    /// link is down fail with [`BridgeError::NotConnected`].
    pub async fn submit(&self, action: Action) -> Result<Reply> {
        scheduler::submit(&self.shared, action).await
    }

    /// Subscribe to state changes and device events
    pub async fn subscribe(&self) -> Subscription {
        self.shared.inner.lock().await.notifier.subscribe()
    }

    /// Remove a subscription; returns whether it existed
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.inner.lock().await.notifier.unsubscribe(&id)
    }

    /// Snapshot of the mirrored device state
    pub async fn state(&self) -> DeviceState {
        self.shared.inner.lock().await.store.snapshot()
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        let inner = self.shared.inner.lock().await;
        connection::status(&self.shared, &inner)
    }

    /// Connect, overriding an earlier manual disconnect or an exhausted retry budget
    pub async fn connect(&self) {
        connection::connect(&self.shared).await;
    }

    /// Disconnect and stay disconnected until [`AmpBridge::connect`]
    pub async fn disconnect(&self) {
        connection::disconnect(&self.shared).await;
    }

    /// Stop all timers, close the device socket and drop every subscriber.
    ///
    /// Subscribers see a final disconnected state if the device was connected.
    pub async fn shutdown(mut self) {
        tracing::info!("Shutting down NEETS bridge");
        self.shared.shutdown.cancel();
        {
            let mut inner = self.shared.inner.lock().await;
            inner.reconnect.manually_disconnected = true;
            inner.teardown();
            inner.notifier.clear();
        }

        let tasks = std::mem::take(&mut self.tasks);
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, join_all(tasks)).await;
    }
}

impl Drop for AmpBridge {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn record_updates_state_and_notifies() {
        let (shared, _rx) = connected(BridgeConfig::default()).await;
        let mut inner = shared.inner.lock().await;
        let mut sub = inner.notifier.subscribe();

        inner.handle_record("NEUNIT=1,VOL=-20");
        assert_eq!(inner.store.state().volume_db, -20);
        match sub.try_recv().unwrap() {
            Some(BridgeEvent::State(state)) => assert_eq!(state.volume_percent(), 61),
            other => panic!("expected state event, got {:?}", other),
        }

        // Unchanged value is not re-broadcast
        inner.handle_record("NEUNIT=1,VOL=-20");
        assert_eq!(sub.try_recv().unwrap(), None);
    }

    #[tokio::test]
    async fn error_record_is_an_event_not_state() {
        let (shared, _rx) = connected(BridgeConfig::default()).await;
        let mut inner = shared.inner.lock().await;
        let mut sub = inner.notifier.subscribe();
        let before = inner.store.snapshot();

        inner.handle_record("NEUNIT=1,ERROR");
        assert_eq!(inner.store.snapshot(), before);
        assert_eq!(
            sub.try_recv().unwrap(),
            Some(BridgeEvent::DeviceError("NEUNIT=1,ERROR".to_string()))
        );
    }

    #[tokio::test]
    async fn teardown_cancels_holds_and_publishes_disconnect() {
        let (shared, mut rx) = connected(BridgeConfig::default()).await;
        let mut inner = shared.inner.lock().await;
        let mut sub = inner.notifier.subscribe();
        let session = inner.link.session().clone();
        let hold = session.child_token();
        inner.holds.insert(
            crate::action::HoldControl::VolumeUp.step(None).unwrap(),
            hold.clone(),
        );

        inner.teardown();
        assert!(hold.is_cancelled());
        assert!(session.is_cancelled());
        assert!(inner.holds.is_empty());
        assert!(!inner.link.is_connected());
        match sub.try_recv().unwrap() {
            Some(BridgeEvent::State(state)) => assert!(!state.connected),
            other => panic!("expected state event, got {:?}", other),
        }
        assert!(written(&mut rx).is_empty());
    }
}
