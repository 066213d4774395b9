use crate::error::{BridgeError, Result};
use crate::state::DeviceState;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier handed out per subscription
pub type SubscriptionId = Uuid;

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Device state (including connectivity) changed
    State(DeviceState),

    /// The device rejected a command with an error record
    DeviceError(String),

    /// Automatic reconnection gave up
    ReconnectExhausted { attempts: u32 },
}

/// Fan-out of bridge events to any number of subscribers
///
/// Delivery is best-effort: a subscriber whose queue is full misses that event,
/// and closed subscribers are dropped on the next publish. Publishing never waits.
pub(crate) struct Notifier {
    subscribers: HashMap<SubscriptionId, mpsc::Sender<BridgeEvent>>,
    capacity: usize,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&mut self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);
        tracing::debug!("Subscriber {} added ({} total)", id, self.subscribers.len());
        Subscription { id, rx }
    }

    pub fn unsubscribe(&mut self, id: &SubscriptionId) -> bool {
        self.subscribers.remove(id).is_some()
    }

    /// Drop every subscriber; their receivers see the feed end
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn publish(&mut self, event: BridgeEvent) {
        self.subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Subscriber {} is lagging, dropping event", id);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Subscriber {} went away", id);
                false
            }
        });
    }
}

/// Receiving end of a subscription
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<BridgeEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next event
    ///
    /// Returns [`BridgeError::Closed`] once the bridge has dropped this
    /// subscription (unsubscribe or shutdown).
    pub async fn recv(&mut self) -> Result<BridgeEvent> {
        self.rx.recv().await.ok_or(BridgeError::Closed)
    }

    /// Try to receive an event without waiting
    ///
    /// Returns `None` if no event is queued.
    pub fn try_recv(&mut self) -> Result<Option<BridgeEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(BridgeError::Closed),
        }
    }
}
