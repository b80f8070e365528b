use cylinder_sessions::CylinderSession;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const CHANNEL_CAPACITY: usize = 256;

/// Change notifications pushed by a store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// The full current collection, in no particular order.
    Snapshot(Vec<CylinderSession>),
    /// Reading the backing store failed; the last snapshot is still the best
    /// known state.
    Degraded { reason: String },
}

/// Fan-out of [`StoreEvent`]s to every live [`Subscription`].
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<StoreEvent>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: StoreEvent) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.tx.send(event);
    }

    pub fn publish_snapshot(&self, sessions: Vec<CylinderSession>) {
        self.publish(StoreEvent::Snapshot(sessions));
    }

    /// Register a receiver. Call before reading the initial snapshot so no
    /// change between the read and the registration is lost.
    pub fn receiver(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }
}

/// A live feed of store changes. The first event is the collection at
/// subscription time. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    initial: Option<StoreEvent>,
    rx: broadcast::Receiver<StoreEvent>,
}

impl Subscription {
    pub fn new(initial: Vec<CylinderSession>, rx: broadcast::Receiver<StoreEvent>) -> Self {
        Self {
            initial: Some(StoreEvent::Snapshot(initial)),
            rx,
        }
    }

    /// Wait for the next event. `None` once the store is gone.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }

        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                // Every snapshot is complete, so skipped ones are superseded.
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "subscription lagged, skipping to latest");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
