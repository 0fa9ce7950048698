use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use medtrip_types::events::{ChangeEvent, ChangeFilter};

/// Default number of change events buffered per subscriber before it lags.
const CHANNEL_CAPACITY: usize = 1024;

/// What a change stream yields. Both variants mean "re-read your data".
#[derive(Debug, Clone)]
pub enum Notification {
    Changed(ChangeEvent),
    /// The subscriber fell behind and `n` events were dropped.
    Missed(u64),
}

/// Fans change events out to every subscriber.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<ChangeEvent>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to events matching `filter`.
    pub fn subscribe(&self, filter: ChangeFilter) -> ChangeStream {
        ChangeStream {
            rx: self.inner.broadcast_tx.subscribe(),
            filter,
        }
    }

    /// Publish an event to all subscribers. Events with no subscribers are dropped.
    pub fn publish(&self, event: ChangeEvent) {
        debug!("change on {}: {:?}", event.table, event.kind);
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Number of live change streams.
    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

/// A filtered view of the change feed. Dropping it unsubscribes.
pub struct ChangeStream {
    rx: broadcast::Receiver<ChangeEvent>,
    filter: ChangeFilter,
}

impl ChangeStream {
    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    /// Wait for the next matching notification. `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(Notification::Changed(event)),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    warn!("Change stream on {} lagged by {} events", self.filter.table, n);
                    return Some(Notification::Missed(n));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take a matching notification that is already queued, without waiting.
    pub fn try_next(&mut self) -> Option<Notification> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(Notification::Changed(event)),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(n)) => return Some(Notification::Missed(n)),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Discard every queued notification. Returns how many matching ones were dropped.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.try_next().is_some() {
            drained += 1;
        }
        drained
    }
}
