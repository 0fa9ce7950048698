use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use medtrip_gateway::Gateway;
use medtrip_types::events::ChangeFilter;
use medtrip_types::models::TypingState;
use medtrip_types::{Select, record, timestamp};

use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result, decode, with_timeout};
use crate::live::{LiveQuery, Scope};
use crate::profiles::display_name;

const UNKNOWN_TYPIST: &str = "Someone";

/// One typing flag, stamped when it was set.
#[derive(Debug, Clone)]
struct TypingUpdate {
    conversation_id: Uuid,
    user_id: Uuid,
    is_typing: bool,
    at: DateTime<Utc>,
}

struct QueuedWrite {
    update: TypingUpdate,
    done: Option<oneshot::Sender<Result<()>>>,
}

/// Who is typing in a conversation, as seen by one participant.
///
/// Writes from one tracker reach the gateway in the order they were made.
#[derive(Clone)]
pub struct TypingTracker {
    gateway: Arc<dyn Gateway>,
    stale_after: Duration,
    request_timeout: Duration,
    clock: Arc<dyn Clock>,
    writes: Arc<OnceLock<mpsc::UnboundedSender<QueuedWrite>>>,
}

impl TypingTracker {
    pub fn new(gateway: Arc<dyn Gateway>, config: &ClientConfig) -> Self {
        Self::with_clock(gateway, config, Arc::new(SystemClock))
    }

    pub fn with_clock(gateway: Arc<dyn Gateway>, config: &ClientConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            stale_after: config.typing_stale_after,
            request_timeout: config.request_timeout,
            clock,
            writes: Arc::new(OnceLock::new()),
        }
    }

    /// Record the user's typing state without waiting. Failures are logged and dropped.
    pub fn set_typing(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) {
        let update = self.stamp(conversation_id, user_id, is_typing);
        if self.queue().send(QueuedWrite { update, done: None }).is_err() {
            warn!("Typing writer stopped, dropping update for {}", conversation_id);
        }
    }

    /// Record the user's typing state and wait for the write. Last write wins.
    pub async fn publish(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) -> Result<()> {
        let update = self.stamp(conversation_id, user_id, is_typing);
        let (tx, rx) = oneshot::channel();
        self.queue()
            .send(QueuedWrite {
                update,
                done: Some(tx),
            })
            .map_err(|_| ClientError::InvalidInput("typing writer stopped".into()))?;
        rx.await
            .map_err(|_| ClientError::InvalidInput("typing writer stopped".into()))?
    }

    fn stamp(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) -> TypingUpdate {
        TypingUpdate {
            conversation_id,
            user_id,
            is_typing,
            at: self.clock.now(),
        }
    }

    /// The single writer task, started on first use. It ends once every clone
    /// of the tracker is gone.
    fn queue(&self) -> &mpsc::UnboundedSender<QueuedWrite> {
        self.writes.get_or_init(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<QueuedWrite>();
            let gateway = self.gateway.clone();
            let timeout = self.request_timeout;
            tokio::spawn(async move {
                while let Some(QueuedWrite { update, done }) = rx.recv().await {
                    let result = with_timeout("update typing status", timeout, write(gateway.as_ref(), &update)).await;
                    match done {
                        Some(done) => {
                            let _ = done.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                warn!("Failed to update typing status in {}: {}", update.conversation_id, e);
                            }
                        }
                    }
                }
            });
            tx
        })
    }

    /// Display names of everyone but `self_id` currently typing, longest typing first.
    pub async fn typing_users(&self, conversation_id: Uuid, self_id: Uuid) -> Result<Vec<String>> {
        with_timeout(
            "load typing status",
            self.request_timeout,
            self.load_typists(conversation_id, self_id),
        )
        .await
    }

    async fn load_typists(&self, conversation_id: Uuid, self_id: Uuid) -> Result<Vec<String>> {
        let cutoff = self.clock.now() - chrono::Duration::from_std(self.stale_after).unwrap_or(chrono::Duration::zero());
        let rows = self
            .gateway
            .select(
                Select::from("typing_status")
                    .eq("conversation_id", conversation_id)
                    .eq("is_typing", true)
                    .neq("user_id", self_id)
                    .gt("updated_at", timestamp(cutoff))
                    .order("updated_at", true),
            )
            .await?;

        let states = rows
            .into_iter()
            .map(|row| decode::<TypingState>("typing status", row))
            .collect::<Result<Vec<_>>>()?;

        let gateway = self.gateway.as_ref();
        let mut typists: Vec<(DateTime<Utc>, String)> = try_join_all(states.into_iter().map(|state| async move {
            let name = display_name(gateway, state.user_id).await?;
            Ok::<_, ClientError>((
                state.updated_at,
                name.unwrap_or_else(|| UNKNOWN_TYPIST.to_string()),
            ))
        }))
        .await?;
        typists.sort();

        Ok(typists.into_iter().map(|(_, name)| name).collect())
    }

    /// Follow who is typing. With no conversation the list is empty and the gateway is never contacted.
    pub fn observe(&self, conversation_id: Option<Uuid>, self_id: Uuid) -> TypingFeed {
        let Some(id) = conversation_id else {
            return TypingFeed {
                tracker: self.clone(),
                conversation_id: None,
                self_id,
                live: LiveQuery::fixed(Vec::new()),
            };
        };

        let mut changes = self
            .gateway
            .subscribe(ChangeFilter::table("typing_status").eq("conversation_id", id));
        let (tx, rx) = watch::channel(Vec::new());

        let tracker = self.clone();
        let scope = Scope::spawn(move |token| async move {
            // Re-query on a timer too, so flags from peers that went away expire.
            let period = tracker.stale_after.max(Duration::from_millis(100));
            let mut expiry = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            expiry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    result = tracker.typing_users(id, self_id) => result,
                };
                if token.is_cancelled() {
                    return;
                }
                match result {
                    Ok(names) => {
                        tx.send_if_modified(|current| {
                            if *current == names {
                                return false;
                            }
                            *current = names;
                            true
                        });
                    }
                    Err(e) => warn!("Failed to load typing status for {}: {}", id, e),
                }

                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    notification = changes.next() => {
                        if notification.is_none() {
                            debug!("Typing feed for {} closed", id);
                            return;
                        }
                        changes.drain();
                    }
                    _ = expiry.tick() => {}
                }
            }
        });

        TypingFeed {
            tracker: self.clone(),
            conversation_id: Some(id),
            self_id,
            live: LiveQuery::new(rx, scope),
        }
    }
}

async fn write(gateway: &dyn Gateway, update: &TypingUpdate) -> Result<()> {
    gateway
        .upsert(
            "typing_status",
            record(json!({
                "conversation_id": update.conversation_id,
                "user_id": update.user_id,
                "is_typing": update.is_typing,
                "updated_at": timestamp(update.at),
            })),
            &["conversation_id", "user_id"],
        )
        .await?;
    Ok(())
}

/// A live list of who is typing. Dropping it ends the subscription.
pub struct TypingFeed {
    tracker: TypingTracker,
    conversation_id: Option<Uuid>,
    self_id: Uuid,
    live: LiveQuery<Vec<String>>,
}

impl TypingFeed {
    pub fn conversation_id(&self) -> Option<Uuid> {
        self.conversation_id
    }

    pub fn names(&self) -> Vec<String> {
        self.live.current()
    }

    /// Wait for the next change. `None` once the feed has stopped.
    pub async fn changed(&mut self) -> Option<Vec<String>> {
        self.live.changed().await
    }

    pub async fn wait_for(&mut self, ready: impl FnMut(&Vec<String>) -> bool) -> Vec<String> {
        self.live.wait_for(ready).await
    }

    pub fn retarget(&mut self, conversation_id: Option<Uuid>) {
        if conversation_id == self.conversation_id {
            return;
        }
        let next = self.tracker.observe(conversation_id, self.self_id);
        *self = next;
    }

    pub fn close(self) {}
}
