use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join_all;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use medtrip_gateway::{Gateway, GatewayResultExt};
use medtrip_types::api::NewMessage;
use medtrip_types::events::ChangeFilter;
use medtrip_types::models::{Attachment, Conversation, ConversationMessage, Message};
use medtrip_types::query::to_value;
use medtrip_types::{Filter, Select, record, timestamp};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result, decode, with_timeout};
use crate::live::{LiveQuery, Scope};
use crate::notify::{Notice, Notifier};
use crate::profiles::display_name;
use crate::rate_limit::RateLimiter;

pub const SEND_MESSAGE_ENDPOINT: &str = "send-message";
pub const SEND_MESSAGE_LIMIT: u32 = 20;
pub const SEND_MESSAGE_WINDOW_MINUTES: u32 = 1;

const UNKNOWN_SENDER: &str = "Unknown";

/// What a conversation view renders.
#[derive(Debug, Clone, Default)]
pub struct ConversationSnapshot {
    pub messages: Vec<ConversationMessage>,
    pub is_loading: bool,
    pub error: Option<Arc<ClientError>>,
}

/// Message history for conversations, kept fresh from the gateway's change feed.
#[derive(Clone)]
pub struct ConversationStore {
    gateway: Arc<dyn Gateway>,
    limiter: RateLimiter,
    notifier: Arc<dyn Notifier>,
    request_timeout: Duration,
}

impl ConversationStore {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        limiter: RateLimiter,
        notifier: Arc<dyn Notifier>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            gateway,
            limiter,
            notifier,
            request_timeout: config.request_timeout,
        }
    }

    /// Follow a conversation. With no id the feed is empty and the gateway is never contacted.
    pub fn subscribe(&self, conversation_id: Option<Uuid>) -> ConversationFeed {
        let Some(id) = conversation_id else {
            return ConversationFeed {
                store: self.clone(),
                conversation_id: None,
                live: LiveQuery::fixed(ConversationSnapshot::default()),
            };
        };

        // Subscribe before the first fetch so no change slips between the two.
        let mut changes = self
            .gateway
            .subscribe(ChangeFilter::table("messages").eq("conversation_id", id));
        let (tx, rx) = watch::channel(ConversationSnapshot {
            is_loading: true,
            ..Default::default()
        });

        let store = self.clone();
        let scope = Scope::spawn(move |token| async move {
            debug!("Following conversation {}", id);
            loop {
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    result = store.fetch(id) => result,
                };
                if token.is_cancelled() {
                    return;
                }

                tx.send_modify(|snapshot| {
                    snapshot.is_loading = false;
                    match result {
                        Ok(messages) => {
                            snapshot.messages = messages;
                            snapshot.error = None;
                        }
                        Err(e) => {
                            warn!("Failed to load conversation {}: {}", id, e);
                            snapshot.error = Some(Arc::new(e));
                        }
                    }
                });

                let notification = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    notification = changes.next() => notification,
                };
                if notification.is_none() {
                    debug!("Change feed for conversation {} closed", id);
                    return;
                }
                // One refetch covers everything already queued.
                let coalesced = changes.drain();
                debug!("Conversation {} changed, refetching ({} coalesced)", id, coalesced);
            }
        });

        ConversationFeed {
            store: self.clone(),
            conversation_id: Some(id),
            live: LiveQuery::new(rx, scope),
        }
    }

    /// All messages of a conversation, oldest first, with senders and attachments resolved.
    pub async fn fetch(&self, conversation_id: Uuid) -> Result<Vec<ConversationMessage>> {
        with_timeout(
            "fetch messages",
            self.request_timeout,
            load_messages(self.gateway.as_ref(), conversation_id),
        )
        .await
    }

    pub async fn send_message(&self, new: NewMessage) -> Result<Message> {
        if new.content.trim().is_empty() && new.attachments.is_empty() {
            return Err(ClientError::InvalidInput("message is empty".into()));
        }
        if !self.limiter.check(
            SEND_MESSAGE_ENDPOINT,
            SEND_MESSAGE_LIMIT,
            SEND_MESSAGE_WINDOW_MINUTES,
        ) {
            return Err(ClientError::RateLimited {
                endpoint: SEND_MESSAGE_ENDPOINT.into(),
            });
        }

        let message_id = Uuid::new_v4();
        let result = with_timeout(
            "send message",
            self.request_timeout,
            self.insert_message(message_id, &new),
        )
        .await;
        if let Err(e) = &result {
            // A timed out insert may still land, so its attachments are kept.
            if !new.attachments.is_empty() && !matches!(e, ClientError::Timeout { .. }) {
                self.discard_attachments(message_id).await;
            }
            self.notifier
                .notify(Notice::error("Failed to send message", e.to_string()));
        }
        result
    }

    async fn insert_message(&self, message_id: Uuid, new: &NewMessage) -> Result<Message> {

        // Attachments go first so the message's own change event finds them in place.
        for attachment in &new.attachments {
            self.gateway
                .insert(
                    "message_attachments",
                    record(json!({
                        "message_id": message_id,
                        "file_name": attachment.file_name,
                        "file_url": attachment.file_url,
                        "file_type": attachment.file_type,
                        "file_size": attachment.file_size,
                    })),
                )
                .await?;
        }

        let row = self
            .gateway
            .insert(
                "messages",
                record(json!({
                    "id": message_id,
                    "conversation_id": new.conversation_id,
                    "sender_id": new.sender_id,
                    "sender_type": new.sender_type,
                    "content": new.content,
                    "message_type": new.message_type,
                })),
            )
            .await?;

        decode("message", row)
    }

    async fn discard_attachments(&self, message_id: Uuid) {
        let filters = vec![Filter::Eq("message_id".into(), to_value(message_id))];
        let result = with_timeout("discard attachments", self.request_timeout, async {
            self.gateway
                .delete("message_attachments", filters)
                .await
                .map_err(ClientError::from)
        })
        .await;
        match result {
            Ok(rows) => debug!("Discarded {} attachment(s) of unsent message {}", rows.len(), message_id),
            Err(e) => warn!("Could not discard attachments of unsent message {}: {}", message_id, e),
        }
    }

    /// Mark every unread message from the other side as read. Returns how many changed.
    pub async fn mark_as_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<usize> {
        let filters = vec![
            Filter::Eq("conversation_id".into(), to_value(conversation_id)),
            Filter::Neq("sender_id".into(), to_value(reader_id)),
            Filter::IsNull("read_at".into()),
        ];
        let patch = record(json!({ "read_at": timestamp(chrono::Utc::now()) }));

        let rows = with_timeout("mark as read", self.request_timeout, async {
            self.gateway
                .update("messages", filters, patch)
                .await
                .map_err(ClientError::from)
        })
        .await?;
        Ok(rows.len())
    }

    /// The conversation between a patient and a clinic, created on first use.
    /// Two callers racing to create it both get the same row.
    pub async fn open_conversation(
        &self,
        patient_id: Uuid,
        clinic_id: Uuid,
        subject: Option<&str>,
    ) -> Result<Conversation> {
        if let Some(conversation) = self.find_conversation(patient_id, clinic_id).await? {
            return Ok(conversation);
        }

        let row = record(json!({
            "patient_id": patient_id,
            "clinic_id": clinic_id,
            "subject": subject,
        }));
        let created = with_timeout("open conversation", self.request_timeout, async {
            self.gateway
                .insert("conversations", row)
                .await
                .map_err(ClientError::from)
        })
        .await;

        match created {
            Ok(row) => {
                info!("Opened conversation between {} and {}", patient_id, clinic_id);
                decode("conversation", row)
            }
            Err(e) => match self.find_conversation(patient_id, clinic_id).await? {
                Some(conversation) => {
                    debug!("Conversation between {} and {} was opened concurrently", patient_id, clinic_id);
                    Ok(conversation)
                }
                None => Err(e),
            },
        }
    }

    async fn find_conversation(&self, patient_id: Uuid, clinic_id: Uuid) -> Result<Option<Conversation>> {
        let row = with_timeout("find conversation", self.request_timeout, async {
            self.gateway
                .single(
                    Select::from("conversations")
                        .eq("patient_id", patient_id)
                        .eq("clinic_id", clinic_id),
                )
                .await
                .optional()
                .map_err(ClientError::from)
        })
        .await?;
        row.map(|row| decode("conversation", row)).transpose()
    }
}

async fn load_messages(gateway: &dyn Gateway, conversation_id: Uuid) -> Result<Vec<ConversationMessage>> {
    let rows = gateway
        .select(
            Select::from("messages")
                .eq("conversation_id", conversation_id)
                .order("created_at", true),
        )
        .await?;

    let messages = rows
        .into_iter()
        .map(|row| decode::<Message>("message", row))
        .collect::<Result<Vec<_>>>()?;

    // Lookups run concurrently; try_join_all keeps the input order.
    try_join_all(messages.into_iter().map(|m| resolve_message(gateway, m))).await
}

async fn resolve_message(gateway: &dyn Gateway, message: Message) -> Result<ConversationMessage> {
    let (sender_name, attachments) = futures_util::try_join!(
        display_name(gateway, message.sender_id),
        load_attachments(gateway, message.id),
    )?;

    Ok(ConversationMessage {
        sender_name: sender_name.unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        attachments,
        message,
    })
}

async fn load_attachments(gateway: &dyn Gateway, message_id: Uuid) -> Result<Vec<Attachment>> {
    gateway
        .select(Select::from("message_attachments").eq("message_id", message_id))
        .await?
        .into_iter()
        .map(|row| decode("attachment", row))
        .collect()
}

/// A live view of one conversation. Dropping it ends the subscription.
pub struct ConversationFeed {
    store: ConversationStore,
    conversation_id: Option<Uuid>,
    live: LiveQuery<ConversationSnapshot>,
}

impl ConversationFeed {
    pub fn conversation_id(&self) -> Option<Uuid> {
        self.conversation_id
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.live.current()
    }

    /// Wait for the next snapshot. `None` once the feed has stopped.
    pub async fn changed(&mut self) -> Option<ConversationSnapshot> {
        self.live.changed().await
    }

    /// Wait until the current load has finished.
    pub async fn loaded(&mut self) -> ConversationSnapshot {
        self.live.wait_for(|s| !s.is_loading).await
    }

    /// Wait until `ready` holds for a snapshot.
    pub async fn wait_for(&mut self, ready: impl FnMut(&ConversationSnapshot) -> bool) -> ConversationSnapshot {
        self.live.wait_for(ready).await
    }

    /// Follow another conversation instead. The previous subscription ends and
    /// nothing it was still loading is ever published.
    pub fn retarget(&mut self, conversation_id: Option<Uuid>) {
        if conversation_id == self.conversation_id {
            return;
        }
        let next = self.store.subscribe(conversation_id);
        *self = next;
    }

    pub fn close(self) {}
}
