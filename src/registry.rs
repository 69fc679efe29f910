use crate::dedup::DedupCache;
use crate::types::conversation::{Conversation, StoreStats};
use crate::types::message::{AckLevel, ChatMessage, Direction};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Contact-level attributes that ride along with an inbound message and are
/// folded into the conversation on insertion.
#[derive(Debug, Clone, Default)]
pub struct ContactHints {
    pub display_name: Option<String>,
    pub business_name: Option<String>,
    pub is_group: bool,
    pub is_business: bool,
}

/// Immutable copy of the whole registry, handed to a newly connected
/// observer as its initial state. Copying (not referencing) is deliberate:
/// later mutation must not be observable mid-serialization.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Sorted by last activity, newest first.
    pub conversations: Vec<Conversation>,
    /// Message history grouped by contact key.
    pub messages: HashMap<String, Vec<ChatMessage>>,
}

/// Single source of truth for UI conversation state.
///
/// Injected everywhere as a trait object so tests can substitute doubles
/// and no state lives in module-level globals.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Inserts `message` into the contact's ordered list unless its id was
    /// already recorded by the dedup cache. Counters and the last-message
    /// preview are updated on insertion only.
    async fn upsert_message(
        &self,
        key: &str,
        hints: ContactHints,
        message: ChatMessage,
    ) -> (Conversation, bool);

    /// Zeroes the unread counter. `None` if the contact is unknown.
    async fn mark_read(&self, key: &str) -> Option<Conversation>;

    /// Raises the acknowledgment level of a message. Returns the updated
    /// conversation and message, or `None` when the id is unknown or the
    /// update would lower the level.
    async fn apply_ack(&self, message_id: &str, level: AckLevel)
    -> Option<(Conversation, ChatMessage)>;

    async fn conversation(&self, key: &str) -> Option<Conversation>;

    async fn messages(&self, key: &str) -> Option<Vec<ChatMessage>>;

    async fn find_message(&self, message_id: &str) -> Option<ChatMessage>;

    /// Stores the avatar URL fetched for a contact.
    async fn set_avatar(&self, key: &str, url: String) -> Option<Conversation>;

    async fn snapshot(&self) -> Snapshot;

    fn stats(&self) -> StoreStats;
}

struct ChatState {
    conversation: Conversation,
    messages: Vec<ChatMessage>,
}

/// Memory-resident registry. Each contact key maps to its own mutex-guarded
/// state, so concurrent insertions into the same conversation are
/// serialized while unrelated contacts proceed independently.
pub struct InMemoryConversationStore {
    chats: DashMap<String, Arc<Mutex<ChatState>>>,
    /// message id -> contact key, for ack resolution and forwards.
    index: DashMap<String, String>,
    dedup: Arc<DedupCache>,
    message_total: AtomicUsize,
}

/// Dedup key scoped the way message ids are unique: per contact and
/// direction.
fn scoped_id(key: &str, message: &ChatMessage) -> String {
    let dir = if message.from_me { 's' } else { 'r' };
    format!("{key}:{dir}:{}", message.id)
}

impl InMemoryConversationStore {
    pub fn new(dedup: Arc<DedupCache>) -> Self {
        Self {
            chats: DashMap::new(),
            index: DashMap::new(),
            dedup,
            message_total: AtomicUsize::new(0),
        }
    }

    fn chat_handle(&self, key: &str) -> Arc<Mutex<ChatState>> {
        self.chats
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ChatState {
                    conversation: Conversation::new(key),
                    messages: Vec::new(),
                }))
            })
            .clone()
    }

    fn existing_handle(&self, key: &str) -> Option<Arc<Mutex<ChatState>>> {
        self.chats.get(key).map(|entry| entry.clone())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn upsert_message(
        &self,
        key: &str,
        hints: ContactHints,
        message: ChatMessage,
    ) -> (Conversation, bool) {
        let handle = self.chat_handle(key);
        let mut chat = handle.lock().await;

        if !self.dedup.try_accept(&scoped_id(key, &message)) {
            return (chat.conversation.clone(), false);
        }

        if let Some(name) = hints.display_name
            && !name.is_empty()
        {
            chat.conversation.display_name = name;
        }
        if let Some(business) = hints.business_name {
            chat.conversation.business_name = Some(business);
        }
        chat.conversation.is_group |= hints.is_group;
        chat.conversation.is_business |= hints.is_business;

        // Keep the list non-decreasing by timestamp. Scanning from the rear
        // is O(1) for the common in-order case.
        let pos = chat
            .messages
            .iter()
            .rposition(|m| m.timestamp <= message.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        chat.messages.insert(pos, message.clone());
        self.index.insert(message.id.clone(), key.to_string());
        self.message_total.fetch_add(1, Ordering::Relaxed);

        chat.conversation.message_count += 1;
        if message.direction == Direction::Received && !message.from_me {
            chat.conversation.unread_count += 1;
        }
        chat.conversation.last_message = message.preview();
        chat.conversation.last_message_time = Some(message.timestamp);
        chat.conversation.last_from_me = message.from_me;
        chat.conversation.last_ack = message.ack;

        (chat.conversation.clone(), true)
    }

    async fn mark_read(&self, key: &str) -> Option<Conversation> {
        let handle = self.existing_handle(key)?;
        let mut chat = handle.lock().await;
        chat.conversation.unread_count = 0;
        Some(chat.conversation.clone())
    }

    async fn apply_ack(
        &self,
        message_id: &str,
        level: AckLevel,
    ) -> Option<(Conversation, ChatMessage)> {
        let key = self.index.get(message_id)?.clone();
        let handle = self.existing_handle(&key)?;
        let mut chat = handle.lock().await;

        let pos = chat.messages.iter().rposition(|m| m.id == message_id)?;
        if level <= chat.messages[pos].ack {
            return None;
        }
        chat.messages[pos].ack = level;
        let updated = chat.messages[pos].clone();
        if pos + 1 == chat.messages.len() {
            chat.conversation.last_ack = level;
        }
        Some((chat.conversation.clone(), updated))
    }

    async fn conversation(&self, key: &str) -> Option<Conversation> {
        let handle = self.existing_handle(key)?;
        let chat = handle.lock().await;
        Some(chat.conversation.clone())
    }

    async fn messages(&self, key: &str) -> Option<Vec<ChatMessage>> {
        let handle = self.existing_handle(key)?;
        let chat = handle.lock().await;
        Some(chat.messages.clone())
    }

    async fn find_message(&self, message_id: &str) -> Option<ChatMessage> {
        let key = self.index.get(message_id)?.clone();
        let handle = self.existing_handle(&key)?;
        let chat = handle.lock().await;
        chat.messages
            .iter()
            .rev()
            .find(|m| m.id == message_id)
            .cloned()
    }

    async fn set_avatar(&self, key: &str, url: String) -> Option<Conversation> {
        let handle = self.existing_handle(key)?;
        let mut chat = handle.lock().await;
        chat.conversation.avatar = Some(url);
        Some(chat.conversation.clone())
    }

    async fn snapshot(&self) -> Snapshot {
        // Collect the handles first so no DashMap shard lock is held across
        // an await.
        let handles: Vec<(String, Arc<Mutex<ChatState>>)> = self
            .chats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut conversations = Vec::with_capacity(handles.len());
        let mut messages = HashMap::with_capacity(handles.len());
        for (key, handle) in handles {
            let chat = handle.lock().await;
            conversations.push(chat.conversation.clone());
            messages.insert(key, chat.messages.clone());
        }
        conversations.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));

        Snapshot {
            conversations,
            messages,
        }
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            conversations: self.chats.len(),
            messages: self.message_total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::{Direction, MessageKind, SELF_SENDER};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn store() -> InMemoryConversationStore {
        let dedup = Arc::new(DedupCache::new(
            Duration::from_secs(300),
            Duration::from_secs(60),
        ));
        InMemoryConversationStore::new(dedup)
    }

    fn inbound(id: &str, chat: &str, body: &str, ts_secs: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            chat: chat.to_string(),
            sender: chat.to_string(),
            recipient: SELF_SENDER.to_string(),
            body: body.to_string(),
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            direction: Direction::Received,
            kind: MessageKind::Text,
            from_me: false,
            ack: AckLevel::None,
            media_id: None,
            filename: None,
        }
    }

    fn outbound(id: &str, chat: &str, body: &str, ts_secs: i64) -> ChatMessage {
        ChatMessage {
            sender: SELF_SENDER.to_string(),
            recipient: chat.to_string(),
            direction: Direction::Sent,
            from_me: true,
            ack: AckLevel::Sent,
            ..inbound(id, chat, body, ts_secs)
        }
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_a_noop() {
        let store = store();
        let msg = inbound("A1", "+1555", "Hi", 1_000);

        let (conv, inserted) = store
            .upsert_message("+1555", ContactHints::default(), msg.clone())
            .await;
        assert!(inserted);
        assert_eq!(conv.message_count, 1);
        assert_eq!(conv.unread_count, 1);
        assert_eq!(conv.last_message, "Hi");

        let (conv, inserted) = store
            .upsert_message("+1555", ContactHints::default(), msg)
            .await;
        assert!(!inserted);
        assert_eq!(conv.message_count, 1);
        assert_eq!(conv.unread_count, 1);
        assert_eq!(store.stats().messages, 1);
    }

    #[tokio::test]
    async fn test_messages_stay_ordered_under_shuffled_insertion() {
        let store = store();
        for (id, ts) in [("m3", 30), ("m1", 10), ("m4", 40), ("m2", 20)] {
            store
                .upsert_message("+1555", ContactHints::default(), inbound(id, "+1555", id, ts))
                .await;
        }
        let messages = store.messages("+1555").await.unwrap();
        let stamps: Vec<_> = messages.iter().map(|m| m.timestamp).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
        assert_eq!(messages.len(), 4);
    }

    #[tokio::test]
    async fn test_unread_only_counts_inbound_and_mark_read_zeroes() {
        let store = store();
        store
            .upsert_message(
                "+1555",
                ContactHints::default(),
                inbound("in1", "+1555", "hey", 10),
            )
            .await;
        store
            .upsert_message(
                "+1555",
                ContactHints::default(),
                outbound("out1", "+1555", "reply", 20),
            )
            .await;

        let conv = store.conversation("+1555").await.unwrap();
        assert_eq!(conv.unread_count, 1);
        assert!(conv.last_from_me);

        let conv = store.mark_read("+1555").await.unwrap();
        assert_eq!(conv.unread_count, 0);

        // Stays zero until the next inbound insertion.
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.conversations[0].unread_count, 0);

        store
            .upsert_message(
                "+1555",
                ContactHints::default(),
                inbound("in2", "+1555", "again", 30),
            )
            .await;
        let conv = store.conversation("+1555").await.unwrap();
        assert_eq!(conv.unread_count, 1);
    }

    #[tokio::test]
    async fn test_ack_updates_are_monotonic() {
        let store = store();
        store
            .upsert_message(
                "+1555",
                ContactHints::default(),
                outbound("out1", "+1555", "hello", 10),
            )
            .await;

        let (conv, msg) = store
            .apply_ack("out1", AckLevel::Delivered)
            .await
            .expect("upgrade should apply");
        assert_eq!(msg.ack, AckLevel::Delivered);
        assert_eq!(conv.last_ack, AckLevel::Delivered);

        // Downgrades and repeats are dropped.
        assert!(store.apply_ack("out1", AckLevel::Sent).await.is_none());
        assert!(store.apply_ack("out1", AckLevel::Delivered).await.is_none());

        let (_, msg) = store.apply_ack("out1", AckLevel::Read).await.unwrap();
        assert_eq!(msg.ack, AckLevel::Read);
    }

    #[tokio::test]
    async fn test_ack_on_older_message_leaves_conversation_level_alone() {
        let store = store();
        store
            .upsert_message(
                "+1555",
                ContactHints::default(),
                outbound("out1", "+1555", "first", 10),
            )
            .await;
        store
            .upsert_message(
                "+1555",
                ContactHints::default(),
                outbound("out2", "+1555", "second", 20),
            )
            .await;

        let (conv, _) = store.apply_ack("out1", AckLevel::Read).await.unwrap();
        // out2 is still the latest message at level Sent.
        assert_eq!(conv.last_ack, AckLevel::Sent);
    }

    #[tokio::test]
    async fn test_snapshot_is_a_deep_copy() {
        let store = store();
        store
            .upsert_message(
                "+1555",
                ContactHints::default(),
                inbound("m1", "+1555", "one", 10),
            )
            .await;

        let before = store.snapshot().await;
        store
            .upsert_message(
                "+1555",
                ContactHints::default(),
                inbound("m2", "+1555", "two", 20),
            )
            .await;

        assert_eq!(before.messages["+1555"].len(), 1);
        assert_eq!(before.conversations[0].message_count, 1);
        let after = store.snapshot().await;
        assert_eq!(after.messages["+1555"].len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_sorts_by_recency() {
        let store = store();
        store
            .upsert_message(
                "+1111",
                ContactHints::default(),
                inbound("a", "+1111", "old", 10),
            )
            .await;
        store
            .upsert_message(
                "+2222",
                ContactHints::default(),
                inbound("b", "+2222", "new", 99),
            )
            .await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.conversations[0].key, "+2222");
        assert_eq!(snapshot.conversations[1].key, "+1111");
    }

    #[tokio::test]
    async fn test_hints_update_contact_attributes() {
        let store = store();
        let hints = ContactHints {
            display_name: Some("Ada".to_string()),
            business_name: Some("Ada Corp".to_string()),
            is_group: false,
            is_business: true,
        };
        let (conv, _) = store
            .upsert_message("+1555", hints, inbound("m1", "+1555", "hi", 10))
            .await;
        assert_eq!(conv.display_name, "Ada");
        assert_eq!(conv.business_name.as_deref(), Some("Ada Corp"));
        assert!(conv.is_business);
    }
}
