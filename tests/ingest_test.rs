mod common;

use async_trait::async_trait;
use common::{MockAutomationClient, inbound_media, inbound_text, test_config};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use whatsapp_bridge::bridge::Bridge;
use whatsapp_bridge::dedup::DedupCache;
use whatsapp_bridge::registry::{
    ContactHints, ConversationStore, InMemoryConversationStore, Snapshot,
};
use whatsapp_bridge::types::conversation::{Conversation, StoreStats};
use whatsapp_bridge::types::events::AutomationEvent;
use whatsapp_bridge::types::message::{AckLevel, ChatMessage};

#[tokio::test]
async fn test_inbound_message_creates_conversation() {
    let spool = tempfile::tempdir().unwrap();
    let bridge = Bridge::new(test_config(&spool), MockAutomationClient::new());

    bridge.ingest(inbound_text("A1", "+1555", "Hi", 1_000)).await;

    let conversation = bridge.store.conversation("+1555").await.unwrap();
    assert_eq!(conversation.message_count, 1);
    assert_eq!(conversation.unread_count, 1);
    assert_eq!(conversation.last_message, "Hi");
    assert!(!conversation.last_from_me);
}

#[tokio::test]
async fn test_reingested_event_changes_nothing() {
    let spool = tempfile::tempdir().unwrap();
    let bridge = Bridge::new(test_config(&spool), MockAutomationClient::new());

    bridge.ingest(inbound_text("A1", "+1555", "Hi", 1_000)).await;
    bridge.ingest(inbound_text("A1", "+1555", "Hi", 1_000)).await;

    let conversation = bridge.store.conversation("+1555").await.unwrap();
    assert_eq!(conversation.message_count, 1);
    assert_eq!(conversation.unread_count, 1);

    let status = bridge.status();
    assert_eq!(status.messages, 1);
    assert_eq!(status.duplicates_dropped, 1);
}

#[tokio::test]
async fn test_out_of_order_events_keep_history_sorted() {
    let spool = tempfile::tempdir().unwrap();
    let bridge = Bridge::new(test_config(&spool), MockAutomationClient::new());

    for (id, ts) in [("m2", 200), ("m1", 100), ("m3", 300)] {
        bridge.ingest(inbound_text(id, "+1555", id, ts)).await;
    }

    let messages = bridge.store.messages("+1555").await.unwrap();
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m1", "m2", "m3"]);
}

#[tokio::test]
async fn test_media_download_is_staged() {
    let spool = tempfile::tempdir().unwrap();
    let bridge = Bridge::new(test_config(&spool), MockAutomationClient::new());

    bridge
        .ingest(inbound_media("M1", "+1555", "look at this", 1_000))
        .await;

    let message = bridge.store.find_message("M1").await.unwrap();
    let media_id = message.media_id.expect("media should be staged");
    let (data, mime) = bridge.staging.get(&media_id).expect("staged entry");
    assert_eq!(&data[..], b"mock-media");
    assert_eq!(mime, "image/jpeg");
}

#[tokio::test]
async fn test_media_failure_degrades_to_placeholder() {
    let spool = tempfile::tempdir().unwrap();
    let mock = MockAutomationClient::new();
    mock.fail_downloads.store(true, Ordering::Relaxed);
    let bridge = Bridge::new(test_config(&spool), mock);

    bridge.ingest(inbound_media("M1", "+1555", "", 1_000)).await;
    // The event still lands; only the payload is degraded.
    let message = bridge.store.find_message("M1").await.unwrap();
    assert!(message.media_id.is_none());
    assert_eq!(message.body, "[media unavailable]");

    // Later events keep flowing.
    bridge.ingest(inbound_text("A2", "+1555", "still alive", 2_000)).await;
    assert_eq!(bridge.status().messages, 2);
}

#[tokio::test]
async fn test_ack_event_upgrades_message_level() {
    let spool = tempfile::tempdir().unwrap();
    let bridge = Bridge::new(test_config(&spool), MockAutomationClient::new());

    let mut event = inbound_text("S1", "+1555", "sent by us", 1_000);
    if let AutomationEvent::Message(ref mut message) = event {
        message.from_me = true;
    }
    bridge.ingest(event).await;

    bridge
        .ingest(AutomationEvent::MessageAck {
            id: "S1".to_string(),
            level: AckLevel::Read,
        })
        .await;

    let message = bridge.store.find_message("S1").await.unwrap();
    assert_eq!(message.ack, AckLevel::Read);
    let conversation = bridge.store.conversation("+1555").await.unwrap();
    assert_eq!(conversation.last_ack, AckLevel::Read);
    // Sends from this session never count as unread.
    assert_eq!(conversation.unread_count, 0);
}

#[tokio::test]
async fn test_observers_receive_immediate_frames() {
    let spool = tempfile::tempdir().unwrap();
    let bridge = Bridge::new(test_config(&spool), MockAutomationClient::new());
    let (_id, mut frames) = bridge.hub.register();

    bridge.ingest(inbound_text("A1", "+1555", "Hi", 1_000)).await;
    let frame = frames.recv().await.unwrap();
    assert_eq!(frame.event, "new-message");
    assert_eq!(frame.data["message"]["id"], "A1");
    assert_eq!(frame.data["conversation"]["unreadCount"], 1);

    bridge
        .ingest(AutomationEvent::ChatPresence {
            chat: "+1555".to_string(),
            typing: true,
        })
        .await;
    let frame = frames.recv().await.unwrap();
    assert_eq!(frame.event, "typing-indicator");
    assert_eq!(frame.data["typing"], true);
}

/// Store double that counts upserts while delegating to the real registry.
struct CountingStore {
    inner: InMemoryConversationStore,
    upserts: AtomicU64,
}

#[async_trait]
impl ConversationStore for CountingStore {
    async fn upsert_message(
        &self,
        key: &str,
        hints: ContactHints,
        message: ChatMessage,
    ) -> (Conversation, bool) {
        self.upserts.fetch_add(1, Ordering::Relaxed);
        self.inner.upsert_message(key, hints, message).await
    }

    async fn mark_read(&self, key: &str) -> Option<Conversation> {
        self.inner.mark_read(key).await
    }

    async fn apply_ack(
        &self,
        message_id: &str,
        level: AckLevel,
    ) -> Option<(Conversation, ChatMessage)> {
        self.inner.apply_ack(message_id, level).await
    }

    async fn conversation(&self, key: &str) -> Option<Conversation> {
        self.inner.conversation(key).await
    }

    async fn messages(&self, key: &str) -> Option<Vec<ChatMessage>> {
        self.inner.messages(key).await
    }

    async fn find_message(&self, message_id: &str) -> Option<ChatMessage> {
        self.inner.find_message(message_id).await
    }

    async fn set_avatar(&self, key: &str, url: String) -> Option<Conversation> {
        self.inner.set_avatar(key, url).await
    }

    async fn snapshot(&self) -> Snapshot {
        self.inner.snapshot().await
    }

    fn stats(&self) -> StoreStats {
        self.inner.stats()
    }
}

#[tokio::test]
async fn test_injected_store_sees_every_ingested_message() {
    let spool = tempfile::tempdir().unwrap();
    let config = test_config(&spool);
    let dedup = Arc::new(DedupCache::new(
        Duration::from_secs(300),
        Duration::from_secs(60),
    ));
    let store = Arc::new(CountingStore {
        inner: InMemoryConversationStore::new(dedup.clone()),
        upserts: AtomicU64::new(0),
    });
    let bridge = Bridge::with_store(config, MockAutomationClient::new(), store.clone(), dedup);

    bridge.ingest(inbound_text("A1", "+1555", "Hi", 1_000)).await;
    bridge.ingest(inbound_text("A2", "+1555", "Ho", 2_000)).await;
    // Duplicates still reach the store; the store's dedup gate rejects them.
    bridge.ingest(inbound_text("A1", "+1555", "Hi", 1_000)).await;

    assert_eq!(store.upserts.load(Ordering::Relaxed), 3);
    assert_eq!(bridge.status().messages, 2);
    assert_eq!(store.conversation("+1555").await.unwrap().message_count, 2);
}

#[tokio::test]
async fn test_lifecycle_events_toggle_status_flags() {
    let spool = tempfile::tempdir().unwrap();
    let bridge = Bridge::new(test_config(&spool), MockAutomationClient::new());
    let (_id, mut frames) = bridge.hub.register();

    bridge.ingest(AutomationEvent::Ready).await;
    bridge.ingest(AutomationEvent::Authenticated).await;
    assert!(bridge.status().driver_ready);
    assert!(bridge.status().driver_authenticated);
    assert_eq!(frames.recv().await.unwrap().event, "whatsapp-ready");
    assert_eq!(frames.recv().await.unwrap().event, "whatsapp-authenticated");

    bridge
        .ingest(AutomationEvent::Disconnected("gone".to_string()))
        .await;
    assert!(!bridge.status().driver_ready);
    assert_eq!(frames.recv().await.unwrap().event, "whatsapp-disconnected");
}
