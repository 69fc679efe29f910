use crate::automation::AutomationClient;
use crate::broadcast::{Frame, MessageEnvelope, ObserverHub};
use crate::config::BridgeConfig;
use crate::dedup::DedupCache;
use crate::registry::{ContactHints, ConversationStore, InMemoryConversationStore, Snapshot};
use crate::staging::{StagingStats, StagingStore};
use crate::types::events::{AutomationEvent, InboundMessage};
use crate::types::message::{AckLevel, ChatMessage, Direction, MessageKind, SELF_SENDER};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Body shown in place of media whose download failed. A broken blob must
/// not fail the whole event, only degrade it.
const MEDIA_UNAVAILABLE: &str = "[media unavailable]";

/// Health counters for GET /status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub conversations: usize,
    pub messages: usize,
    pub dedup_entries: usize,
    pub staging: StagingStats,
    pub observers: usize,
    pub frames_sent: u64,
    pub events_ingested: u64,
    pub duplicates_dropped: u64,
    pub driver_ready: bool,
    pub driver_authenticated: bool,
}

/// The synchronization engine: one instance per process, shared by the
/// ingestion loop, the command dispatcher and the server layer.
pub struct Bridge {
    pub(crate) config: BridgeConfig,
    pub store: Arc<dyn ConversationStore>,
    pub dedup: Arc<DedupCache>,
    pub staging: Arc<StagingStore>,
    pub hub: Arc<ObserverHub>,
    pub automation: Arc<dyn AutomationClient>,

    pub(crate) driver_ready: AtomicBool,
    pub(crate) driver_authenticated: AtomicBool,
    pub(crate) events_ingested: AtomicU64,
    pub(crate) duplicates_dropped: AtomicU64,
    pub(crate) command_seq: AtomicU64,
}

impl Bridge {
    pub fn new(config: BridgeConfig, automation: Arc<dyn AutomationClient>) -> Arc<Self> {
        let dedup = Arc::new(DedupCache::new(
            config.dedup_window,
            config.dedup_sweep_interval,
        ));
        let store = Arc::new(InMemoryConversationStore::new(dedup.clone()));
        Self::with_store(config, automation, store, dedup)
    }

    /// Constructor with an injected registry, for tests and alternative
    /// store implementations.
    pub fn with_store(
        config: BridgeConfig,
        automation: Arc<dyn AutomationClient>,
        store: Arc<dyn ConversationStore>,
        dedup: Arc<DedupCache>,
    ) -> Arc<Self> {
        let staging = Arc::new(StagingStore::new(
            config.staging_retention,
            config.staging_sweep_interval,
        ));
        let hub = Arc::new(ObserverHub::new(config.batch_flush_interval));
        Arc::new(Self {
            config,
            store,
            dedup,
            staging,
            hub,
            automation,
            driver_ready: AtomicBool::new(false),
            driver_authenticated: AtomicBool::new(false),
            events_ingested: AtomicU64::new(0),
            duplicates_dropped: AtomicU64::new(0),
            command_seq: AtomicU64::new(0),
        })
    }

    /// Spawns the periodic maintenance loops (dedup sweep, staging sweep,
    /// batch flush). Call once at startup.
    pub fn start_background_tasks(self: &Arc<Self>) {
        tokio::spawn(self.dedup.clone().run_sweeper());
        tokio::spawn(self.staging.clone().run_sweeper());
        tokio::spawn(self.hub.clone().run_flusher());
    }

    /// Consumes the adapter's event channel until it closes. Errors inside
    /// a single event are isolated: one bad event never stops the loop.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<AutomationEvent>) {
        while let Some(event) = events.recv().await {
            self.ingest(event).await;
        }
        info!(target: "Bridge", "automation event channel closed, ingestion stopped");
    }

    /// Single entry point for every automation-client callback.
    pub async fn ingest(&self, event: AutomationEvent) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
        match event {
            AutomationEvent::Qr(payload) => {
                info!(target: "Bridge", "pairing QR received");
                self.hub.emit(Frame::new("qr", payload));
            }
            AutomationEvent::Ready => {
                info!(target: "Bridge", "driver session ready");
                self.driver_ready.store(true, Ordering::Relaxed);
                self.hub.emit(Frame::new("whatsapp-ready", ()));
            }
            AutomationEvent::Authenticated => {
                info!(target: "Bridge", "driver session authenticated");
                self.driver_authenticated.store(true, Ordering::Relaxed);
                self.hub.emit(Frame::new("whatsapp-authenticated", ()));
            }
            AutomationEvent::AuthFailure(message) => {
                warn!(target: "Bridge", "driver authentication failed: {message}");
                self.driver_authenticated.store(false, Ordering::Relaxed);
                self.hub
                    .emit(Frame::new("whatsapp-auth-failure", json!({ "message": message })));
            }
            AutomationEvent::Disconnected(reason) => {
                warn!(target: "Bridge", "driver disconnected: {reason}");
                self.driver_ready.store(false, Ordering::Relaxed);
                self.driver_authenticated.store(false, Ordering::Relaxed);
                self.hub
                    .emit(Frame::new("whatsapp-disconnected", json!({ "reason": reason })));
            }
            AutomationEvent::Message(raw) => self.handle_inbound(raw).await,
            AutomationEvent::MessageAck { id, level } => self.handle_ack(&id, level).await,
            AutomationEvent::ChatPresence { chat, typing } => {
                self.hub.emit(Frame::new(
                    "typing-indicator",
                    json!({ "chat": chat, "typing": typing }),
                ));
            }
        }
    }

    async fn handle_inbound(&self, raw: InboundMessage) {
        let kind = MessageKind::from_raw(raw.kind.as_deref(), raw.mimetype.as_deref());
        let mut body = raw.body.clone().unwrap_or_default();

        // Media is pulled through the driver and parked in staging; the
        // message keeps only the staging id. Download failure degrades the
        // body instead of failing ingestion.
        let mut media_id = None;
        if raw.has_media {
            match self.automation.download_media(&raw.id).await {
                Ok((data, mime)) => {
                    media_id = Some(self.staging.put(data, mime));
                }
                Err(e) => {
                    warn!(target: "Bridge", "media download for {} failed: {e}", raw.id);
                    if body.is_empty() {
                        body = MEDIA_UNAVAILABLE.to_string();
                    }
                }
            }
        }

        let (sender, recipient, direction, ack) = if raw.from_me {
            (
                SELF_SENDER.to_string(),
                raw.chat.clone(),
                Direction::Sent,
                AckLevel::Sent,
            )
        } else {
            (
                raw.sender.clone(),
                SELF_SENDER.to_string(),
                Direction::Received,
                AckLevel::None,
            )
        };

        let message = ChatMessage {
            id: raw.id.clone(),
            chat: raw.chat.clone(),
            sender,
            recipient,
            body,
            timestamp: raw.timestamp,
            direction,
            kind,
            from_me: raw.from_me,
            ack,
            media_id,
            filename: raw.filename.clone(),
        };

        let hints = ContactHints {
            display_name: raw.push_name.clone(),
            business_name: raw.business_name.clone(),
            is_group: raw.is_group,
            is_business: raw.is_business,
        };

        let first_contact = self.store.conversation(&raw.chat).await.is_none();
        let (mut conversation, inserted) = self
            .store
            .upsert_message(&raw.chat, hints, message.clone())
            .await;
        if !inserted {
            self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(target: "Bridge", "duplicate message {} for {} dropped", raw.id, raw.chat);
            return;
        }

        // Avatar fetch is best effort and only worth one round trip.
        if first_contact {
            match self.automation.profile_picture(&raw.chat).await {
                Ok(Some(url)) => {
                    if let Some(updated) = self.store.set_avatar(&raw.chat, url).await {
                        conversation = updated;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(target: "Bridge", "avatar fetch for {} failed: {e}", raw.chat)
                }
            }
        }

        self.hub.emit(Frame::new(
            "new-message",
            MessageEnvelope {
                message: message.clone(),
                conversation: conversation.clone(),
            },
        ));
        self.hub.queue_message(message).await;
        self.hub.queue_conversation(conversation).await;
    }

    async fn handle_ack(&self, id: &str, level: AckLevel) {
        let Some((conversation, message)) = self.store.apply_ack(id, level).await else {
            debug!(target: "Bridge", "ack for unknown or already-acked message {id}");
            return;
        };
        self.hub
            .emit(Frame::new("conversation-updated", conversation.clone()));
        self.hub.queue_message(message).await;
        self.hub.queue_conversation(conversation).await;
    }

    /// Full-state frame for a freshly connected observer, built from a
    /// snapshot taken at this moment.
    pub async fn initial_state(&self) -> Frame {
        Frame::new("initial-state", self.snapshot().await)
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.store.snapshot().await
    }

    pub fn status(&self) -> StatusReport {
        let store = self.store.stats();
        StatusReport {
            conversations: store.conversations,
            messages: store.messages,
            dedup_entries: self.dedup.len(),
            staging: self.staging.stats(),
            observers: self.hub.observer_count(),
            frames_sent: self.hub.frames_sent(),
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            driver_ready: self.driver_ready.load(Ordering::Relaxed),
            driver_authenticated: self.driver_authenticated.load(Ordering::Relaxed),
        }
    }
}
