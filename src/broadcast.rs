use crate::types::conversation::Conversation;
use crate::types::message::ChatMessage;
use log::{debug, trace};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

use dashmap::DashMap;

/// A single named frame on the observer channel, multiplexed by event name.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub event: &'static str,
    pub data: Value,
    /// Correlation id echoed back on command replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl Frame {
    pub fn new(event: &'static str, data: impl Serialize) -> Self {
        Self {
            event,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            ack: None,
        }
    }

    pub fn ack_reply(ack: u64, data: impl Serialize) -> Self {
        Self {
            event: "ack",
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            ack: Some(ack),
        }
    }
}

/// A message together with its owning conversation's snapshot, the payload
/// of `new-message` and `message-sent` frames.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub message: ChatMessage,
    pub conversation: Conversation,
}

/// Fan-out point for every connected observer.
///
/// Two delivery paths exist on purpose. High-value events (a fresh message,
/// a typing indicator) go out immediately via [`ObserverHub::emit`].
/// Bulk reconciliation flows through [`ObserverHub::queue_message`] /
/// [`ObserverHub::queue_conversation`] and is flushed on a fixed interval
/// as one frame per batch type, which bounds broadcast frequency under
/// bursts. Delivery order between the two paths is unspecified, and both
/// may carry the same logical update: observers MUST reconcile by id, not
/// by arrival order. That is a hard contract, not an accident.
pub struct ObserverHub {
    observers: DashMap<u64, mpsc::UnboundedSender<Arc<Frame>>>,
    next_id: AtomicU64,
    frames_sent: AtomicU64,
    pending_messages: Mutex<Vec<ChatMessage>>,
    pending_conversations: Mutex<Vec<Conversation>>,
    flush_interval: Duration,
}

impl ObserverHub {
    pub fn new(flush_interval: Duration) -> Self {
        Self {
            observers: DashMap::new(),
            next_id: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            pending_messages: Mutex::new(Vec::new()),
            pending_conversations: Mutex::new(Vec::new()),
            flush_interval,
        }
    }

    /// Registers a new observer and returns its id plus the frame stream to
    /// forward into its transport.
    pub fn register(&self) -> (u64, mpsc::UnboundedReceiver<Arc<Frame>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.insert(id, tx);
        debug!(target: "Bridge/Hub", "observer {id} registered ({} connected)", self.observers.len());
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        self.observers.remove(&id);
        debug!(target: "Bridge/Hub", "observer {id} unregistered ({} connected)", self.observers.len());
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Immediate, unbatched broadcast to every connected observer.
    /// Observers whose channel has gone away are dropped.
    pub fn emit(&self, frame: Frame) {
        trace!(target: "Bridge/Hub", "emit {}", frame.event);
        let frame = Arc::new(frame);
        self.observers.retain(|_, tx| tx.send(frame.clone()).is_ok());
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Delivery to one specific observer (command replies, contact-info,
    /// initial state). Returns false if the observer is gone.
    pub fn send_to(&self, id: u64, frame: Frame) -> bool {
        match self.observers.get(&id) {
            Some(tx) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                tx.send(Arc::new(frame)).is_ok()
            }
            None => false,
        }
    }

    /// Appends a message to the pending batch, replacing a stale copy of
    /// the same message so a burst coalesces to its latest state.
    pub async fn queue_message(&self, message: ChatMessage) {
        let mut pending = self.pending_messages.lock().await;
        pending.retain(|m| !(m.id == message.id && m.chat == message.chat));
        pending.push(message);
    }

    /// Appends a conversation snapshot to the pending batch, keeping only
    /// the latest snapshot per contact key.
    pub async fn queue_conversation(&self, conversation: Conversation) {
        let mut pending = self.pending_conversations.lock().await;
        pending.retain(|c| c.key != conversation.key);
        pending.push(conversation);
    }

    /// Drains the pending batches into at most one frame per batch type.
    pub async fn flush(&self) {
        let messages: Vec<ChatMessage> =
            std::mem::take(&mut *self.pending_messages.lock().await);
        let conversations: Vec<Conversation> =
            std::mem::take(&mut *self.pending_conversations.lock().await);

        if !messages.is_empty() {
            debug!(target: "Bridge/Hub", "flushing message batch of {}", messages.len());
            self.emit(Frame::new("message-batch", messages));
        }
        if !conversations.is_empty() {
            debug!(target: "Bridge/Hub", "flushing conversation batch of {}", conversations.len());
            self.emit(Frame::new("conversation-batch", conversations));
        }
    }

    /// Background flush loop. Spawn once at startup.
    pub async fn run_flusher(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.flush_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            self.flush().await;
        }
    }
}
