use crate::types::message::AckLevel;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Raw inbound message as reported by the session driver, before any
/// registry bookkeeping happens.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    /// Contact key of the owning conversation.
    pub chat: String,
    pub sender: String,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Driver media-type tag ("chat", "image", "ptt", ...).
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub is_business: bool,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

/// Internal event shape every automation-client callback is translated
/// into. All ingestion funnels through one `Bridge::ingest` match on this
/// enum, so the dedup/registry/broadcast pipeline is uniform regardless of
/// where an event originated.
#[derive(Debug, Clone)]
pub enum AutomationEvent {
    /// Opaque pairing payload for the UI to render.
    Qr(String),
    Ready,
    Authenticated,
    AuthFailure(String),
    Disconnected(String),
    Message(InboundMessage),
    MessageAck { id: String, level: AckLevel },
    ChatPresence { chat: String, typing: bool },
}
