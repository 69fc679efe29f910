use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender identifier used for messages authored by this session.
pub const SELF_SENDER: &str = "me";

/// Delivery acknowledgment level of an outbound message, as reported by the
/// session driver. Levels are ordered and only ever move upward: a `Read`
/// message never falls back to `Delivered`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "u8", from = "u8")]
pub enum AckLevel {
    #[default]
    None,
    Sent,
    Delivered,
    Read,
}

impl From<AckLevel> for u8 {
    fn from(level: AckLevel) -> Self {
        match level {
            AckLevel::None => 0,
            AckLevel::Sent => 1,
            AckLevel::Delivered => 2,
            AckLevel::Read => 3,
        }
    }
}

impl From<u8> for AckLevel {
    fn from(raw: u8) -> Self {
        match raw {
            0 => AckLevel::None,
            1 => AckLevel::Sent,
            2 => AckLevel::Delivered,
            // The driver may report levels past "read" (e.g. voice notes
            // that were played); they all map to the top of the order.
            _ => AckLevel::Read,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Voice,
    Audio,
    File,
}

impl MessageKind {
    /// Maps the driver's raw type tag (falling back to the MIME type) onto
    /// a message kind. Unknown media tags degrade to `File`, never to an
    /// error: classification must not stop ingestion.
    pub fn from_raw(kind: Option<&str>, mimetype: Option<&str>) -> Self {
        match kind {
            Some("chat") | Some("text") | None => {
                if let Some(mime) = mimetype {
                    Self::from_mime(mime)
                } else {
                    MessageKind::Text
                }
            }
            Some("image") | Some("sticker") => MessageKind::Image,
            Some("video") => MessageKind::Video,
            Some("ptt") | Some("voice") => MessageKind::Voice,
            Some("audio") => MessageKind::Audio,
            _ => MessageKind::File,
        }
    }

    pub fn from_mime(mime: &str) -> Self {
        match mime.split('/').next().unwrap_or("") {
            "image" => MessageKind::Image,
            "video" => MessageKind::Video,
            "audio" => MessageKind::Audio,
            "text" => MessageKind::Text,
            _ => MessageKind::File,
        }
    }

}

/// A single message inside a conversation.
///
/// `media_id` is a weak reference into the staging store (an id, not a
/// pointer): the staged blob is evicted on its own schedule and the message
/// outlives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Provider-assigned id, unique per contact and direction.
    pub id: String,
    /// Contact key of the owning conversation.
    pub chat: String,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub kind: MessageKind,
    pub from_me: bool,
    pub ack: AckLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ChatMessage {
    /// One-line summary used for a conversation's last-message preview.
    pub fn preview(&self) -> String {
        match self.kind {
            MessageKind::Text => self.body.clone(),
            MessageKind::Image => "[image]".to_string(),
            MessageKind::Video => "[video]".to_string(),
            MessageKind::Voice => "[voice note]".to_string(),
            MessageKind::Audio => "[audio]".to_string(),
            MessageKind::File => self
                .filename
                .clone()
                .unwrap_or_else(|| "[file]".to_string()),
        }
    }
}
