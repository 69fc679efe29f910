use crate::types::message::AckLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-contact conversation state as shown in the UI sidebar.
///
/// Conversations are created lazily on first reference and never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Canonical contact key (phone-number-like string).
    pub key: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
    pub last_message: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_message_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub unread_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub is_group: bool,
    pub is_business: bool,
    pub last_from_me: bool,
    pub last_ack: AckLevel,
}

impl Conversation {
    /// Fresh conversation for a contact we have never seen. The contact key
    /// doubles as the display name until a push name arrives.
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            display_name: key.to_string(),
            business_name: None,
            last_message: String::new(),
            last_message_time: None,
            message_count: 0,
            unread_count: 0,
            avatar: None,
            is_group: false,
            is_business: false,
            last_from_me: false,
            last_ack: AckLevel::None,
        }
    }
}

/// Registry totals for the /status endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub conversations: usize,
    pub messages: usize,
}
