use crate::error::DriverError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod ws;

/// Outcome of a successful driver send.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message_id: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Media handed to the driver for an outbound send.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub data: Bytes,
    pub mimetype: String,
    pub filename: Option<String>,
    pub caption: Option<String>,
    /// Send as a voice note instead of a plain audio attachment.
    pub as_voice: bool,
}

/// Contact profile as reported by the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetails {
    pub number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub is_business: bool,
    #[serde(default)]
    pub profile_picture: Option<String>,
}

/// Send/receive primitives of the external session driver.
///
/// The driver itself (browser automation, QR pairing, the actual WhatsApp
/// transport) is opaque; the engine only ever sees this seam, which also
/// makes it trivial to substitute a mock in tests.
#[async_trait]
pub trait AutomationClient: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt, DriverError>;

    async fn send_media(&self, to: &str, media: MediaPayload) -> Result<SendReceipt, DriverError>;

    /// Fetches the raw media bytes and MIME type of a previously received
    /// message from the driver.
    async fn download_media(&self, message_id: &str) -> Result<(Bytes, String), DriverError>;

    /// Profile picture URL for a contact, if one is set.
    async fn profile_picture(&self, contact: &str) -> Result<Option<String>, DriverError>;

    async fn contact_info(&self, contact: &str) -> Result<ContactDetails, DriverError>;

    async fn set_typing(&self, chat: &str, typing: bool) -> Result<(), DriverError>;
}
