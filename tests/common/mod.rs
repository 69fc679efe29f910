#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use whatsapp_bridge::automation::{AutomationClient, ContactDetails, MediaPayload, SendReceipt};
use whatsapp_bridge::config::BridgeConfig;
use whatsapp_bridge::error::DriverError;
use whatsapp_bridge::types::events::{AutomationEvent, InboundMessage};

/// Scriptable driver double, in the spirit of the mock transports the real
/// client is tested with. Flip the `fail_*` switches to simulate transport
/// failures; every accepted call is recorded for assertions.
#[derive(Default)]
pub struct MockAutomationClient {
    pub fail_sends: AtomicBool,
    pub fail_downloads: AtomicBool,
    pub texts: Mutex<Vec<(String, String)>>,
    pub media: Mutex<Vec<(String, MediaPayload)>>,
    counter: AtomicU64,
}

impl MockAutomationClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn receipt(&self) -> SendReceipt {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        SendReceipt {
            message_id: format!("mock-{n}"),
            timestamp: None,
        }
    }
}

#[async_trait]
impl AutomationClient for MockAutomationClient {
    async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt, DriverError> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(DriverError::Rejected("mock send failure".to_string()));
        }
        self.texts
            .lock()
            .await
            .push((to.to_string(), body.to_string()));
        Ok(self.receipt())
    }

    async fn send_media(&self, to: &str, media: MediaPayload) -> Result<SendReceipt, DriverError> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(DriverError::Rejected("mock send failure".to_string()));
        }
        self.media.lock().await.push((to.to_string(), media));
        Ok(self.receipt())
    }

    async fn download_media(&self, _message_id: &str) -> Result<(Bytes, String), DriverError> {
        if self.fail_downloads.load(Ordering::Relaxed) {
            return Err(DriverError::Rejected("mock download failure".to_string()));
        }
        Ok((Bytes::from_static(b"mock-media"), "image/jpeg".to_string()))
    }

    async fn profile_picture(&self, _contact: &str) -> Result<Option<String>, DriverError> {
        Ok(None)
    }

    async fn contact_info(&self, contact: &str) -> Result<ContactDetails, DriverError> {
        Ok(ContactDetails {
            number: contact.to_string(),
            name: Some("Mock Contact".to_string()),
            about: None,
            is_business: false,
            profile_picture: None,
        })
    }

    async fn set_typing(&self, _chat: &str, _typing: bool) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Config with an isolated spool directory; keep the TempDir alive for the
/// duration of the test.
pub fn test_config(spool: &tempfile::TempDir) -> BridgeConfig {
    BridgeConfig {
        voice_spool_dir: spool.path().to_path_buf(),
        ..BridgeConfig::default()
    }
}

pub fn inbound_text(id: &str, chat: &str, body: &str, ts_secs: i64) -> AutomationEvent {
    AutomationEvent::Message(InboundMessage {
        id: id.to_string(),
        chat: chat.to_string(),
        sender: chat.to_string(),
        push_name: None,
        body: Some(body.to_string()),
        kind: Some("chat".to_string()),
        timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
        from_me: false,
        is_group: false,
        is_business: false,
        business_name: None,
        has_media: false,
        mimetype: None,
        filename: None,
    })
}

pub fn inbound_media(id: &str, chat: &str, caption: &str, ts_secs: i64) -> AutomationEvent {
    match inbound_text(id, chat, caption, ts_secs) {
        AutomationEvent::Message(mut message) => {
            message.kind = Some("image".to_string());
            message.mimetype = Some("image/jpeg".to_string());
            message.has_media = true;
            AutomationEvent::Message(message)
        }
        _ => unreachable!(),
    }
}

pub fn spool_entries(spool: &tempfile::TempDir) -> usize {
    std::fs::read_dir(spool.path()).map(|dir| dir.count()).unwrap_or(0)
}
