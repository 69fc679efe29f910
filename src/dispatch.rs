use crate::automation::{MediaPayload, SendReceipt};
use crate::bridge::Bridge;
use crate::broadcast::{Frame, MessageEnvelope};
use crate::error::CommandError;
use crate::registry::{ContactHints, ConversationStore};
use crate::types::message::{AckLevel, ChatMessage, Direction, MessageKind, SELF_SENDER};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::Utc;
use log::{debug, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::Ordering;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageCommand {
    pub to: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendVoiceCommand {
    pub chat_id: String,
    /// Base64-encoded audio payload.
    pub buffer: String,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMediaCommand {
    pub chat_id: String,
    pub data_url: String,
    #[serde(default)]
    pub filename: Option<String>,
    pub mimetype: String,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualForwardCommand {
    pub message_id: String,
    pub to: String,
}

/// Per-command result delivered to the issuing observer's callback.
#[derive(Debug, Clone, Serialize)]
pub struct CommandAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandAck {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn err(e: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(e.to_string()),
        }
    }
}

/// Lifecycle of one outbound command: pending -> sending -> sent | error.
/// Exists for the logs; the caller only ever sees the terminal ack.
struct CommandTrace {
    seq: u64,
    kind: &'static str,
}

impl CommandTrace {
    fn begin(bridge: &Bridge, kind: &'static str) -> Self {
        let seq = bridge.command_seq.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(target: "Bridge/Dispatch", "{kind}[{seq}] pending");
        Self { seq, kind }
    }

    fn sending(&self) {
        debug!(target: "Bridge/Dispatch", "{}[{}] pending -> sending", self.kind, self.seq);
    }

    fn finish(&self, result: Result<(), CommandError>) -> CommandAck {
        match result {
            Ok(()) => {
                debug!(target: "Bridge/Dispatch", "{}[{}] sending -> sent", self.kind, self.seq);
                CommandAck::ok()
            }
            Err(e) => {
                warn!(target: "Bridge/Dispatch", "{}[{}] -> error: {e}", self.kind, self.seq);
                CommandAck::err(e)
            }
        }
    }
}

fn required(value: &str, field: &str) -> Result<(), CommandError> {
    if value.trim().is_empty() {
        return Err(CommandError::Validation(format!("missing {field}")));
    }
    Ok(())
}

/// Splits a `data:<mime>;base64,<payload>` URL into raw bytes.
fn decode_data_url(data_url: &str) -> Result<Bytes, CommandError> {
    let payload = data_url
        .split_once("base64,")
        .map(|(_, payload)| payload)
        .ok_or_else(|| CommandError::Validation("dataUrl is not base64-encoded".to_string()))?;
    let bytes = BASE64
        .decode(payload.as_bytes())
        .map_err(|e| CommandError::Validation(format!("bad dataUrl payload: {e}")))?;
    Ok(Bytes::from(bytes))
}

impl Bridge {
    /// `send-message {to, body}`.
    pub async fn send_message(&self, cmd: SendMessageCommand) -> CommandAck {
        let trace = CommandTrace::begin(self, "send-message");
        let result = self.dispatch_send_message(&trace, cmd).await;
        trace.finish(result)
    }

    async fn dispatch_send_message(
        &self,
        trace: &CommandTrace,
        cmd: SendMessageCommand,
    ) -> Result<(), CommandError> {
        required(&cmd.to, "recipient")?;
        required(&cmd.body, "body")?;

        trace.sending();
        // The transport call can block for seconds; no registry lock is
        // held anywhere across it.
        let receipt = self.automation.send_text(&cmd.to, &cmd.body).await?;
        self.record_outbound(&cmd.to, receipt, cmd.body, MessageKind::Text, None, None)
            .await;
        Ok(())
    }

    /// `send-media {chatId, dataUrl, filename, mimetype, caption}`.
    pub async fn send_media(&self, cmd: SendMediaCommand) -> CommandAck {
        let trace = CommandTrace::begin(self, "send-media");
        let result = self.dispatch_send_media(&trace, cmd).await;
        trace.finish(result)
    }

    async fn dispatch_send_media(
        &self,
        trace: &CommandTrace,
        cmd: SendMediaCommand,
    ) -> Result<(), CommandError> {
        required(&cmd.chat_id, "recipient")?;
        required(&cmd.mimetype, "mimetype")?;
        let data = decode_data_url(&cmd.data_url)?;

        trace.sending();
        let receipt = self
            .automation
            .send_media(
                &cmd.chat_id,
                MediaPayload {
                    data: data.clone(),
                    mimetype: cmd.mimetype.clone(),
                    filename: cmd.filename.clone(),
                    caption: cmd.caption.clone(),
                    as_voice: false,
                },
            )
            .await?;

        // Staged after the send so observers can fetch what just went out.
        let media_id = self.staging.put(data, cmd.mimetype.clone());
        self.record_outbound(
            &cmd.chat_id,
            receipt,
            cmd.caption.unwrap_or_default(),
            MessageKind::from_mime(&cmd.mimetype),
            Some(media_id),
            cmd.filename,
        )
        .await;
        Ok(())
    }

    /// `send-voice {chatId, buffer, caption}`.
    pub async fn send_voice(&self, cmd: SendVoiceCommand) -> CommandAck {
        let trace = CommandTrace::begin(self, "send-voice");
        let result = self.dispatch_send_voice(&trace, cmd).await;
        trace.finish(result)
    }

    async fn dispatch_send_voice(
        &self,
        trace: &CommandTrace,
        cmd: SendVoiceCommand,
    ) -> Result<(), CommandError> {
        required(&cmd.chat_id, "recipient")?;
        let data = Bytes::from(
            BASE64
                .decode(cmd.buffer.as_bytes())
                .map_err(|e| CommandError::Validation(format!("bad voice buffer: {e}")))?,
        );
        if data.is_empty() {
            return Err(CommandError::Validation("empty voice buffer".to_string()));
        }

        // The audio is spooled to disk for the duration of the transport
        // call; the guard removes it on success and failure alike.
        let mut raw = [0u8; 8];
        rand::rng().fill_bytes(&mut raw);
        let spool_path = self
            .config
            .voice_spool_dir
            .join(format!("voice-{}.ogg", hex::encode(raw)));
        tokio::fs::write(&spool_path, &data)
            .await
            .map_err(|e| CommandError::Staging(format!("voice spool failed: {e}")))?;
        let _cleanup = scopeguard::guard(spool_path, |path| {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(target: "Bridge/Dispatch", "failed to remove voice spool {}: {e}", path.display());
                }
            }
        });

        trace.sending();
        let receipt = self
            .automation
            .send_media(
                &cmd.chat_id,
                MediaPayload {
                    data: data.clone(),
                    mimetype: "audio/ogg; codecs=opus".to_string(),
                    filename: None,
                    caption: cmd.caption.clone(),
                    as_voice: true,
                },
            )
            .await?;

        let media_id = self.staging.put(data, "audio/ogg; codecs=opus");
        self.record_outbound(
            &cmd.chat_id,
            receipt,
            cmd.caption.unwrap_or_default(),
            MessageKind::Voice,
            Some(media_id),
            None,
        )
        .await;
        Ok(())
    }

    /// `manual-forward {messageId, to}`. Media forwards are atomic: if the
    /// original media can be neither read from staging nor re-downloaded,
    /// the whole forward fails rather than degrading to text.
    pub async fn manual_forward(&self, cmd: ManualForwardCommand) -> CommandAck {
        let trace = CommandTrace::begin(self, "manual-forward");
        let result = self.dispatch_manual_forward(&trace, cmd).await;
        trace.finish(result)
    }

    async fn dispatch_manual_forward(
        &self,
        trace: &CommandTrace,
        cmd: ManualForwardCommand,
    ) -> Result<(), CommandError> {
        required(&cmd.message_id, "messageId")?;
        required(&cmd.to, "recipient")?;

        let original = self
            .store
            .find_message(&cmd.message_id)
            .await
            .ok_or_else(|| CommandError::UnknownMessage(cmd.message_id.clone()))?;

        if original.media_id.is_some() {
            let staged = original
                .media_id
                .as_deref()
                .and_then(|media_id| self.staging.get(media_id));
            let (data, mime) = match staged {
                Some(found) => found,
                // Staging already evicted the blob: pull it again from the
                // driver.
                None => self
                    .automation
                    .download_media(&original.id)
                    .await
                    .map_err(|e| CommandError::MediaUnavailable(e.to_string()))?,
            };

            trace.sending();
            let receipt = self
                .automation
                .send_media(
                    &cmd.to,
                    MediaPayload {
                        data: data.clone(),
                        mimetype: mime.clone(),
                        filename: original.filename.clone(),
                        caption: (!original.body.is_empty()).then(|| original.body.clone()),
                        as_voice: original.kind == MessageKind::Voice,
                    },
                )
                .await?;

            let media_id = self.staging.put(data, mime);
            self.record_outbound(
                &cmd.to,
                receipt,
                original.body,
                original.kind,
                Some(media_id),
                original.filename,
            )
            .await;
        } else {
            // No media stored: the original body (the caption, for media
            // messages that kept none) becomes the forwarded text.
            trace.sending();
            let receipt = self.automation.send_text(&cmd.to, &original.body).await?;
            self.record_outbound(&cmd.to, receipt, original.body, MessageKind::Text, None, None)
                .await;
        }
        Ok(())
    }

    /// `get-conversation {phoneNumber}`: caller-local history frame.
    pub async fn conversation_messages(&self, phone_number: &str) -> Frame {
        let messages = self.store.messages(phone_number).await.unwrap_or_default();
        Frame::new(
            "conversation-messages",
            json!({ "phoneNumber": phone_number, "messages": messages }),
        )
    }

    /// `mark-as-read {phoneNumber}`.
    pub async fn mark_as_read(&self, phone_number: &str) -> CommandAck {
        match self.store.mark_read(phone_number).await {
            Some(conversation) => {
                self.hub
                    .emit(Frame::new("conversation-updated", conversation.clone()));
                self.hub.queue_conversation(conversation).await;
                CommandAck::ok()
            }
            None => {
                debug!(target: "Bridge/Dispatch", "mark-as-read for unknown contact {phone_number}");
                CommandAck::ok()
            }
        }
    }

    /// `get-contact-info {phoneNumber}`: caller-local `contact-info` or
    /// `contact-info-error` frame. Lookup failures stay with the caller.
    pub async fn contact_info_frame(&self, phone_number: &str) -> Frame {
        if phone_number.trim().is_empty() {
            return Frame::new(
                "contact-info-error",
                json!({ "phoneNumber": phone_number, "error": "missing phoneNumber" }),
            );
        }
        match self.automation.contact_info(phone_number).await {
            Ok(details) => Frame::new("contact-info", details),
            Err(e) => Frame::new(
                "contact-info-error",
                json!({ "phoneNumber": phone_number, "error": e.to_string() }),
            ),
        }
    }

    /// `typing` / `stop-typing {chatId}`.
    pub async fn set_typing(&self, chat_id: &str, typing: bool) -> CommandAck {
        if chat_id.trim().is_empty() {
            return CommandAck::err("missing chatId");
        }
        match self.automation.set_typing(chat_id, typing).await {
            Ok(()) => CommandAck::ok(),
            Err(e) => CommandAck::err(e),
        }
    }

    /// Folds a confirmed outbound send into the registry and broadcasts it.
    /// Runs strictly after the transport call returned, so no lock ever
    /// spans the await into the driver.
    async fn record_outbound(
        &self,
        to: &str,
        receipt: SendReceipt,
        body: String,
        kind: MessageKind,
        media_id: Option<String>,
        filename: Option<String>,
    ) {
        let message = ChatMessage {
            id: receipt.message_id,
            chat: to.to_string(),
            sender: SELF_SENDER.to_string(),
            recipient: to.to_string(),
            body,
            timestamp: receipt.timestamp.unwrap_or_else(Utc::now),
            direction: Direction::Sent,
            kind,
            from_me: true,
            ack: AckLevel::Sent,
            media_id,
            filename,
        };

        let (conversation, inserted) = self
            .store
            .upsert_message(to, ContactHints::default(), message.clone())
            .await;
        if !inserted {
            // The driver already echoed this send back through the event
            // stream; the registry copy wins.
            debug!(target: "Bridge/Dispatch", "outbound {} already recorded", message.id);
            return;
        }

        self.hub.emit(Frame::new(
            "message-sent",
            MessageEnvelope {
                message: message.clone(),
                conversation: conversation.clone(),
            },
        ));
        self.hub.queue_message(message).await;
        self.hub.queue_conversation(conversation).await;
    }
}
