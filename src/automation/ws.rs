use super::{AutomationClient, ContactDetails, MediaPayload, SendReceipt};
use crate::error::DriverError;
use crate::types::events::{AutomationEvent, InboundMessage};
use crate::types::message::AckLevel;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// One JSON frame on the driver wire. Responses carry an `id`, events an
/// `event` name; everything else is noise.
#[derive(Debug, Deserialize)]
struct DriverFrame {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug)]
struct DriverResponse {
    ok: bool,
    error: Option<String>,
    result: Value,
}

#[derive(Debug, Deserialize)]
struct AckPayload {
    id: String,
    ack: u8,
}

#[derive(Debug, Deserialize)]
struct PresencePayload {
    chat: String,
    #[serde(default)]
    typing: bool,
}

#[derive(Debug, Deserialize)]
struct MediaDownloadResult {
    data: String,
    #[serde(default)]
    mimetype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PictureResult {
    #[serde(default)]
    url: Option<String>,
}

/// WebSocket adapter to the session driver process.
///
/// The read loop translates the driver's raw callback frames into
/// [`AutomationEvent`]s; outbound calls are JSON requests correlated by a
/// generated request id through a pending-waiters map.
pub struct WsAutomationClient {
    outbound: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<String, oneshot::Sender<DriverResponse>>>,
    unique_id: String,
    id_counter: AtomicU64,
    request_timeout: Duration,
}

impl WsAutomationClient {
    /// Connects to the driver and starts the read/write loops. Failure here
    /// is fatal to startup: an engine without its event source is useless.
    pub async fn connect(
        url: &str,
        request_timeout: Duration,
    ) -> Result<(Arc<Self>, mpsc::Receiver<AutomationEvent>), DriverError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| DriverError::Protocol(format!("connect to {url} failed: {e}")))?;
        info!(target: "Bridge/Driver", "connected to session driver at {url}");

        let (sink, stream) = socket.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let mut raw = [0u8; 4];
        rand::rng().fill_bytes(&mut raw);
        let client = Arc::new(Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            unique_id: hex::encode(raw),
            id_counter: AtomicU64::new(0),
            request_timeout,
        });

        let (event_tx, event_rx) = mpsc::channel(256);
        tokio::spawn(write_loop(sink, outbound_rx));
        tokio::spawn(client.clone().read_loop(stream, event_tx));

        Ok((client, event_rx))
    }

    fn next_request_id(&self) -> String {
        let count = self.id_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.unique_id, count)
    }

    async fn read_loop(
        self: Arc<Self>,
        mut stream: impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
        event_tx: mpsc::Sender<AutomationEvent>,
    ) {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_frame(text.as_str(), &event_tx).await,
                Ok(Message::Close(_)) => {
                    info!(target: "Bridge/Driver", "driver closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(target: "Bridge/Driver", "driver socket error: {e}");
                    break;
                }
            }
        }
        // Dropping the waiters wakes every in-flight request with
        // ConnectionClosed.
        self.pending.lock().await.clear();
        let _ = event_tx
            .send(AutomationEvent::Disconnected(
                "driver connection lost".to_string(),
            ))
            .await;
    }

    /// One malformed frame must not stop processing of subsequent frames.
    async fn handle_frame(&self, text: &str, event_tx: &mpsc::Sender<AutomationEvent>) {
        let frame: DriverFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "Bridge/Driver", "discarding malformed driver frame: {e}");
                return;
            }
        };

        if let Some(id) = frame.id {
            let waiter = self.pending.lock().await.remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(DriverResponse {
                        ok: frame.ok.unwrap_or(false),
                        error: frame.error,
                        result: frame.result,
                    });
                }
                None => {
                    debug!(target: "Bridge/Driver", "response for unknown request id {id}")
                }
            }
            return;
        }

        let Some(event) = frame.event else {
            warn!(target: "Bridge/Driver", "driver frame carries neither id nor event");
            return;
        };
        if let Some(translated) = translate(&event, frame.data) {
            if event_tx.send(translated).await.is_err() {
                warn!(target: "Bridge/Driver", "engine event channel closed, dropping events");
            }
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, DriverError> {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let frame = json!({ "id": id, "method": method, "params": params });
        debug!(target: "Bridge/Driver", "-> {method} [{id}]");
        if self.outbound.send(Message::Text(frame.to_string().into())).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(DriverError::ConnectionClosed);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(DriverError::Timeout);
            }
            Ok(Err(_)) => return Err(DriverError::ConnectionClosed),
            Ok(Ok(response)) => response,
        };

        if response.ok {
            Ok(response.result)
        } else {
            Err(DriverError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "driver reported failure without detail".to_string()),
            ))
        }
    }

    fn parse_receipt(result: Value) -> Result<SendReceipt, DriverError> {
        serde_json::from_value(result)
            .map_err(|e| DriverError::Protocol(format!("bad send receipt: {e}")))
    }
}

async fn write_loop(
    mut sink: impl Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound_rx.recv().await {
        if let Err(e) = sink.send(message).await {
            warn!(target: "Bridge/Driver", "driver write failed: {e}");
            break;
        }
    }
}

/// The adapter proper: raw driver callbacks become the engine's internal
/// event shape. Unknown events are dropped with a log line.
fn translate(event: &str, data: Value) -> Option<AutomationEvent> {
    match event {
        "qr" => {
            let payload = data
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| data.to_string());
            Some(AutomationEvent::Qr(payload))
        }
        "ready" => Some(AutomationEvent::Ready),
        "authenticated" => Some(AutomationEvent::Authenticated),
        "auth-failure" => Some(AutomationEvent::AuthFailure(detail(data))),
        "disconnected" => Some(AutomationEvent::Disconnected(detail(data))),
        "message" => match serde_json::from_value::<InboundMessage>(data) {
            Ok(message) => Some(AutomationEvent::Message(message)),
            Err(e) => {
                warn!(target: "Bridge/Driver", "discarding malformed message event: {e}");
                None
            }
        },
        "message-ack" => match serde_json::from_value::<AckPayload>(data) {
            Ok(payload) => Some(AutomationEvent::MessageAck {
                id: payload.id,
                level: AckLevel::from(payload.ack),
            }),
            Err(e) => {
                warn!(target: "Bridge/Driver", "discarding malformed ack event: {e}");
                None
            }
        },
        "chat-presence" => match serde_json::from_value::<PresencePayload>(data) {
            Ok(payload) => Some(AutomationEvent::ChatPresence {
                chat: payload.chat,
                typing: payload.typing,
            }),
            Err(e) => {
                warn!(target: "Bridge/Driver", "discarding malformed presence event: {e}");
                None
            }
        },
        other => {
            debug!(target: "Bridge/Driver", "ignoring driver event '{other}'");
            None
        }
    }
}

fn detail(data: Value) -> String {
    data.as_str()
        .map(str::to_string)
        .or_else(|| {
            data.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default()
}

#[async_trait]
impl AutomationClient for WsAutomationClient {
    async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt, DriverError> {
        let result = self
            .request("send-text", json!({ "to": to, "body": body }))
            .await?;
        Self::parse_receipt(result)
    }

    async fn send_media(&self, to: &str, media: MediaPayload) -> Result<SendReceipt, DriverError> {
        let result = self
            .request(
                "send-media",
                json!({
                    "to": to,
                    "data": BASE64.encode(&media.data),
                    "mimetype": media.mimetype,
                    "filename": media.filename,
                    "caption": media.caption,
                    "asVoice": media.as_voice,
                }),
            )
            .await?;
        Self::parse_receipt(result)
    }

    async fn download_media(&self, message_id: &str) -> Result<(Bytes, String), DriverError> {
        let result = self
            .request("download-media", json!({ "messageId": message_id }))
            .await?;
        let download: MediaDownloadResult = serde_json::from_value(result)
            .map_err(|e| DriverError::Protocol(format!("bad media download: {e}")))?;
        let data = BASE64
            .decode(download.data.as_bytes())
            .map_err(|e| DriverError::Protocol(format!("bad media payload: {e}")))?;
        let mime = download
            .mimetype
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Ok((Bytes::from(data), mime))
    }

    async fn profile_picture(&self, contact: &str) -> Result<Option<String>, DriverError> {
        let result = self
            .request("profile-picture", json!({ "contact": contact }))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let picture: PictureResult = serde_json::from_value(result)
            .map_err(|e| DriverError::Protocol(format!("bad profile picture result: {e}")))?;
        Ok(picture.url)
    }

    async fn contact_info(&self, contact: &str) -> Result<ContactDetails, DriverError> {
        let result = self
            .request("contact-info", json!({ "contact": contact }))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| DriverError::Protocol(format!("bad contact info: {e}")))
    }

    async fn set_typing(&self, chat: &str, typing: bool) -> Result<(), DriverError> {
        self.request("set-typing", json!({ "chat": chat, "typing": typing }))
            .await?;
        Ok(())
    }
}
