use crate::bridge::Bridge;
use crate::broadcast::Frame;
use crate::dispatch::{
    CommandAck, ManualForwardCommand, SendMediaCommand, SendMessageCommand, SendVoiceCommand,
};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;

/// One command frame from an observer: an event name, its payload, and an
/// optional correlation id the reply is tagged with.
#[derive(Debug, Deserialize)]
struct CommandFrame {
    event: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    ack: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactQuery {
    phone_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingCommand {
    chat_id: String,
}

pub fn router(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/staging/{id}", get(staging_entry))
        .route("/ws", get(observer_upgrade))
        .with_state(bridge)
}

pub async fn serve(bridge: Arc<Bridge>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "Bridge/Server", "listening on {addr}");
    axum::serve(listener, router(bridge)).await?;
    Ok(())
}

async fn status(State(bridge): State<Arc<Bridge>>) -> impl IntoResponse {
    Json(bridge.status())
}

/// Raw bytes of a staged media entry, or 404 once it has been evicted.
async fn staging_entry(State(bridge): State<Arc<Bridge>>, Path(id): Path<String>) -> Response {
    match bridge.staging.get(&id) {
        Some((data, mime)) => {
            let content_type = header::HeaderValue::from_str(&mime)
                .unwrap_or_else(|_| header::HeaderValue::from_static("application/octet-stream"));
            ([(header::CONTENT_TYPE, content_type)], data).into_response()
        }
        None => (StatusCode::NOT_FOUND, "staging entry not found").into_response(),
    }
}

async fn observer_upgrade(State(bridge): State<Arc<Bridge>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_observer(bridge, socket))
}

/// One persistent observer connection: initial state on connect, engine
/// frames forwarded out, command frames dispatched in.
async fn handle_observer(bridge: Arc<Bridge>, socket: WebSocket) {
    let (observer_id, mut frames) = bridge.hub.register();
    let (mut sink, mut stream) = socket.split();

    // Snapshot taken at connection time; a later observer gets its own.
    let initial = bridge.initial_state().await;
    let payload = match serde_json::to_string(&initial) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(target: "Bridge/Server", "failed to serialize initial state: {e}");
            bridge.hub.unregister(observer_id);
            return;
        }
    };
    if sink.send(Message::Text(payload.into())).await.is_err() {
        bridge.hub.unregister(observer_id);
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let text = match serde_json::to_string(frame.as_ref()) {
                Ok(text) => text,
                Err(e) => {
                    warn!(target: "Bridge/Server", "failed to serialize frame: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                handle_command_frame(&bridge, observer_id, text.as_str()).await
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    bridge.hub.unregister(observer_id);
    writer.abort();
    debug!(target: "Bridge/Server", "observer {observer_id} disconnected");
}

fn parse<T: DeserializeOwned>(data: Value) -> Result<T, CommandAck> {
    serde_json::from_value(data).map_err(|e| CommandAck::err(format!("invalid payload: {e}")))
}

/// Dispatches one observer command. Malformed input earns the caller a
/// local error reply; it is never broadcast and never stops the loop.
async fn handle_command_frame(bridge: &Arc<Bridge>, observer_id: u64, text: &str) {
    let frame: CommandFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            bridge.hub.send_to(
                observer_id,
                Frame::new("command-error", json!({ "error": format!("malformed frame: {e}") })),
            );
            return;
        }
    };
    let event = frame.event.clone();

    let ack = match event.as_str() {
        "send-message" => match parse::<SendMessageCommand>(frame.data) {
            Ok(cmd) => bridge.send_message(cmd).await,
            Err(ack) => ack,
        },
        "send-voice" => match parse::<SendVoiceCommand>(frame.data) {
            Ok(cmd) => bridge.send_voice(cmd).await,
            Err(ack) => ack,
        },
        "send-media" => match parse::<SendMediaCommand>(frame.data) {
            Ok(cmd) => bridge.send_media(cmd).await,
            Err(ack) => ack,
        },
        "manual-forward" => match parse::<ManualForwardCommand>(frame.data) {
            Ok(cmd) => bridge.manual_forward(cmd).await,
            Err(ack) => ack,
        },
        "get-conversation" => match parse::<ContactQuery>(frame.data) {
            Ok(query) => {
                let history = bridge.conversation_messages(&query.phone_number).await;
                bridge.hub.send_to(observer_id, history);
                CommandAck::ok()
            }
            Err(ack) => ack,
        },
        "mark-as-read" => match parse::<ContactQuery>(frame.data) {
            Ok(query) => bridge.mark_as_read(&query.phone_number).await,
            Err(ack) => ack,
        },
        "get-contact-info" => match parse::<ContactQuery>(frame.data) {
            Ok(query) => {
                let info = bridge.contact_info_frame(&query.phone_number).await;
                bridge.hub.send_to(observer_id, info);
                CommandAck::ok()
            }
            Err(ack) => ack,
        },
        "typing" => match parse::<TypingCommand>(frame.data) {
            Ok(cmd) => bridge.set_typing(&cmd.chat_id, true).await,
            Err(ack) => ack,
        },
        "stop-typing" => match parse::<TypingCommand>(frame.data) {
            Ok(cmd) => bridge.set_typing(&cmd.chat_id, false).await,
            Err(ack) => ack,
        },
        other => CommandAck::err(format!("unknown command '{other}'")),
    };

    if let Some(ack_id) = frame.ack {
        bridge
            .hub
            .send_to(observer_id, Frame::ack_reply(ack_id, ack));
    } else if !ack.success {
        bridge.hub.send_to(
            observer_id,
            Frame::new("command-error", json!({ "event": event, "error": ack.error })),
        );
    }
}
