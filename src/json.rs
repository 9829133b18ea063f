use crate::adapter::{close_sink, next_frame, WsSink, WsSource};
use crate::error::{Error, Result};
use crate::payload::{MessageKind, Payload, ServerSentMessage, WirePayload};
use futures_util::SinkExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

/// One JSON object per text frame. The `type` field is a single-character
/// string carrying the same kind bytes as the binary framing.
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<WirePayload>,
    #[serde(
        rename = "listenerCount",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    listener_count: Option<usize>,
}

pub struct JsonAdapter {
    sink: Mutex<WsSink>,
    source: Mutex<WsSource>,
}

impl JsonAdapter {
    pub fn new(sink: WsSink, source: WsSource) -> Self {
        JsonAdapter {
            sink: Mutex::new(sink),
            source: Mutex::new(source),
        }
    }

    pub async fn send_echo(&self, payload: &Payload) -> Result<()> {
        self.send(MessageKind::Echo, payload).await
    }

    pub async fn send_broadcast(&self, payload: &Payload) -> Result<()> {
        self.send(MessageKind::Broadcast, payload).await
    }

    async fn send(&self, kind: MessageKind, payload: &Payload) -> Result<()> {
        let wire = WireMessage {
            kind: (kind.as_wire() as char).to_string(),
            payload: Some(WirePayload::from(payload)),
            listener_count: None,
        };
        let text = serde_json::to_string(&wire)?;
        self.sink.lock().await.send(Message::Text(text)).await?;
        Ok(())
    }

    pub async fn receive(&self) -> Result<ServerSentMessage> {
        let mut source = self.source.lock().await;
        let text = match next_frame(&mut source).await? {
            Message::Text(text) => text,
            _ => return Err(Error::UnexpectedFrame("binary", "text")),
        };
        let wire: WireMessage = serde_json::from_str(&text)?;
        let kind = MessageKind::from_wire(wire.kind.as_bytes().first().copied().unwrap_or(0))?;
        let payload = wire.payload.map(Payload::try_from).transpose()?;
        Ok(ServerSentMessage {
            kind,
            payload,
            listener_count: wire.listener_count.unwrap_or(0),
        })
    }

    pub async fn close(&self) -> Result<()> {
        close_sink(&self.sink).await
    }
}
