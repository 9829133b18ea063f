use crate::adapter::{close_sink, next_frame, WsSink, WsSource};
use crate::config::Target;
use crate::error::{Error, Result};
use crate::payload::{payload_from_value, MessageKind, Payload, ServerSentMessage, WirePayload};
use futures_util::SinkExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Phoenix-channels envelope: every frame is one JSON object addressing a
/// topic with an event name.
#[derive(Debug, Serialize, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    payload: Value,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    reference: Option<String>,
}

/// Channel-subscription adapter for Phoenix framing. The join handshake
/// stands in for welcome/subscribe: `phx_join` on the configured topic must
/// be answered by an ok `phx_reply` before any probe goes out. Later
/// `phx_reply` envelopes are bookkeeping and discarded, like pings in the
/// cable framing.
pub struct PhoenixAdapter {
    sink: Mutex<WsSink>,
    source: Mutex<WsSource>,
    topic: String,
    deadline: Duration,
    connected: Mutex<bool>,
}

impl PhoenixAdapter {
    pub fn new(sink: WsSink, source: WsSource, target: &Target) -> Self {
        PhoenixAdapter {
            sink: Mutex::new(sink),
            source: Mutex::new(source),
            topic: target.channel.clone(),
            deadline: target.handshake_timeout,
            connected: Mutex::new(false),
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        let mut connected = self.connected.lock().await;
        if *connected {
            return Ok(());
        }
        timeout(self.deadline, self.join())
            .await
            .map_err(|_| Error::ConnectionTimeout)??;
        *connected = true;
        Ok(())
    }

    async fn join(&self) -> Result<()> {
        self.send_envelope(&PhoenixMessage {
            topic: self.topic.clone(),
            event: "phx_join".to_string(),
            payload: json!({}),
            reference: Some("1".to_string()),
        })
        .await?;

        let reply = self.receive_envelope().await?;
        if reply.event != "phx_reply" {
            return Err(Error::JoinRefused(format!(
                "expected phx_reply, got {}",
                reply.event
            )));
        }
        let status = reply
            .payload
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("missing status");
        if status != "ok" {
            return Err(Error::JoinRefused(status.to_string()));
        }
        Ok(())
    }

    async fn send_envelope(&self, msg: &PhoenixMessage) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        self.sink.lock().await.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn receive_envelope(&self) -> Result<PhoenixMessage> {
        let mut source = self.source.lock().await;
        let text = match next_frame(&mut source).await? {
            Message::Text(text) => text,
            _ => return Err(Error::UnexpectedFrame("binary", "text")),
        };
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn send_echo(&self, payload: &Payload) -> Result<()> {
        self.send_event("echo", payload).await
    }

    pub async fn send_broadcast(&self, payload: &Payload) -> Result<()> {
        self.send_event("broadcast", payload).await
    }

    async fn send_event(&self, event: &str, payload: &Payload) -> Result<()> {
        self.ensure_connected().await?;
        self.send_envelope(&PhoenixMessage {
            topic: self.topic.clone(),
            event: event.to_string(),
            payload: serde_json::to_value(WirePayload::from(payload))?,
            reference: None,
        })
        .await
    }

    pub async fn receive(&self) -> Result<ServerSentMessage> {
        self.ensure_connected().await?;
        loop {
            let envelope = self.receive_envelope().await?;
            if envelope.event == "phx_reply" {
                continue;
            }
            let kind = MessageKind::from_action(&envelope.event)?;
            return Ok(ServerSentMessage {
                kind,
                payload: Some(payload_from_value(&envelope.payload)?),
                listener_count: 0,
            });
        }
    }

    pub async fn close(&self) -> Result<()> {
        close_sink(&self.sink).await
    }
}
