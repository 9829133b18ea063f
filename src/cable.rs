use crate::adapter::{close_sink, into_ws_message, next_frame, WsSink, WsSource};
use crate::codec::{CableCodec, CableMessage};
use crate::config::Target;
use crate::error::{Error, Result};
use crate::payload::{
    payload_from_value, MessageKind, Padding, Payload, ServerSentMessage, WirePayload,
};
use futures_util::SinkExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Channel-subscription adapter: a broker multiplexes named channels over one
/// connection. The first send or receive performs the welcome/subscribe
/// handshake under a mutex, bounded by the connection deadline; afterwards
/// application messages travel wrapped in `message` command envelopes.
pub struct CableAdapter {
    sink: Mutex<WsSink>,
    source: Mutex<WsSource>,
    channel: String,
    codec: CableCodec,
    deadline: Duration,
    connected: Mutex<bool>,
}

impl CableAdapter {
    pub fn new(sink: WsSink, source: WsSource, target: &Target) -> Self {
        CableAdapter {
            sink: Mutex::new(sink),
            source: Mutex::new(source),
            channel: target.channel.clone(),
            codec: CableCodec::for_encoding(target.encoding),
            deadline: target.handshake_timeout,
            connected: Mutex::new(false),
        }
    }

    /// Performs the handshake once; later calls return immediately. The
    /// connected flag is only latched on success, so a failed handshake
    /// surfaces on every path that raced for it.
    async fn ensure_connected(&self) -> Result<()> {
        let mut connected = self.connected.lock().await;
        if *connected {
            return Ok(());
        }
        timeout(self.deadline, self.handshake())
            .await
            .map_err(|_| Error::ConnectionTimeout)??;
        *connected = true;
        Ok(())
    }

    async fn handshake(&self) -> Result<()> {
        let welcome = self.receive_envelope().await?;
        if welcome.kind.as_deref() != Some("welcome") {
            return Err(Error::UnexpectedWelcome(format!("{welcome:?}")));
        }
        self.send_envelope(&CableMessage::subscribe(&self.channel))
            .await
    }

    async fn send_envelope(&self, msg: &CableMessage) -> Result<()> {
        let (data, kind) = self.codec.marshal(msg)?;
        self.sink
            .lock()
            .await
            .send(into_ws_message(data, kind)?)
            .await?;
        Ok(())
    }

    /// Reads the next application envelope. Keepalive pings and subscription
    /// confirmations are bookkeeping and silently discarded; a rejected
    /// subscription is fatal.
    async fn receive_envelope(&self) -> Result<CableMessage> {
        let mut source = self.source.lock().await;
        loop {
            let data = match next_frame(&mut source).await? {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(data) => data,
                _ => continue,
            };
            let envelope = self.codec.unmarshal(&data)?;
            match envelope.kind.as_deref() {
                Some("ping") | Some("confirm_subscription") => continue,
                Some("reject_subscription") => return Err(Error::SubscriptionRejected),
                _ => return Ok(envelope),
            }
        }
    }

    pub async fn send_echo(&self, payload: &Payload) -> Result<()> {
        self.send_command("echo", payload).await
    }

    pub async fn send_broadcast(&self, payload: &Payload) -> Result<()> {
        self.send_command("broadcast", payload).await
    }

    async fn send_command(&self, action: &str, payload: &Payload) -> Result<()> {
        self.ensure_connected().await?;
        let data = serde_json::to_string(&json!({
            "action": action,
            "payload": WirePayload::from(payload),
        }))?;
        self.send_envelope(&CableMessage::message(&self.channel, data))
            .await
    }

    pub async fn receive(&self) -> Result<ServerSentMessage> {
        self.ensure_connected().await?;
        let envelope = self.receive_envelope().await?;
        let message = envelope.message.as_ref().ok_or(Error::MissingPayload)?;
        let action = message
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::UnknownAction(message.to_string()))?;
        let kind = MessageKind::from_action(action)?;
        let payload = message.get("payload").ok_or(Error::MissingPayload)?;
        Ok(ServerSentMessage {
            kind,
            payload: Some(payload_from_value(payload)?),
            listener_count: 0,
        })
    }

    pub async fn close(&self) -> Result<()> {
        close_sink(&self.sink).await
    }
}

#[derive(Debug, Default)]
struct ConnectState {
    connected: bool,
    emitted: bool,
}

/// Connect-only variant: the handshake itself is the thing being measured.
/// Sends are no-ops, and `receive` yields exactly one synthetic echo whose
/// send time is the instant the TCP dial was initiated, collapsing "time to
/// usable subscription" into a single RTT sample.
pub struct CableConnectAdapter {
    sink: Mutex<WsSink>,
    source: Mutex<WsSource>,
    channel: String,
    codec: CableCodec,
    deadline: Duration,
    init_time_ns: i64,
    state: Mutex<ConnectState>,
}

impl CableConnectAdapter {
    pub fn new(sink: WsSink, source: WsSource, target: &Target, init_time_ns: i64) -> Self {
        CableConnectAdapter {
            sink: Mutex::new(sink),
            source: Mutex::new(source),
            channel: target.channel.clone(),
            codec: CableCodec::for_encoding(target.encoding),
            deadline: target.handshake_timeout,
            init_time_ns,
            state: Mutex::new(ConnectState::default()),
        }
    }

    pub async fn send_echo(&self, _payload: &Payload) -> Result<()> {
        Ok(())
    }

    pub async fn send_broadcast(&self, _payload: &Payload) -> Result<()> {
        Ok(())
    }

    pub async fn receive(&self) -> Result<ServerSentMessage> {
        {
            let mut state = self.state.lock().await;
            if !state.connected {
                timeout(self.deadline, self.handshake())
                    .await
                    .map_err(|_| Error::ConnectionTimeout)??;
                state.connected = true;
            }
            if !state.emitted {
                state.emitted = true;
                return Ok(ServerSentMessage {
                    kind: MessageKind::Echo,
                    payload: Some(Payload {
                        send_time_ns: self.init_time_ns,
                        padding: Padding::None,
                    }),
                    listener_count: 0,
                });
            }
        }

        // Nothing further is measured; hold the connection open, discarding
        // whatever the server pushes, until the transport goes away.
        let mut source = self.source.lock().await;
        loop {
            next_frame(&mut source).await?;
        }
    }

    /// Unlike the steady-state adapter, the confirmation is awaited
    /// explicitly: the sample is only meaningful once the subscription is
    /// usable.
    async fn handshake(&self) -> Result<()> {
        let welcome = self.receive_envelope().await?;
        if welcome.kind.as_deref() != Some("welcome") {
            return Err(Error::UnexpectedWelcome(format!("{welcome:?}")));
        }

        let subscribe = CableMessage::subscribe(&self.channel);
        let (data, kind) = self.codec.marshal(&subscribe)?;
        self.sink
            .lock()
            .await
            .send(into_ws_message(data, kind)?)
            .await?;

        let confirm = self.receive_envelope().await?;
        if confirm.kind.as_deref() != Some("confirm_subscription") {
            return Err(Error::UnexpectedConfirmation(format!("{confirm:?}")));
        }
        Ok(())
    }

    async fn receive_envelope(&self) -> Result<CableMessage> {
        let mut source = self.source.lock().await;
        loop {
            let data = match next_frame(&mut source).await? {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(data) => data,
                _ => continue,
            };
            let envelope = self.codec.unmarshal(&data)?;
            match envelope.kind.as_deref() {
                Some("ping") => continue,
                Some("reject_subscription") => return Err(Error::SubscriptionRejected),
                _ => return Ok(envelope),
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        close_sink(&self.sink).await
    }
}
