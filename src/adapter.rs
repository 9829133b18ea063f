use crate::binary::BinaryAdapter;
use crate::cable::{CableAdapter, CableConnectAdapter};
use crate::codec::FrameKind;
use crate::config::{ServerType, Target};
use crate::error::{Error, Result};
use crate::json::JsonAdapter;
use crate::payload::{Payload, ServerSentMessage};
use crate::phoenix::PhoenixAdapter;
use crate::stream::BenchStream;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub type WsSink = SplitSink<WebSocketStream<BenchStream>, Message>;
pub type WsSource = SplitStream<WebSocketStream<BenchStream>>;

/// Translates between the generic probe contract and a specific on-wire
/// protocol. `send_echo` and `send_broadcast` are called by the controller,
/// `receive` only by the owning client's receive task; the variants guard
/// their sink and source halves accordingly.
pub enum ServerAdapter {
    Json(JsonAdapter),
    Binary(BinaryAdapter),
    ActionCable(CableAdapter),
    ActionCableConnect(CableConnectAdapter),
    Phoenix(PhoenixAdapter),
}

impl ServerAdapter {
    /// Splits the connection and wires it to the adapter selected by the
    /// target's server type. `init_time_ns` is the instant the TCP dial was
    /// initiated; only the connect-only adapter uses it.
    pub fn new(target: &Target, ws: WebSocketStream<BenchStream>, init_time_ns: i64) -> Self {
        let (sink, source) = ws.split();
        match target.server_type {
            ServerType::Json => ServerAdapter::Json(JsonAdapter::new(sink, source)),
            ServerType::Binary => ServerAdapter::Binary(BinaryAdapter::new(sink, source)),
            ServerType::ActionCable => {
                ServerAdapter::ActionCable(CableAdapter::new(sink, source, target))
            }
            ServerType::ActionCableConnect => ServerAdapter::ActionCableConnect(
                CableConnectAdapter::new(sink, source, target, init_time_ns),
            ),
            ServerType::Phoenix => {
                ServerAdapter::Phoenix(PhoenixAdapter::new(sink, source, target))
            }
        }
    }

    pub async fn send_echo(&self, payload: &Payload) -> Result<()> {
        match self {
            ServerAdapter::Json(a) => a.send_echo(payload).await,
            ServerAdapter::Binary(a) => a.send_echo(payload).await,
            ServerAdapter::ActionCable(a) => a.send_echo(payload).await,
            ServerAdapter::ActionCableConnect(a) => a.send_echo(payload).await,
            ServerAdapter::Phoenix(a) => a.send_echo(payload).await,
        }
    }

    pub async fn send_broadcast(&self, payload: &Payload) -> Result<()> {
        match self {
            ServerAdapter::Json(a) => a.send_broadcast(payload).await,
            ServerAdapter::Binary(a) => a.send_broadcast(payload).await,
            ServerAdapter::ActionCable(a) => a.send_broadcast(payload).await,
            ServerAdapter::ActionCableConnect(a) => a.send_broadcast(payload).await,
            ServerAdapter::Phoenix(a) => a.send_broadcast(payload).await,
        }
    }

    /// Blocks until the next application message arrives.
    pub async fn receive(&self) -> Result<ServerSentMessage> {
        match self {
            ServerAdapter::Json(a) => a.receive().await,
            ServerAdapter::Binary(a) => a.receive().await,
            ServerAdapter::ActionCable(a) => a.receive().await,
            ServerAdapter::ActionCableConnect(a) => a.receive().await,
            ServerAdapter::Phoenix(a) => a.receive().await,
        }
    }

    pub async fn close(&self) -> Result<()> {
        match self {
            ServerAdapter::Json(a) => a.close().await,
            ServerAdapter::Binary(a) => a.close().await,
            ServerAdapter::ActionCable(a) => a.close().await,
            ServerAdapter::ActionCableConnect(a) => a.close().await,
            ServerAdapter::Phoenix(a) => a.close().await,
        }
    }
}

/// Reads the next data frame, transparently skipping transport-level
/// keepalive frames. A closed stream surfaces as `ConnectionClosed`.
pub(crate) async fn next_frame(source: &mut WsSource) -> Result<Message> {
    loop {
        match source.next().await {
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) => return Err(Error::ConnectionClosed),
            Some(Ok(msg)) => return Ok(msg),
            Some(Err(err)) => return Err(err.into()),
            None => return Err(Error::ConnectionClosed),
        }
    }
}

/// Wraps codec output in the matching WebSocket frame.
pub(crate) fn into_ws_message(data: Vec<u8>, kind: FrameKind) -> Result<Message> {
    match kind {
        FrameKind::Text => Ok(Message::Text(String::from_utf8(data)?)),
        FrameKind::Binary => Ok(Message::Binary(data)),
    }
}

/// Initiates the closing handshake on the sink half.
pub(crate) async fn close_sink(sink: &tokio::sync::Mutex<WsSink>) -> Result<()> {
    sink.lock().await.close().await?;
    Ok(())
}
