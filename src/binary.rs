use crate::adapter::{close_sink, next_frame, WsSink, WsSource};
use crate::error::{Error, Result};
use crate::payload::{MessageKind, Padding, Payload, ServerSentMessage};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::SinkExt;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

/// Hand-rolled framing in binary WebSocket frames.
///
/// Byte 0 is the message kind. Echo and broadcast-result frames follow with
/// eight bytes of big-endian nanoseconds since the epoch and then padding;
/// broadcast deliveries follow with a four-byte big-endian listener count and
/// then padding, with no send time at all.
pub struct BinaryAdapter {
    sink: Mutex<WsSink>,
    source: Mutex<WsSource>,
}

impl BinaryAdapter {
    pub fn new(sink: WsSink, source: WsSource) -> Self {
        BinaryAdapter {
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
        let frame = encode_client_frame(kind, payload);
        self.sink
            .lock()
            .await
            .send(Message::Binary(frame))
            .await?;
        Ok(())
    }

    pub async fn receive(&self) -> Result<ServerSentMessage> {
        let mut source = self.source.lock().await;
        let data = match next_frame(&mut source).await? {
            Message::Binary(data) => data,
            _ => return Err(Error::UnexpectedFrame("text", "binary")),
        };
        decode_server_frame(&data)
    }

    pub async fn close(&self) -> Result<()> {
        close_sink(&self.sink).await
    }
}

/// Client frames always carry the send time: `kind || nanos(8) || padding`.
pub fn encode_client_frame(kind: MessageKind, payload: &Payload) -> Vec<u8> {
    let padding: &[u8] = match &payload.padding {
        Padding::Bytes(bytes) => bytes,
        _ => &[],
    };
    let mut buf = BytesMut::with_capacity(9 + padding.len());
    buf.put_u8(kind.as_wire());
    buf.put_i64(payload.send_time_ns);
    buf.put_slice(padding);
    buf.to_vec()
}

pub fn decode_server_frame(data: &[u8]) -> Result<ServerSentMessage> {
    let (&kind_byte, rest) = data.split_first().ok_or(Error::TruncatedFrame(0))?;
    match MessageKind::from_wire(kind_byte)? {
        kind @ (MessageKind::Echo | MessageKind::BroadcastResult) => {
            if rest.len() < 8 {
                return Err(Error::TruncatedFrame(data.len()));
            }
            let mut nanos = [0u8; 8];
            nanos.copy_from_slice(&rest[..8]);
            let padding = if rest.len() > 8 {
                Padding::Bytes(Bytes::copy_from_slice(&rest[8..]))
            } else {
                Padding::None
            };
            Ok(ServerSentMessage {
                kind,
                payload: Some(Payload {
                    send_time_ns: i64::from_be_bytes(nanos),
                    padding,
                }),
                listener_count: 0,
            })
        }
        MessageKind::Broadcast => {
            if rest.len() < 4 {
                return Err(Error::TruncatedFrame(data.len()));
            }
            let mut count = [0u8; 4];
            count.copy_from_slice(&rest[..4]);
            Ok(ServerSentMessage {
                kind: MessageKind::Broadcast,
                payload: None,
                listener_count: u32::from_be_bytes(count) as usize,
            })
        }
    }
}
