use crate::error::Error;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch, as stamped into outgoing probes.
pub fn unix_nanos_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// The three kinds of application message a server can send back.
///
/// `Echo` answers a client echo, `BroadcastResult` acknowledges a broadcast to
/// its sender, and both carry the original send time and so produce an RTT
/// sample. `Broadcast` is a fan-out delivery of some other client's broadcast
/// and only bumps the receiver's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Echo,
    Broadcast,
    BroadcastResult,
}

impl MessageKind {
    pub fn from_wire(byte: u8) -> Result<Self, Error> {
        match byte {
            b'e' => Ok(MessageKind::Echo),
            b'b' => Ok(MessageKind::Broadcast),
            b'r' => Ok(MessageKind::BroadcastResult),
            other => Err(Error::UnknownMessageType(other as char)),
        }
    }

    pub fn as_wire(&self) -> u8 {
        match self {
            MessageKind::Echo => b'e',
            MessageKind::Broadcast => b'b',
            MessageKind::BroadcastResult => b'r',
        }
    }

    /// Maps the action names used by the channel-subscription framings.
    pub fn from_action(action: &str) -> Result<Self, Error> {
        match action {
            "echo" => Ok(MessageKind::Echo),
            "broadcast" => Ok(MessageKind::Broadcast),
            "broadcastResult" => Ok(MessageKind::BroadcastResult),
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }
}

/// Filler attached to a probe to model realistic message sizes. The content
/// has no semantic meaning; binary framings carry it as raw bytes, text
/// framings as an arbitrary JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum Padding {
    None,
    Bytes(Bytes),
    Json(Value),
}

impl Padding {
    pub fn as_json(&self) -> Option<Value> {
        match self {
            Padding::None => None,
            // The configured padding is ASCII digits, so this never loses data.
            Padding::Bytes(bytes) => Some(Value::String(
                String::from_utf8_lossy(bytes).into_owned(),
            )),
            Padding::Json(value) => Some(value.clone()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Padding::None)
    }
}

/// The probe body. `send_time_ns` is authoritative for RTT: it is stamped
/// immediately before serialization and must be echoed back untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub send_time_ns: i64,
    pub padding: Padding,
}

impl Payload {
    pub fn now(padding: Padding) -> Self {
        Payload {
            send_time_ns: unix_nanos_now(),
            padding,
        }
    }

    /// Wall-clock time elapsed since the embedded send time.
    pub fn elapsed(&self) -> Duration {
        let delta = unix_nanos_now() - self.send_time_ns;
        Duration::from_nanos(delta.max(0) as u64)
    }
}

#[derive(Debug, Clone)]
pub struct ServerSentMessage {
    pub kind: MessageKind,
    pub payload: Option<Payload>,
    pub listener_count: usize,
}

/// Wire form of a payload in the text framings. The send time travels as a
/// decimal string of nanoseconds so that no codec re-encodes it through a
/// float and loses precision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePayload {
    #[serde(rename = "sendTime")]
    pub send_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<Value>,
}

impl From<&Payload> for WirePayload {
    fn from(payload: &Payload) -> Self {
        WirePayload {
            send_time: payload.send_time_ns.to_string(),
            padding: payload.padding.as_json(),
        }
    }
}

impl TryFrom<WirePayload> for Payload {
    type Error = Error;

    fn try_from(wire: WirePayload) -> Result<Self, Error> {
        let send_time_ns = wire
            .send_time
            .parse::<i64>()
            .map_err(|_| Error::InvalidSendTime(wire.send_time.clone()))?;
        let padding = match wire.padding {
            Some(value) => Padding::Json(value),
            None => Padding::None,
        };
        Ok(Payload {
            send_time_ns,
            padding,
        })
    }
}

/// Extracts a payload from the decoded `{sendTime, padding?}` object of a
/// channel-subscription message.
pub fn payload_from_value(value: &Value) -> Result<Payload, Error> {
    let send_time = value
        .get("sendTime")
        .and_then(Value::as_str)
        .ok_or(Error::MissingPayload)?;
    let send_time_ns = send_time
        .parse::<i64>()
        .map_err(|_| Error::InvalidSendTime(send_time.to_string()))?;
    let padding = match value.get("padding") {
        Some(padding) => Padding::Json(padding.clone()),
        None => Padding::None,
    };
    Ok(Payload {
        send_time_ns,
        padding,
    })
}
