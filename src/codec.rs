use crate::config::Encoding;
use crate::error::Result;
use prost::Message as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// WebSocket frame kind produced by a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// Envelope of the channel-subscription framings. The serde field names are
/// the wire names for both the JSON and the MessagePack codec, so one struct
/// serves both encodings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CableMessage {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}

impl CableMessage {
    pub fn subscribe(channel: &str) -> Self {
        CableMessage {
            command: Some("subscribe".to_string()),
            identifier: Some(channel.to_string()),
            ..Default::default()
        }
    }

    pub fn message(channel: &str, data: String) -> Self {
        CableMessage {
            command: Some("message".to_string()),
            identifier: Some(channel.to_string()),
            data: Some(data),
            ..Default::default()
        }
    }
}

/// Protobuf form of the envelope, kept as generated-style definitions so the
/// wire schema stays explicit and in-tree.
pub mod pb {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CableFrame {
        #[prost(enumeration = "FrameType", tag = "1")]
        pub kind: i32,
        #[prost(enumeration = "FrameCommand", tag = "2")]
        pub command: i32,
        #[prost(string, tag = "3")]
        pub identifier: ::prost::alloc::string::String,
        #[prost(string, tag = "4")]
        pub data: ::prost::alloc::string::String,
        #[prost(bytes = "vec", tag = "5")]
        pub message: ::prost::alloc::vec::Vec<u8>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum FrameType {
        NoType = 0,
        Welcome = 1,
        Disconnect = 2,
        Ping = 3,
        ConfirmSubscription = 4,
        RejectSubscription = 5,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum FrameCommand {
        UnknownCommand = 0,
        Subscribe = 1,
        Unsubscribe = 2,
        Message = 3,
    }
}

impl pb::FrameType {
    fn as_wire(self) -> Option<&'static str> {
        match self {
            pb::FrameType::NoType => None,
            pb::FrameType::Welcome => Some("welcome"),
            pb::FrameType::Disconnect => Some("disconnect"),
            pb::FrameType::Ping => Some("ping"),
            pb::FrameType::ConfirmSubscription => Some("confirm_subscription"),
            pb::FrameType::RejectSubscription => Some("reject_subscription"),
        }
    }
}

impl pb::FrameCommand {
    fn from_wire(command: Option<&str>) -> Self {
        match command {
            Some("subscribe") => pb::FrameCommand::Subscribe,
            Some("unsubscribe") => pb::FrameCommand::Unsubscribe,
            Some("message") => pb::FrameCommand::Message,
            _ => pb::FrameCommand::UnknownCommand,
        }
    }
}

/// Serializes and deserializes `CableMessage` envelopes. JSON travels in text
/// frames; MessagePack and protobuf carry the same logical envelope in binary
/// frames. The protobuf envelope nests its server-sent payload as a
/// MessagePack blob, which is decoded in a second pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CableCodec {
    Json,
    MsgPack,
    Protobuf,
}

impl CableCodec {
    pub fn for_encoding(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Json => CableCodec::Json,
            Encoding::MsgPack => CableCodec::MsgPack,
            Encoding::Protobuf => CableCodec::Protobuf,
        }
    }

    pub fn marshal(&self, msg: &CableMessage) -> Result<(Vec<u8>, FrameKind)> {
        match self {
            CableCodec::Json => Ok((serde_json::to_vec(msg)?, FrameKind::Text)),
            CableCodec::MsgPack => {
                let mut buf = Vec::new();
                let mut serializer = rmp_serde::Serializer::new(&mut buf).with_struct_map();
                msg.serialize(&mut serializer)?;
                Ok((buf, FrameKind::Binary))
            }
            CableCodec::Protobuf => {
                let frame = pb::CableFrame {
                    kind: pb::FrameType::NoType as i32,
                    command: pb::FrameCommand::from_wire(msg.command.as_deref()) as i32,
                    identifier: msg.identifier.clone().unwrap_or_default(),
                    data: msg.data.clone().unwrap_or_default(),
                    message: Vec::new(),
                };
                Ok((frame.encode_to_vec(), FrameKind::Binary))
            }
        }
    }

    pub fn unmarshal(&self, data: &[u8]) -> Result<CableMessage> {
        match self {
            CableCodec::Json => Ok(serde_json::from_slice(data)?),
            CableCodec::MsgPack => Ok(rmp_serde::from_slice(data)?),
            CableCodec::Protobuf => {
                let frame = pb::CableFrame::decode(data)?;
                let kind = pb::FrameType::try_from(frame.kind)
                    .ok()
                    .and_then(pb::FrameType::as_wire)
                    .map(str::to_string);
                let message = if frame.message.is_empty() {
                    None
                } else {
                    // The embedded payload is itself a MessagePack blob.
                    Some(rmp_serde::from_slice(&frame.message)?)
                };
                Ok(CableMessage {
                    kind,
                    command: None,
                    identifier: (!frame.identifier.is_empty()).then_some(frame.identifier),
                    data: (!frame.data.is_empty()).then_some(frame.data),
                    message,
                })
            }
        }
    }
}
