use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Transport Errors
    #[error("{source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    WebSocketError {
        #[from]
        source: tungstenite::Error,
    },

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("client task aborted: {0}")]
    TaskAborted(String),

    // Handshake Errors
    #[error("connection timeout exceeded")]
    ConnectionTimeout,

    #[error("subscription rejected")]
    SubscriptionRejected,

    #[error("expected welcome message, got {0}")]
    UnexpectedWelcome(String),

    #[error("expected subscription confirmation, got {0}")]
    UnexpectedConfirmation(String),

    #[error("channel join refused: {0}")]
    JoinRefused(String),

    // Protocol Errors
    #[error("received message without payload")]
    MissingPayload,

    #[error("received unknown message type: {0}")]
    UnknownMessageType(char),

    #[error("received unknown action: {0}")]
    UnknownAction(String),

    #[error("received {0} frame where {1} was expected")]
    UnexpectedFrame(&'static str, &'static str),

    #[error("truncated frame of {0} bytes")]
    TruncatedFrame(usize),

    // Codec Errors
    #[error("{source}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },

    #[error("{source}")]
    MsgPackEncodeError {
        #[from]
        source: rmp_serde::encode::Error,
    },

    #[error("{source}")]
    MsgPackDecodeError {
        #[from]
        source: rmp_serde::decode::Error,
    },

    #[error("{source}")]
    ProtobufDecodeError {
        #[from]
        source: prost::DecodeError,
    },

    #[error("cannot parse send time: {0}")]
    InvalidSendTime(String),

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Configuration Errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: url::ParseError,
    },

    #[error("invalid websocket URL: {0}")]
    InvalidURL(String),

    #[error("unknown server type: {0}")]
    UnknownServerType(String),

    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    #[error("{source}")]
    InvalidHeaderValue {
        #[from]
        source: tungstenite::http::header::InvalidHeaderValue,
    },

    #[error("{source}")]
    InvalidServerName {
        #[from]
        source: pki_types::InvalidDnsNameError,
    },
}
