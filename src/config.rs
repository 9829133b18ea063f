use crate::error::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Deadline for a channel-subscription handshake to complete.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Upper bound for a single WebSocket frame or message.
pub const MAX_PAYLOAD_BYTES: usize = 1_000_000;

/// Selects the application protocol spoken over each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    Json,
    Binary,
    ActionCable,
    ActionCableConnect,
    Phoenix,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Json => "json",
            ServerType::Binary => "binary",
            ServerType::ActionCable => "actioncable",
            ServerType::ActionCableConnect => "actioncable-connect",
            ServerType::Phoenix => "phoenix",
        }
    }
}

impl FromStr for ServerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(ServerType::Json),
            "binary" => Ok(ServerType::Binary),
            "actioncable" => Ok(ServerType::ActionCable),
            "actioncable-connect" => Ok(ServerType::ActionCableConnect),
            "phoenix" => Ok(ServerType::Phoenix),
            other => Err(Error::UnknownServerType(other.to_string())),
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope encoding for the channel-subscription framings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    MsgPack,
    Protobuf,
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Encoding::Json),
            "msgpack" => Ok(Encoding::MsgPack),
            "protobuf" => Ok(Encoding::Protobuf),
            other => Err(Error::UnknownEncoding(other.to_string())),
        }
    }
}

/// The probe command a run drives. Fixed for the life of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Echo,
    Broadcast,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub websocket_url: String,
    pub websocket_origin: Option<String>,
    pub websocket_protocol: Option<String>,
    pub server_type: ServerType,
    pub encoding: Encoding,
    pub channel: String,
    pub client_cmd: ClientCommand,
    pub payload_padding_size: usize,
    /// Clients created before the first step. Zero means `step_size`.
    pub initial_clients: usize,
    pub step_size: usize,
    /// Target number of in-flight probes.
    pub concurrent: usize,
    /// Parallelism of client creation waves.
    pub concurrent_connect: usize,
    /// Outcomes (RTT samples plus drops) collected per step.
    pub sample_size: usize,
    pub limit_percentile: u8,
    pub limit_rtt: Duration,
    /// Zero means "run until the RTT ceiling is exceeded".
    pub total_steps: usize,
    pub interactive: bool,
    pub step_delay: Duration,
    pub command_delay: Duration,
    pub command_delay_chance: u8,
    /// Grace period before broadcast deliveries are counted at end of run.
    pub wait_broadcasts: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            websocket_url: String::new(),
            websocket_origin: None,
            websocket_protocol: None,
            server_type: ServerType::Json,
            encoding: Encoding::Json,
            channel: "BenchmarkChannel".to_string(),
            client_cmd: ClientCommand::Echo,
            payload_padding_size: 0,
            initial_clients: 0,
            step_size: 1000,
            concurrent: 50,
            concurrent_connect: 100,
            sample_size: 100,
            limit_percentile: 95,
            limit_rtt: Duration::from_millis(500),
            total_steps: 0,
            interactive: false,
            step_delay: Duration::ZERO,
            command_delay: Duration::ZERO,
            command_delay_chance: 0,
            wait_broadcasts: Duration::ZERO,
        }
    }
}

/// Everything a client needs to reach the server: endpoint, protocol
/// selection, and the prebuilt padding buffer. Shared read-only between the
/// controller and all clients.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: String,
    /// Server name for SNI and the Host header, without IPv6 brackets.
    pub host: String,
    /// `host:port` dialed over TCP.
    pub addr: String,
    pub secure: bool,
    pub origin: Option<String>,
    pub protocol: Option<String>,
    pub server_type: ServerType,
    pub encoding: Encoding,
    pub channel: String,
    pub padding: Bytes,
    pub handshake_timeout: Duration,
}

impl Target {
    pub fn new(config: &Config) -> Result<Self> {
        let url = Url::parse(&config.websocket_url)?;
        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => {
                return Err(Error::InvalidURL(format!(
                    "unsupported scheme {other} in {}",
                    config.websocket_url
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidURL(config.websocket_url.clone()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidURL(config.websocket_url.clone()))?;

        Ok(Target {
            url: config.websocket_url.clone(),
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            addr: format!("{host}:{port}"),
            secure,
            origin: config.websocket_origin.clone(),
            protocol: config.websocket_protocol.clone(),
            server_type: config.server_type,
            encoding: config.encoding,
            channel: config.channel.clone(),
            padding: build_padding(config.payload_padding_size),
            handshake_timeout: CONNECTION_TIMEOUT,
        })
    }
}

/// A byte buffer of the requested length filled with the repeating digit
/// string `1234567890`, built once and shared by every client.
pub fn build_padding(size: usize) -> Bytes {
    let mut padding = "1234567890".repeat(size / 10 + 1);
    padding.truncate(size);
    Bytes::from(padding)
}
