use crate::adapter::ServerAdapter;
use crate::config::{Target, MAX_PAYLOAD_BYTES};
use crate::error::{Error, Result};
use crate::payload::{unix_nanos_now, MessageKind, Padding, Payload};
use crate::stream::{wrap_tls, BenchStream};
use bytes::Bytes;
use log::debug;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::client_async_with_config;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

/// One benchmark participant: a single connection with its adapter and an
/// exclusive receive task publishing into the shared RTT and error queues.
///
/// The controller is the only caller of the send methods; the receive task is
/// the only reader of the connection. Once the receive task reports an error
/// the client is dropped: it stays in the population but never produces
/// another sample on its own.
pub struct Client {
    adapter: ServerAdapter,
    padding: Bytes,
    rtt_tx: Sender<Duration>,
    err_tx: Sender<Error>,
    rx_broadcast_count: Mutex<usize>,
}

impl Client {
    pub async fn connect(
        target: Arc<Target>,
        local_addr: Option<SocketAddr>,
        rtt_tx: Sender<Duration>,
        err_tx: Sender<Error>,
    ) -> Result<Arc<Client>> {
        // The connect benchmark times everything from here up to a confirmed
        // subscription, so the stamp comes before the dial.
        let init_time_ns = unix_nanos_now();

        let tcp = dial(&target, local_addr).await?;
        let stream = if target.secure {
            wrap_tls(tcp, &target.host).await?
        } else {
            BenchStream::Plain(tcp)
        };

        let mut request = target.url.as_str().into_client_request()?;
        if let Some(origin) = &target.origin {
            request
                .headers_mut()
                .insert("Origin", origin.parse::<HeaderValue>()?);
        }
        if let Some(protocol) = &target.protocol {
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", protocol.parse::<HeaderValue>()?);
        }

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(MAX_PAYLOAD_BYTES);
        ws_config.max_frame_size = Some(MAX_PAYLOAD_BYTES);

        let (ws, _response) = client_async_with_config(request, stream, Some(ws_config)).await?;

        let client = Arc::new(Client {
            adapter: ServerAdapter::new(&target, ws, init_time_ns),
            padding: target.padding.clone(),
            rtt_tx,
            err_tx,
            rx_broadcast_count: Mutex::new(0),
        });

        let receiver = Arc::clone(&client);
        tokio::spawn(async move { receiver.receive_loop().await });

        Ok(client)
    }

    pub async fn send_echo(&self) -> Result<()> {
        self.adapter.send_echo(&Payload::now(self.padding())).await
    }

    pub async fn send_broadcast(&self) -> Result<()> {
        self.adapter
            .send_broadcast(&Payload::now(self.padding()))
            .await
    }

    /// Atomically reads and zeroes the broadcast delivery counter.
    pub fn reset_rx_broadcast_count(&self) -> usize {
        let mut count = self
            .rx_broadcast_count
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *count)
    }

    pub async fn close(&self) -> Result<()> {
        self.adapter.close().await
    }

    fn padding(&self) -> Padding {
        if self.padding.is_empty() {
            Padding::None
        } else {
            Padding::Bytes(self.padding.clone())
        }
    }

    async fn receive_loop(&self) {
        loop {
            let msg = match self.adapter.receive().await {
                Ok(msg) => msg,
                Err(err) => return self.report_error(err).await,
            };

            match msg.kind {
                MessageKind::Echo | MessageKind::BroadcastResult => {
                    let Some(payload) = msg.payload else {
                        return self.report_error(Error::MissingPayload).await;
                    };
                    if self.rtt_tx.send(payload.elapsed()).await.is_err() {
                        return;
                    }
                }
                MessageKind::Broadcast => {
                    let mut count = self
                        .rx_broadcast_count
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    *count += 1;
                }
            }
        }
    }

    async fn report_error(&self, err: Error) {
        debug!("client receive loop terminated: {err}");
        let _ = self.err_tx.send(err).await;
    }
}

/// Dials the target address, optionally binding the local side first so that
/// pools can spread connections over several source addresses.
async fn dial(target: &Target, local_addr: Option<SocketAddr>) -> Result<TcpStream> {
    let mut last_err: Option<Error> = None;

    for addr in lookup_host(target.addr.as_str()).await? {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        if let Some(local) = local_addr {
            if let Err(err) = socket.bind(local) {
                last_err = Some(err.into());
                continue;
            }
        }
        match socket.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| Error::InvalidURL(target.addr.clone())))
}
