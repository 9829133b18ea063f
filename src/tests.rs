use crate::bench::Benchmark;
use crate::binary::{decode_server_frame, encode_client_frame};
use crate::client::Client;
use crate::codec::{pb, CableCodec, CableMessage, FrameKind};
use crate::config::{build_padding, ClientCommand, Config, Encoding, ServerType, Target};
use crate::connect::ConnectBenchmark;
use crate::error::Error;
use crate::payload::{MessageKind, Padding, Payload, WirePayload};
use crate::pool::LocalClientPool;
use crate::recorder::{round_to_ms, JsonResultRecorder, ResultRecorder, TextResultRecorder};
use crate::stats::RttAggregate;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use prost::Message as _;
use rand::Rng;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

// ---------------------------------------------------------------------------
// Aggregation and rounding
// ---------------------------------------------------------------------------

#[test]
fn percentile_nearest_rank() {
    let mut agg = RttAggregate::new();
    // Insertion order must not matter.
    for value in [40, 10, 50, 30, 20] {
        agg.add(ms(value));
    }

    assert_eq!(agg.count(), 5);
    assert_eq!(agg.percentile(50), ms(30));
    assert_eq!(agg.percentile(95), ms(50));
    assert_eq!(agg.percentile(0), agg.min());
    assert_eq!(agg.percentile(100), agg.max());
    assert_eq!(agg.min(), ms(10));
    assert_eq!(agg.max(), ms(50));
}

#[test]
fn percentile_of_single_sample() {
    let mut agg = RttAggregate::new();
    agg.add(ms(7));
    assert_eq!(agg.percentile(1), ms(7));
    assert_eq!(agg.percentile(100), ms(7));
}

#[test]
fn empty_aggregate_answers_zero() {
    let mut agg = RttAggregate::new();
    assert_eq!(agg.count(), 0);
    assert_eq!(agg.min(), Duration::ZERO);
    assert_eq!(agg.percentile(95), Duration::ZERO);
}

#[test]
fn rounds_half_up_to_milliseconds() {
    assert_eq!(round_to_ms(Duration::from_micros(1499)), 1);
    assert_eq!(round_to_ms(Duration::from_micros(1500)), 2);
    assert_eq!(round_to_ms(Duration::ZERO), 0);
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn padding_repeats_digit_string() {
    assert_eq!(build_padding(0).len(), 0);
    assert_eq!(&build_padding(4)[..], b"1234");
    assert_eq!(&build_padding(25)[..], b"1234567890123456789012345");
}

#[test]
fn server_type_and_encoding_parse() {
    assert_eq!(
        "actioncable-connect".parse::<ServerType>().unwrap(),
        ServerType::ActionCableConnect
    );
    assert_eq!("msgpack".parse::<Encoding>().unwrap(), Encoding::MsgPack);
    assert!("carrier-pigeon".parse::<ServerType>().is_err());
    assert!("xml".parse::<Encoding>().is_err());
}

#[test]
fn message_kind_tables() {
    assert_eq!(MessageKind::from_wire(b'e').unwrap(), MessageKind::Echo);
    assert_eq!(MessageKind::from_wire(b'b').unwrap(), MessageKind::Broadcast);
    assert_eq!(
        MessageKind::from_wire(b'r').unwrap(),
        MessageKind::BroadcastResult
    );
    assert!(MessageKind::from_wire(b'x').is_err());

    assert_eq!(
        MessageKind::from_action("broadcastResult").unwrap(),
        MessageKind::BroadcastResult
    );
    assert!(MessageKind::from_action("subscribe").is_err());
}

// ---------------------------------------------------------------------------
// Codecs and framings
// ---------------------------------------------------------------------------

#[test]
fn send_time_survives_text_and_binary_framings() {
    let mut rng = rand::thread_rng();
    for _ in 0..64 {
        let nanos: i64 = rng.gen_range(0..i64::MAX);
        let payload = Payload {
            send_time_ns: nanos,
            padding: Padding::None,
        };

        let wire = WirePayload::from(&payload);
        assert_eq!(Payload::try_from(wire).unwrap().send_time_ns, nanos);

        let frame = encode_client_frame(MessageKind::Echo, &payload);
        let decoded = decode_server_frame(&frame).unwrap();
        assert_eq!(decoded.payload.unwrap().send_time_ns, nanos);
    }
}

#[test]
fn binary_padding_survives_byte_for_byte() {
    let mut rng = rand::thread_rng();
    let padding: Vec<u8> = (0..64).map(|_| rng.gen()).collect();
    let payload = Payload {
        send_time_ns: 1,
        padding: Padding::Bytes(Bytes::from(padding.clone())),
    };

    let frame = encode_client_frame(MessageKind::Broadcast, &payload);
    assert_eq!(frame[0], b'b');
    let decoded = decode_server_frame(&{
        let mut echoed = frame.clone();
        echoed[0] = b'r';
        echoed
    })
    .unwrap();

    match decoded.payload.unwrap().padding {
        Padding::Bytes(bytes) => assert_eq!(&bytes[..], &padding[..]),
        other => panic!("expected byte padding, got {other:?}"),
    }
}

#[test]
fn binary_broadcast_frame_carries_listener_count() {
    let mut frame = vec![b'b'];
    frame.extend_from_slice(&7u32.to_be_bytes());
    frame.extend_from_slice(b"padding");

    let decoded = decode_server_frame(&frame).unwrap();
    assert_eq!(decoded.kind, MessageKind::Broadcast);
    assert_eq!(decoded.listener_count, 7);
    assert!(decoded.payload.is_none());

    assert!(decode_server_frame(&[b'e', 0, 1]).is_err());
    assert!(decode_server_frame(&[]).is_err());
}

#[test]
fn json_padding_round_trips_structurally() {
    let value = json!({"a": [1, 2, {"b": "c"}], "d": null});
    let wire = WirePayload {
        send_time: "7".to_string(),
        padding: Some(value.clone()),
    };

    let text = serde_json::to_string(&wire).unwrap();
    let back: WirePayload = serde_json::from_str(&text).unwrap();
    assert_eq!(back.padding, Some(value));
    assert_eq!(back.send_time, "7");
}

#[test]
fn cable_envelopes_round_trip_json_and_msgpack() {
    let envelope = CableMessage {
        identifier: Some("BenchmarkChannel".to_string()),
        message: Some(json!({
            "action": "echo",
            "payload": {"sendTime": "1234567890123", "padding": "12345"},
        })),
        ..Default::default()
    };

    for codec in [CableCodec::Json, CableCodec::MsgPack] {
        let (data, _) = codec.marshal(&envelope).unwrap();
        let back = codec.unmarshal(&data).unwrap();
        assert_eq!(back, envelope);
    }

    let (_, kind) = CableCodec::Json.marshal(&envelope).unwrap();
    assert_eq!(kind, FrameKind::Text);
    let (_, kind) = CableCodec::MsgPack.marshal(&envelope).unwrap();
    assert_eq!(kind, FrameKind::Binary);
}

#[test]
fn protobuf_envelope_nests_msgpack_payload() {
    let subscribe = CableMessage::subscribe("BenchmarkChannel");
    let (data, kind) = CableCodec::Protobuf.marshal(&subscribe).unwrap();
    assert_eq!(kind, FrameKind::Binary);

    let frame = pb::CableFrame::decode(data.as_slice()).unwrap();
    assert_eq!(frame.command, pb::FrameCommand::Subscribe as i32);
    assert_eq!(frame.identifier, "BenchmarkChannel");

    let inner = rmp_serde::to_vec(&json!({"action": "echo", "payload": {"sendTime": "42"}})).unwrap();
    let server_frame = pb::CableFrame {
        kind: pb::FrameType::NoType as i32,
        command: pb::FrameCommand::UnknownCommand as i32,
        identifier: "BenchmarkChannel".to_string(),
        data: String::new(),
        message: inner,
    };

    let envelope = CableCodec::Protobuf
        .unmarshal(&server_frame.encode_to_vec())
        .unwrap();
    let message = envelope.message.unwrap();
    assert_eq!(message["action"], "echo");
    assert_eq!(message["payload"]["sendTime"], "42");
}

#[test]
fn protobuf_frame_types_map_to_wire_names() {
    let frame = pb::CableFrame {
        kind: pb::FrameType::ConfirmSubscription as i32,
        ..Default::default()
    };
    let envelope = CableCodec::Protobuf
        .unmarshal(&frame.encode_to_vec())
        .unwrap();
    assert_eq!(envelope.kind.as_deref(), Some("confirm_subscription"));
    assert!(envelope.message.is_none());
}

// ---------------------------------------------------------------------------
// Recorders
// ---------------------------------------------------------------------------

#[test]
fn text_recorder_streams_one_line_per_step() {
    let mut buf = Vec::new();
    {
        let mut recorder = TextResultRecorder::new(&mut buf);
        recorder
            .record(12, 95, ms(150), ms(3), ms(40), ms(200))
            .unwrap();
        recorder.flush().unwrap();
    }

    let line = String::from_utf8(buf).unwrap();
    assert!(line.starts_with('['));
    assert!(line.contains("clients:    12"));
    assert!(line.contains("95per-rtt: 150ms"));
    assert!(line.contains("min-rtt:   3ms"));
    assert!(line.contains("median-rtt:  40ms"));
    assert!(line.contains("max-rtt: 200ms"));
    assert!(line.ends_with('\n'));
}

#[test]
fn json_recorder_buffers_until_flush() {
    let mut buf = Vec::new();
    {
        let mut recorder = JsonResultRecorder::new(&mut buf);
        recorder
            .record(3, 95, ms(10), ms(1), ms(5), ms(20))
            .unwrap();
        recorder.message("a note");
        recorder.flush().unwrap();
    }

    let run: Value = serde_json::from_slice(&buf).unwrap();
    let steps = run["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["clients"], 3);
    assert_eq!(steps[0]["limit_per"], 95);
    assert_eq!(steps[0]["per-rtt"], 10);
    assert_eq!(steps[0]["min-rtt"], 1);
    assert_eq!(steps[0]["median-rtt"], 5);
    assert_eq!(steps[0]["max-rtt"], 20);
    assert!(steps[0]["time"].as_str().unwrap().contains('T'));
    assert_eq!(run["messages"], json!(["a note"]));
}

// ---------------------------------------------------------------------------
// Mock servers
// ---------------------------------------------------------------------------

/// Echoes every binary frame back; broadcast frames come back as results.
async fn spawn_binary_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let ws = accept_async(stream).await.unwrap();
                let (mut sink, mut source) = ws.split();
                while let Some(Ok(msg)) = source.next().await {
                    if let Message::Binary(mut data) = msg {
                        if data.first() == Some(&b'b') {
                            data[0] = b'r';
                        }
                        if sink.send(Message::Binary(data)).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });

    addr
}

/// JSON server with echo and full fan-out broadcast. Every broadcast is
/// acknowledged to the sender and delivered to all connected clients, the
/// sender included; `drop_every` > 0 silently swallows every n-th delivery.
async fn spawn_json_broadcast_server(drop_every: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let peers: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>> = Arc::new(Mutex::new(Vec::new()));
    let delivered = Arc::new(Mutex::new(0usize));

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let peers = Arc::clone(&peers);
            let delivered = Arc::clone(&delivered);
            tokio::spawn(async move {
                let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
                peers.lock().unwrap().push(tx.clone());

                let ws = accept_async(stream).await.unwrap();
                let (mut sink, mut source) = ws.split();
                let writer = tokio::spawn(async move {
                    while let Some(msg) = rx.recv().await {
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                });

                while let Some(Ok(Message::Text(text))) = source.next().await {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    let payload = frame["payload"].clone();
                    match frame["type"].as_str() {
                        Some("e") => {
                            let _ = tx.send(Message::Text(
                                json!({"type": "e", "payload": payload}).to_string(),
                            ));
                        }
                        Some("b") => {
                            let others = peers.lock().unwrap().clone();
                            let _ = tx.send(Message::Text(
                                json!({"type": "r", "payload": payload}).to_string(),
                            ));
                            let delivery = json!({
                                "type": "b",
                                "payload": payload,
                                "listenerCount": others.len(),
                            })
                            .to_string();
                            for peer in others {
                                let nth = {
                                    let mut count = delivered.lock().unwrap();
                                    *count += 1;
                                    *count
                                };
                                if drop_every > 0 && nth % drop_every == 0 {
                                    continue;
                                }
                                let _ = peer.send(Message::Text(delivery.clone()));
                            }
                        }
                        _ => {}
                    }
                }

                writer.abort();
            });
        }
    });

    addr
}

/// Phoenix-style server: answers `phx_join` with an ok reply and pushes echo
/// events back on the joined topic.
async fn spawn_phoenix_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let ws = accept_async(stream).await.unwrap();
                let (mut sink, mut source) = ws.split();
                while let Some(Ok(Message::Text(text))) = source.next().await {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    let reply = match frame["event"].as_str() {
                        Some("phx_join") => json!({
                            "topic": frame["topic"],
                            "event": "phx_reply",
                            "payload": {"status": "ok", "response": {}},
                            "ref": frame["ref"],
                        }),
                        Some("echo") => json!({
                            "topic": frame["topic"],
                            "event": "echo",
                            "payload": frame["payload"],
                        }),
                        _ => continue,
                    };
                    if sink.send(Message::Text(reply.to_string())).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CableServerMode {
    Normal,
    Reject,
    Silent,
}

async fn send_cable_envelope(
    sink: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
    codec: CableCodec,
    envelope: &CableMessage,
) {
    let (data, kind) = codec.marshal(envelope).unwrap();
    let msg = match kind {
        FrameKind::Text => Message::Text(String::from_utf8(data).unwrap()),
        FrameKind::Binary => Message::Binary(data),
    };
    let _ = sink.send(msg).await;
}

/// Channel-subscription server. Normal mode precedes the welcome with two
/// keepalive pings, confirms subscriptions, and answers echo and broadcast
/// commands to the sender only.
async fn spawn_cable_server(codec: CableCodec, mode: CableServerMode) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let ws = accept_async(stream).await.unwrap();
                let (mut sink, mut source) = ws.split();

                if mode == CableServerMode::Silent {
                    while source.next().await.is_some() {}
                    return;
                }

                for kind in ["ping", "ping", "welcome"] {
                    send_cable_envelope(
                        &mut sink,
                        codec,
                        &CableMessage {
                            kind: Some(kind.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                }

                while let Some(Ok(msg)) = source.next().await {
                    let data = match msg {
                        Message::Text(text) => text.into_bytes(),
                        Message::Binary(data) => data,
                        _ => continue,
                    };
                    let envelope = codec.unmarshal(&data).unwrap();
                    match envelope.command.as_deref() {
                        Some("subscribe") => {
                            let reply = if mode == CableServerMode::Reject {
                                "reject_subscription"
                            } else {
                                "confirm_subscription"
                            };
                            send_cable_envelope(
                                &mut sink,
                                codec,
                                &CableMessage {
                                    kind: Some(reply.to_string()),
                                    identifier: envelope.identifier.clone(),
                                    ..Default::default()
                                },
                            )
                            .await;
                        }
                        Some("message") => {
                            let inner: Value =
                                serde_json::from_str(envelope.data.as_deref().unwrap()).unwrap();
                            let reply_action = if inner["action"] == "broadcast" {
                                "broadcastResult"
                            } else {
                                "echo"
                            };
                            send_cable_envelope(
                                &mut sink,
                                codec,
                                &CableMessage {
                                    identifier: envelope.identifier.clone(),
                                    message: Some(json!({
                                        "action": reply_action,
                                        "payload": inner["payload"],
                                    })),
                                    ..Default::default()
                                },
                            )
                            .await;
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    addr
}

// ---------------------------------------------------------------------------
// Test recorder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StepCapture {
    clients: usize,
    min: Duration,
    median: Duration,
    max: Duration,
}

#[derive(Debug, Default)]
struct Capture {
    steps: Vec<StepCapture>,
    messages: Vec<String>,
    flushed: bool,
}

#[derive(Debug, Clone, Default)]
struct CaptureRecorder {
    inner: Arc<Mutex<Capture>>,
}

impl ResultRecorder for CaptureRecorder {
    fn record(
        &mut self,
        client_count: usize,
        _limit_percentile: u8,
        _rtt_percentile: Duration,
        rtt_min: Duration,
        rtt_median: Duration,
        rtt_max: Duration,
    ) -> crate::error::Result<()> {
        self.inner.lock().unwrap().steps.push(StepCapture {
            clients: client_count,
            min: rtt_min,
            median: rtt_median,
            max: rtt_max,
        });
        Ok(())
    }

    fn message(&mut self, msg: &str) {
        self.inner.lock().unwrap().messages.push(msg.to_string());
    }

    fn flush(&mut self) -> crate::error::Result<()> {
        self.inner.lock().unwrap().flushed = true;
        Ok(())
    }
}

fn target_for(addr: SocketAddr, server_type: ServerType, encoding: Encoding) -> Target {
    let config = Config {
        websocket_url: format!("ws://{addr}/"),
        server_type,
        encoding,
        ..Default::default()
    };
    Target::new(&config).unwrap()
}

fn single_pool() -> Vec<Arc<LocalClientPool>> {
    vec![Arc::new(LocalClientPool::new(None))]
}

// ---------------------------------------------------------------------------
// Client and adapter behavior over loopback connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cable_handshake_skips_pings_and_produces_rtt() {
    for encoding in [Encoding::Json, Encoding::MsgPack] {
        let codec = CableCodec::for_encoding(encoding);
        let addr = spawn_cable_server(codec, CableServerMode::Normal).await;
        let target = Arc::new(target_for(addr, ServerType::ActionCable, encoding));

        let (rtt_tx, mut rtt_rx) = mpsc::channel(1);
        let (err_tx, mut err_rx) = mpsc::channel(1);
        let client = Client::connect(target, None, rtt_tx, err_tx).await.unwrap();

        client.send_echo().await.unwrap();

        tokio::select! {
            rtt = rtt_rx.recv() => {
                let rtt = rtt.unwrap();
                assert!(rtt > Duration::ZERO && rtt < Duration::from_secs(1));
            }
            err = err_rx.recv() => panic!("unexpected client error: {:?}", err),
            _ = tokio::time::sleep(Duration::from_secs(5)) => panic!("no RTT produced"),
        }
    }
}

#[tokio::test]
async fn phoenix_join_then_echo_produces_rtt() {
    let addr = spawn_phoenix_server().await;
    let target = Arc::new(target_for(addr, ServerType::Phoenix, Encoding::Json));

    let (rtt_tx, mut rtt_rx) = mpsc::channel(1);
    let (err_tx, mut err_rx) = mpsc::channel(1);
    let client = Client::connect(target, None, rtt_tx, err_tx).await.unwrap();

    client.send_echo().await.unwrap();

    tokio::select! {
        rtt = rtt_rx.recv() => {
            let rtt = rtt.unwrap();
            assert!(rtt > Duration::ZERO && rtt < Duration::from_secs(1));
        }
        err = err_rx.recv() => panic!("unexpected client error: {:?}", err),
        _ = tokio::time::sleep(Duration::from_secs(5)) => panic!("no RTT produced"),
    }
}

#[tokio::test]
async fn rejected_subscription_surfaces_on_error_channel() {
    let addr = spawn_cable_server(CableCodec::Json, CableServerMode::Reject).await;
    let target = Arc::new(target_for(
        addr,
        ServerType::ActionCableConnect,
        Encoding::Json,
    ));

    let (rtt_tx, _rtt_rx) = mpsc::channel(1);
    let (err_tx, mut err_rx) = mpsc::channel(1);
    let _client = Client::connect(target, None, rtt_tx, err_tx).await.unwrap();

    let err = timeout(Duration::from_secs(5), err_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(err, Error::SubscriptionRejected), "got {err:?}");
}

#[tokio::test]
async fn handshake_times_out_without_welcome() {
    let addr = spawn_cable_server(CableCodec::Json, CableServerMode::Silent).await;
    let mut target = target_for(addr, ServerType::ActionCable, Encoding::Json);
    target.handshake_timeout = Duration::from_millis(200);

    let (rtt_tx, _rtt_rx) = mpsc::channel(1);
    let (err_tx, mut err_rx) = mpsc::channel(1);
    let _client = Client::connect(Arc::new(target), None, rtt_tx, err_tx)
        .await
        .unwrap();

    let err = timeout(Duration::from_secs(5), err_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(err, Error::ConnectionTimeout), "got {err:?}");
}

#[tokio::test]
async fn closing_the_pool_terminates_receive_loops() {
    let addr = spawn_binary_echo_server().await;
    let target = Arc::new(target_for(addr, ServerType::Binary, Encoding::Json));
    let pool = LocalClientPool::new(None);

    let (rtt_tx, _rtt_rx) = mpsc::channel(1);
    let (err_tx, mut err_rx) = mpsc::channel(1);
    pool.spawn_client(target, rtt_tx, err_tx).await.unwrap();

    pool.close().await.unwrap();

    let err = timeout(Duration::from_secs(5), err_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(
        matches!(err, Error::ConnectionClosed | Error::WebSocketError { .. }),
        "got {err:?}"
    );
}

// ---------------------------------------------------------------------------
// End-to-end benchmark runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn binary_echo_run_grows_clients_per_step() {
    let addr = spawn_binary_echo_server().await;
    let config = Config {
        websocket_url: format!("ws://{addr}/"),
        server_type: ServerType::Binary,
        client_cmd: ClientCommand::Echo,
        payload_padding_size: 64,
        step_size: 10,
        concurrent: 10,
        concurrent_connect: 10,
        sample_size: 50,
        total_steps: 3,
        ..Default::default()
    };
    let target = Arc::new(Target::new(&config).unwrap());
    let recorder = CaptureRecorder::default();
    let mut bench = Benchmark::new(config, target, single_pool(), Box::new(recorder.clone()));

    timeout(Duration::from_secs(30), bench.run())
        .await
        .unwrap()
        .unwrap();

    let capture = recorder.inner.lock().unwrap();
    let clients: Vec<usize> = capture.steps.iter().map(|s| s.clients).collect();
    assert_eq!(clients, vec![10, 20, 30]);
    for step in &capture.steps {
        assert!(step.min > Duration::ZERO);
        assert!(step.median >= step.min);
        assert!(step.max < Duration::from_secs(1));
    }
    assert!(capture.flushed);
}

#[tokio::test]
async fn broadcast_run_accounts_for_every_delivery() {
    let addr = spawn_json_broadcast_server(0).await;
    let config = Config {
        websocket_url: format!("ws://{addr}/"),
        server_type: ServerType::Json,
        client_cmd: ClientCommand::Broadcast,
        initial_clients: 5,
        step_size: 5,
        concurrent: 5,
        concurrent_connect: 5,
        sample_size: 20,
        total_steps: 1,
        wait_broadcasts: Duration::from_millis(300),
        ..Default::default()
    };
    let target = Arc::new(Target::new(&config).unwrap());
    let recorder = CaptureRecorder::default();
    let mut bench = Benchmark::new(config, target, single_pool(), Box::new(recorder.clone()));

    timeout(Duration::from_secs(30), bench.run())
        .await
        .unwrap()
        .unwrap();

    let capture = recorder.inner.lock().unwrap();
    assert_eq!(capture.steps.len(), 1);
    assert_eq!(capture.steps[0].clients, 5);
    // 5 clients x 20 probes, every delivery arrived: nothing to report.
    assert!(
        capture.messages.is_empty(),
        "unexpected messages: {:?}",
        capture.messages
    );
}

#[tokio::test]
async fn dropped_broadcasts_are_reported() {
    let addr = spawn_json_broadcast_server(7).await;
    let config = Config {
        websocket_url: format!("ws://{addr}/"),
        server_type: ServerType::Json,
        client_cmd: ClientCommand::Broadcast,
        initial_clients: 2,
        step_size: 2,
        concurrent: 2,
        concurrent_connect: 2,
        sample_size: 10,
        total_steps: 1,
        wait_broadcasts: Duration::from_millis(300),
        ..Default::default()
    };
    let target = Arc::new(Target::new(&config).unwrap());
    let recorder = CaptureRecorder::default();
    let mut bench = Benchmark::new(config, target, single_pool(), Box::new(recorder.clone()));

    timeout(Duration::from_secs(30), bench.run())
        .await
        .unwrap()
        .unwrap();

    let capture = recorder.inner.lock().unwrap();
    assert_eq!(capture.messages.len(), 1);
    assert!(
        capture.messages[0].starts_with("Missing received broadcasts"),
        "got: {}",
        capture.messages[0]
    );
}

#[tokio::test]
async fn rtt_ceiling_stops_after_first_exceeding_step() {
    let addr = spawn_binary_echo_server().await;
    let config = Config {
        websocket_url: format!("ws://{addr}/"),
        server_type: ServerType::Binary,
        client_cmd: ClientCommand::Echo,
        step_size: 5,
        concurrent: 5,
        concurrent_connect: 5,
        sample_size: 10,
        total_steps: 0,
        limit_percentile: 95,
        // Any real round trip exceeds a zero ceiling immediately.
        limit_rtt: Duration::ZERO,
        ..Default::default()
    };
    let target = Arc::new(Target::new(&config).unwrap());
    let recorder = CaptureRecorder::default();
    let mut bench = Benchmark::new(config, target, single_pool(), Box::new(recorder.clone()));

    timeout(Duration::from_secs(30), bench.run())
        .await
        .unwrap()
        .unwrap();

    let capture = recorder.inner.lock().unwrap();
    assert_eq!(capture.steps.len(), 1);
    assert_eq!(capture.steps[0].clients, 5);
}

#[tokio::test]
async fn connect_run_samples_each_client_once() {
    let addr = spawn_cable_server(CableCodec::Json, CableServerMode::Normal).await;
    let config = Config {
        websocket_url: format!("ws://{addr}/"),
        server_type: ServerType::ActionCableConnect,
        step_size: 10,
        concurrent: 5,
        total_steps: 1,
        ..Default::default()
    };
    let target = Arc::new(Target::new(&config).unwrap());
    let recorder = CaptureRecorder::default();
    let mut bench = ConnectBenchmark::new(config, target, single_pool(), Box::new(recorder.clone()));

    timeout(Duration::from_secs(30), bench.run())
        .await
        .unwrap()
        .unwrap();

    let capture = recorder.inner.lock().unwrap();
    assert_eq!(capture.steps.len(), 1);
    assert_eq!(capture.steps[0].clients, 10);
    // Each sample spans dial start to confirmed subscription.
    assert!(capture.steps[0].min > Duration::ZERO);
    assert!(capture.steps[0].max < Duration::from_secs(1));
    assert!(capture.flushed);
}
