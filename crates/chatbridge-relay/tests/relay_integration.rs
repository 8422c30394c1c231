#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Integration tests use unwrap for brevity

//! Integration tests for the relay hub over real sockets.
//!
//! Each test binds its own relay on an ephemeral port and talks to it with
//! plain WebSocket clients, the CLI session library or the producer client.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use chatbridge_cli::connection::ConnectionConfig;
use chatbridge_cli::headless;
use chatbridge_core::protocol::{PRODUCER_DISCONNECTED, PRODUCER_MISSING};
use chatbridge_producer::client::ProducerClient;
use chatbridge_producer::config::{ProducerSettings, ReconnectPolicy};
use chatbridge_producer::echo::EchoProducer;
use chatbridge_relay::registry::ConnectionRegistry;
use chatbridge_relay::router::MessageRouter;
use chatbridge_relay::server::RelayServer;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

struct TestRelay {
    addr: SocketAddr,
    router: MessageRouter,
    _shutdown: watch::Sender<bool>,
}

impl TestRelay {
    async fn start() -> Self {
        let router = MessageRouter::new(ConnectionRegistry::new());
        let server = RelayServer::bind("127.0.0.1:0", router.clone(), 16)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.serve(shutdown_rx));
        Self {
            addr,
            router,
            _shutdown: shutdown_tx,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn connect(&self) -> Ws {
        connect_async(self.url()).await.unwrap().0
    }

    async fn producer(&self) -> Ws {
        let mut ws = self.connect().await;
        send(&mut ws, json!({"type": "identify", "client": "extension"})).await;
        self.wait_until(|r| async move { r.producer_connected().await })
            .await;
        ws
    }

    /// Connect `n` consumers and wait until the hub has registered them.
    async fn consumers(&self, n: usize) -> Vec<Ws> {
        let before = self.router.registry().consumer_count().await;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let mut ws = self.connect().await;
            send(&mut ws, json!({"type": "identify", "client": "cli"})).await;
            out.push(ws);
        }
        self.wait_until(|r| async move { r.consumer_count().await == before + n })
            .await;
        out
    }

    async fn wait_until<F, Fut>(&self, check: F)
    where
        F: Fn(ConnectionRegistry) -> Fut,
        Fut: Future<Output = bool>,
    {
        let registry = self.router.registry().clone();
        tokio::time::timeout(WAIT, async {
            while !check(registry.clone()).await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}

async fn send(ws: &mut Ws, value: Value) {
    send_raw(ws, &value.to_string()).await;
}

async fn send_raw(ws: &mut Ws, text: &str) {
    ws.send(WsMessage::Text(text.to_string())).await.unwrap();
}

async fn recv_raw(ws: &mut Ws) -> String {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .unwrap();
        match msg {
            WsMessage::Text(text) => return text,
            WsMessage::Close(_) => panic!("connection closed"),
            _ => {}
        }
    }
}

async fn recv(ws: &mut Ws) -> Value {
    serde_json::from_str(&recv_raw(ws).await).unwrap()
}

async fn assert_silent(ws: &mut Ws) {
    if let Ok(Some(Ok(WsMessage::Text(text)))) = tokio::time::timeout(QUIET, ws.next()).await {
        panic!("expected no message, got {text}");
    }
}

fn error(text: &str) -> Value {
    json!({"type": "error", "text": text})
}

#[tokio::test]
async fn query_without_producer_errors_only_to_requester() {
    let relay = TestRelay::start().await;
    let mut consumers = relay.consumers(2).await;

    send(&mut consumers[0], json!({"type": "query", "text": "hi"})).await;

    assert_eq!(recv(&mut consumers[0]).await, error(PRODUCER_MISSING));
    assert_silent(&mut consumers[0]).await;
    assert_silent(&mut consumers[1]).await;
}

#[tokio::test]
async fn query_is_forwarded_verbatim_and_chunks_fan_out() {
    let relay = TestRelay::start().await;
    let mut producer = relay.producer().await;
    let mut consumers = relay.consumers(3).await;

    let query = r#"{"type":"query","text":"hi","extra":{"kept":true}}"#;
    send_raw(&mut consumers[0], query).await;
    assert_eq!(recv_raw(&mut producer).await, query);

    let frames = [
        json!({"type": "status", "text": "working"}),
        json!({"type": "chunk", "text": "He", "done": false}),
        json!({"type": "chunk", "text": "llo"}),
        json!({"type": "chunk", "text": "", "done": true}),
    ];
    for frame in &frames {
        send(&mut producer, frame.clone()).await;
    }

    for consumer in &mut consumers {
        assert_eq!(recv(consumer).await, frames[0]);
        let mut text = String::new();
        loop {
            let msg = recv(consumer).await;
            text.push_str(msg["text"].as_str().unwrap());
            if msg["done"] == json!(true) {
                break;
            }
        }
        assert_eq!(text, "Hello");
    }
}

#[tokio::test]
async fn notifications_are_relayed_byte_for_byte() {
    let relay = TestRelay::start().await;
    let mut producer = relay.producer().await;
    let mut consumers = relay.consumers(1).await;

    let frame = r#"{"done":false,"text":"x","type":"chunk","seq":7}"#;
    send_raw(&mut producer, frame).await;
    assert_eq!(recv_raw(&mut consumers[0]).await, frame);
}

#[tokio::test]
async fn second_producer_replaces_the_first() {
    let relay = TestRelay::start().await;
    let mut old = relay.producer().await;
    let mut consumers = relay.consumers(1).await;

    // The new producer's `ready` reaching the consumer proves it holds the slot.
    let mut new = relay.connect().await;
    send(&mut new, json!({"type": "identify", "client": "extension"})).await;
    send(&mut new, json!({"type": "ready", "text": "new"})).await;
    assert_eq!(
        recv(&mut consumers[0]).await,
        json!({"type": "ready", "text": "new"})
    );

    send(&mut old, json!({"type": "chunk", "text": "stale"})).await;
    send(&mut consumers[0], json!({"type": "query", "text": "q"})).await;
    assert_eq!(recv(&mut new).await["text"], "q");
    assert_silent(&mut old).await;

    send(&mut new, json!({"type": "chunk", "text": "fresh", "done": true})).await;
    assert_eq!(recv(&mut consumers[0]).await["text"], "fresh");
    assert_silent(&mut consumers[0]).await;

    // The replaced producer leaving is not a producer loss.
    old.close(None).await.unwrap();
    relay
        .wait_until(|r| async move { r.connection_count().await == 2 })
        .await;
    assert_silent(&mut consumers[0]).await;
    assert!(relay.router.registry().producer_connected().await);
}

#[tokio::test]
async fn producer_disconnect_notifies_every_consumer_once() {
    let relay = TestRelay::start().await;
    let mut producer = relay.producer().await;
    let mut consumers = relay.consumers(3).await;

    producer.close(None).await.unwrap();

    for consumer in &mut consumers {
        assert_eq!(recv(consumer).await, error(PRODUCER_DISCONNECTED));
    }
    for consumer in &mut consumers {
        assert_silent(consumer).await;
    }
    assert!(!relay.router.registry().producer_connected().await);
}

#[tokio::test]
async fn consumer_leaving_early_does_not_affect_others() {
    let relay = TestRelay::start().await;
    let mut producer = relay.producer().await;
    let mut consumers = relay.consumers(2).await;

    let leaver = consumers.remove(0);
    drop(leaver);
    relay
        .wait_until(|r| async move { r.consumer_count().await == 1 })
        .await;

    send(&mut producer, json!({"type": "chunk", "text": "still here", "done": true})).await;
    assert_eq!(recv(&mut consumers[0]).await["text"], "still here");
}

#[tokio::test]
async fn repeated_cli_identify_does_not_duplicate_delivery() {
    let relay = TestRelay::start().await;
    let mut producer = relay.producer().await;
    let mut consumers = relay.consumers(1).await;

    send(&mut consumers[0], json!({"type": "identify", "client": "cli"})).await;
    send(&mut consumers[0], json!({"type": "identify", "client": "extension"})).await;
    // A query after the repeats shows they were processed.
    send(&mut consumers[0], json!({"type": "query", "text": "q"})).await;
    assert_eq!(recv(&mut producer).await["text"], "q");

    send(&mut producer, json!({"type": "chunk", "text": "once", "done": true})).await;
    assert_eq!(recv(&mut consumers[0]).await["text"], "once");
    assert_silent(&mut consumers[0]).await;
    assert_eq!(relay.router.registry().consumer_count().await, 1);
}

#[tokio::test]
async fn malformed_frames_keep_the_connection_open() {
    let relay = TestRelay::start().await;
    let mut ws = relay.connect().await;

    send_raw(&mut ws, "not json").await;
    send_raw(&mut ws, "[1,2,3]").await;
    send(&mut ws, json!({"type": 42})).await;
    send(&mut ws, json!({"type": "query"})).await;
    send(&mut ws, json!({"type": "teleport", "text": "?"})).await;
    assert_silent(&mut ws).await;

    send(&mut ws, json!({"type": "identify", "client": "cli"})).await;
    send(&mut ws, json!({"type": "query", "text": "hi"})).await;
    assert_eq!(recv(&mut ws).await, error(PRODUCER_MISSING));
}

#[tokio::test]
async fn unrecognised_identify_is_a_no_op() {
    let relay = TestRelay::start().await;
    let mut ws = relay.connect().await;

    send(&mut ws, json!({"type": "identify", "client": "browser"})).await;
    send(&mut ws, json!({"type": "query", "text": "hi"})).await;
    assert_silent(&mut ws).await;

    let registry = relay.router.registry();
    assert_eq!(registry.consumer_count().await, 0);
    assert!(!registry.producer_connected().await);
    assert_eq!(registry.connection_count().await, 1);
}

#[tokio::test]
async fn binary_frames_are_accepted() {
    let relay = TestRelay::start().await;
    let mut ws = relay.connect().await;

    ws.send(WsMessage::Binary(
        br#"{"type":"identify","client":"cli"}"#.to_vec(),
    ))
    .await
    .unwrap();
    relay
        .wait_until(|r| async move { r.consumer_count().await == 1 })
        .await;
}

#[tokio::test]
async fn cli_session_reconstructs_scripted_answer() {
    let relay = TestRelay::start().await;
    let mut producer = relay.producer().await;

    let config = ConnectionConfig {
        url: relay.url(),
        connect_timeout: WAIT,
    };
    let cli = tokio::spawn(async move {
        let mut out = Vec::new();
        let mut diag = Vec::new();
        let result = headless::run(&config, "hi", &mut out, &mut diag).await;
        (result, String::from_utf8(out).unwrap())
    });

    assert_eq!(
        recv(&mut producer).await,
        json!({"type": "query", "text": "hi"})
    );
    for (text, done) in [("He", false), ("llo", false), ("", true)] {
        send(&mut producer, json!({"type": "chunk", "text": text, "done": done})).await;
    }

    let (result, out) = tokio::time::timeout(WAIT, cli).await.unwrap().unwrap();
    result.unwrap();
    assert_eq!(out, "Hello\n");
}

#[tokio::test]
async fn cli_session_fails_when_producer_drops() {
    let relay = TestRelay::start().await;
    let mut producer = relay.producer().await;

    let config = ConnectionConfig {
        url: relay.url(),
        connect_timeout: WAIT,
    };
    let cli = tokio::spawn(async move {
        let mut out = Vec::new();
        let mut diag = Vec::new();
        headless::run(&config, "hi", &mut out, &mut diag)
            .await
            .map_err(|e| e.to_string())
    });

    recv(&mut producer).await;
    producer.close(None).await.unwrap();

    let result = tokio::time::timeout(WAIT, cli).await.unwrap().unwrap();
    assert_eq!(result.unwrap_err(), PRODUCER_DISCONNECTED);
}

#[tokio::test]
async fn end_to_end_with_echo_producer() {
    let relay = TestRelay::start().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let producer = ProducerClient::new(
        ProducerSettings {
            url: relay.url(),
            connect_timeout: WAIT,
            reconnect: ReconnectPolicy::fixed(Duration::from_millis(50)),
            stall_timeout: Duration::from_secs(30),
        },
        EchoProducer::default(),
    );
    let producer_task = tokio::spawn(async move { producer.run(shutdown_rx).await });
    relay
        .wait_until(|r| async move { r.producer_connected().await })
        .await;

    let config = ConnectionConfig {
        url: relay.url(),
        connect_timeout: WAIT,
    };
    let mut out = Vec::new();
    let mut diag = Vec::new();
    tokio::time::timeout(
        WAIT,
        headless::run(&config, "hello from the cli", &mut out, &mut diag),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(String::from_utf8(out).unwrap(), "hello from the cli\n");
    assert_eq!(String::from_utf8(diag).unwrap(), "[Echoing query]\n");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, producer_task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn serve_stops_on_shutdown() {
    let router = MessageRouter::new(ConnectionRegistry::new());
    let server = RelayServer::bind("127.0.0.1:0", router, 4).await.unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(server.serve(shutdown_rx));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    let router = MessageRouter::new(ConnectionRegistry::new());
    let server = RelayServer::bind("127.0.0.1:0", router.clone(), 4)
        .await
        .unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(server.serve(shutdown_rx));

    let mut ws = connect_async(url).await.unwrap().0;
    send(&mut ws, json!({"type": "identify", "client": "cli"})).await;
    tokio::time::timeout(WAIT, async {
        while router.registry().consumer_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // serve only returns once every connection task has finished.
    assert_eq!(router.registry().connection_count().await, 0);
    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn bind_failure_names_the_address() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let router = MessageRouter::new(ConnectionRegistry::new());
    let err = RelayServer::bind(&addr, router, 4).await.err().unwrap();
    assert!(err.to_string().contains(&addr));
}
