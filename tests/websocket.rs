//! End-to-end tests over loopback websockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use ascii_stream_rs::capture::{LabelRenderer, ScriptedDevice};
use ascii_stream_rs::{ApiKey, BroadcastHub, HubConfig, ServerConfig, StreamServer};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const KEY: &str = "0123456789abcdefghijABCDEFGHIJxy";
const CONFIG: &str = r#"{"type":"config","camera_index":0,"resolution":"120x90","fps":20}"#;
const FRAME: &str = "frame 0 120x90";

struct TestServer {
    addr: SocketAddr,
    server: Arc<StreamServer>,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let hub = BroadcastHub::with_config(
            Box::new(ScriptedDevice::new([])),
            Box::new(LabelRenderer::default()),
            HubConfig::default().recordings_dir(dir.path()),
        );
        let config = ServerConfig::with_addr("127.0.0.1:0".parse().unwrap())
            .api_key(ApiKey::new(KEY));
        let server = Arc::new(StreamServer::with_hub(config, Arc::new(hub)));

        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let task = Arc::clone(&server);
        tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            task.serve(listener, shutdown).await
        });

        Self {
            addr,
            server,
            shutdown: Some(tx),
            _dir: dir,
        }
    }

    async fn connect(&self, path: &str) -> Client {
        let url = format!("ws://{}{}", self.addr, path);
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        wait_until(|| !self.server.hub().is_streaming()).await;
    }
}

async fn send(ws: &mut Client, text: &str) {
    ws.send(Message::text(text)).await.unwrap();
}

async fn next_text(ws: &mut Client) -> String {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = message {
            return text.to_string();
        }
    }
}

/// Next message that is not a live frame
async fn next_reply(ws: &mut Client) -> String {
    loop {
        let text = next_text(ws).await;
        if !text.starts_with("frame ") {
            return text;
        }
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn auth(role: &str) -> String {
    format!(r#"{{"type":"auth","api_key":"{}","role":"{}"}}"#, KEY, role)
}

#[tokio::test]
async fn test_controller_streams_to_viewer() {
    let server = TestServer::start().await;

    let mut controller = server.connect("/stream").await;
    send(&mut controller, &auth("controller")).await;
    assert_eq!(next_text(&mut controller).await, "AUTH_CONTROLLER_SUCCESS");

    let mut viewer = server.connect("/stream").await;
    send(&mut viewer, &auth("viewer")).await;
    assert_eq!(next_text(&mut viewer).await, "AUTH_VIEWER_SUCCESS");
    assert_eq!(next_text(&mut viewer).await, "STREAM_INACTIVE");

    send(&mut controller, CONFIG).await;
    assert_eq!(next_reply(&mut controller).await, "CONFIG_APPLIED");

    assert_eq!(next_text(&mut viewer).await, FRAME);
    assert_eq!(next_text(&mut viewer).await, FRAME);

    send(&mut controller, r#"{"type":"stop"}"#).await;
    assert_eq!(next_reply(&mut controller).await, "STREAM_STOPPED");
    assert!(!server.server.hub().is_streaming());

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let server = TestServer::start().await;

    let url = format!("ws://{}/admin", server.addr);
    match tokio_tungstenite::connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("upgrade should be refused"),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_bad_key_and_garbage() {
    let server = TestServer::start().await;
    let mut client = server.connect("/stream").await;

    send(&mut client, r#"{"type":"auth","api_key":"wrong","role":"controller"}"#).await;
    assert_eq!(next_text(&mut client).await, "AUTH_FAILED");

    send(&mut client, CONFIG).await;
    assert_eq!(next_text(&mut client).await, "UNKNOWN_COMMAND");

    send(&mut client, "definitely not json").await;
    assert_eq!(next_text(&mut client).await, "UNKNOWN_COMMAND");

    client.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    assert_eq!(next_text(&mut client).await, "UNKNOWN_COMMAND");

    assert!(!server.server.hub().is_streaming());
    server.stop().await;
}

#[tokio::test]
async fn test_controller_disconnect_stops_stream() {
    let server = TestServer::start().await;

    let mut controller = server.connect("/stream").await;
    send(&mut controller, &auth("controller")).await;
    assert_eq!(next_text(&mut controller).await, "AUTH_CONTROLLER_SUCCESS");
    send(&mut controller, CONFIG).await;
    assert_eq!(next_reply(&mut controller).await, "CONFIG_APPLIED");
    assert!(server.server.hub().is_streaming());

    drop(controller);

    let hub = Arc::clone(server.server.hub());
    wait_until(|| !hub.is_streaming() && !hub.has_controller()).await;

    // The slot is free again
    let mut next = server.connect("/stream").await;
    send(&mut next, &auth("controller")).await;
    assert_eq!(next_text(&mut next).await, "AUTH_CONTROLLER_SUCCESS");

    server.stop().await;
}

#[tokio::test]
async fn test_record_then_play_back() {
    let server = TestServer::start().await;

    let mut controller = server.connect("/stream").await;
    send(&mut controller, &auth("controller")).await;
    assert_eq!(next_text(&mut controller).await, "AUTH_CONTROLLER_SUCCESS");
    send(&mut controller, CONFIG).await;
    assert_eq!(next_reply(&mut controller).await, "CONFIG_APPLIED");

    send(&mut controller, r#"{"type":"record_start"}"#).await;
    assert_eq!(next_reply(&mut controller).await, "RECORDING_STARTED");
    for _ in 0..3 {
        assert_eq!(next_text(&mut controller).await, FRAME);
    }
    send(&mut controller, r#"{"type":"record_stop"}"#).await;
    assert_eq!(next_reply(&mut controller).await, "RECORDING_STOPPED");
    send(&mut controller, r#"{"type":"stop"}"#).await;
    assert_eq!(next_reply(&mut controller).await, "STREAM_STOPPED");

    let recordings = server.server.hub().recordings().unwrap();
    assert_eq!(recordings.len(), 1);
    assert!(recordings[0].frame_count >= 1);

    let mut viewer = server.connect("/playback").await;
    send(&mut viewer, &auth("viewer")).await;
    assert_eq!(next_text(&mut viewer).await, "AUTH_VIEWER_SUCCESS");
    assert_eq!(next_text(&mut viewer).await, "STREAM_INACTIVE");

    let start = format!(
        r#"{{"type":"playback_start","filename":"{}"}}"#,
        recordings[0].filename
    );
    send(&mut viewer, &start).await;

    // The ack and the first played frame may arrive in either order
    let mut seen = Vec::new();
    while !(seen.iter().any(|m| m == "PLAYBACK_STARTED") && seen.iter().any(|m| m == FRAME)) {
        assert!(seen.len() < 10, "{:?}", seen);
        seen.push(next_text(&mut viewer).await);
    }

    send(&mut viewer, r#"{"type":"playback_stop"}"#).await;
    assert_eq!(next_reply(&mut viewer).await, "PLAYBACK_STOPPED");

    server.stop().await;
}
