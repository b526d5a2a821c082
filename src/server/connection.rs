//! Per-connection transport loop
//!
//! Upgrades the TCP stream to a websocket, then reads client messages and
//! hands them to the session's dispatcher until the peer goes away.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{future, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SERVER};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::api_key::ApiKey;
use super::config::ServerConfig;
use crate::error::{Error, Result};
use crate::protocol::Reply;
use crate::registry::BroadcastHub;
use crate::session::{Dispatcher, Session};

const SERVER_NAME: &str = "ascii-stream-rs";

/// One accepted client connection
pub struct Connection {
    session_id: u64,
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    hub: Arc<BroadcastHub>,
    api_key: Arc<ApiKey>,
}

impl Connection {
    /// Wrap an accepted socket
    pub fn new(
        session_id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        config: ServerConfig,
        hub: Arc<BroadcastHub>,
        api_key: Arc<ApiKey>,
    ) -> Self {
        Self {
            session_id,
            socket,
            peer_addr,
            config,
            hub,
            api_key,
        }
    }

    /// Serve the connection until it closes
    ///
    /// Handshake failures are returned as errors. Once upgraded, a socket
    /// error or close ends the session normally.
    pub async fn run(self) -> Result<()> {
        let mut endpoint = String::new();
        let config = &self.config;

        let callback = |request: &Request, mut response: Response| {
            let path = request.uri().path();
            if !config.accepts_path(path) {
                let mut refused = ErrorResponse::new(Some("Not Found".to_string()));
                *refused.status_mut() = StatusCode::NOT_FOUND;
                return Err(refused);
            }

            endpoint = path.to_string();
            response
                .headers_mut()
                .insert(SERVER, HeaderValue::from_static(SERVER_NAME));
            Ok(response)
        };

        let ws = match tokio_tungstenite::accept_hdr_async(self.socket, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(
                    session_id = self.session_id,
                    peer = %self.peer_addr,
                    error = %e,
                    "Upgrade refused"
                );
                return Err(e.into());
            }
        };

        tracing::info!(
            session_id = self.session_id,
            peer = %self.peer_addr,
            endpoint = %endpoint,
            "Session opened"
        );

        let (sink, stream) = ws.split();
        let sink = sink.with(|text: String| future::ready(Ok::<_, Error>(Message::text(text))));
        let session = Session::with_sink(
            self.session_id,
            sink,
            self.hub.config().viewer_queue_capacity,
        );

        let dispatcher = Dispatcher::new(Arc::clone(&session), self.hub, self.api_key);
        read_loop(&dispatcher, stream).await;

        // Deregistration runs on its own task so teardown never waits on the hub
        dispatcher.teardown();
        session.close_sink().await;

        let stats = session.stats();
        tracing::info!(
            session_id = self.session_id,
            frames_written = stats.frames_written,
            frames_dropped = stats.frames_dropped,
            "Session closed"
        );

        Ok(())
    }
}

async fn read_loop(
    dispatcher: &Dispatcher,
    mut stream: futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
) {
    let session_id = dispatcher.session().id();

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                dispatcher.handle_text(&text).await;
            }
            Ok(Message::Binary(_)) => {
                dispatcher
                    .session()
                    .send_reply(Reply::UnknownCommand.to_string());
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(session_id = session_id, error = %e, "Read failed");
                break;
            }
        }
    }
}
