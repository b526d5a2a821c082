//! Websocket server
//!
//! Accepts TCP connections, upgrades them on the stream and playback paths,
//! and runs one session per client against the shared broadcast hub.

pub mod api_key;
pub mod config;
pub mod connection;
pub mod listener;

pub use api_key::{ApiKey, API_KEY_ENV, API_KEY_LEN};
pub use config::{ServerConfig, DEFAULT_PORT, PLAYBACK_PATH, STREAM_PATH};
pub use connection::Connection;
pub use listener::StreamServer;
