//! Server configuration

use std::net::SocketAddr;

use super::api_key::ApiKey;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8080;

/// Path for live stream connections
pub const STREAM_PATH: &str = "/stream";

/// Path for playback connections
pub const PLAYBACK_PATH: &str = "/playback";

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Request paths accepted for the websocket upgrade
    pub ws_paths: Vec<String>,

    /// Fixed API key; a random one is generated when unset
    pub api_key: Option<ApiKey>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            tcp_nodelay: true,  // Frames are small and latency-sensitive
            ws_paths: vec![STREAM_PATH.to_string(), PLAYBACK_PATH.to_string()],
            api_key: None,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Accept upgrades on an additional path
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if !self.ws_paths.contains(&path) {
            self.ws_paths.push(path);
        }
        self
    }

    /// Use a fixed API key
    pub fn api_key(mut self, key: ApiKey) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Whether `path` may be upgraded
    pub fn accepts_path(&self, path: &str) -> bool {
        self.ws_paths.iter().any(|p| p == path)
    }
}
