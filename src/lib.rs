//! Live ASCII frame broadcasting server
//!
//! A single controller configures a capture device; every rendered frame is
//! fanned out as text to all authenticated viewers over websockets. The live
//! stream can be recorded to disk and recordings played back to one session
//! at a time with the original timing.
//!
//! # Example
//!
//! ```no_run
//! use ascii_stream_rs::capture::TestPatternDevice;
//! use ascii_stream_rs::{ServerConfig, StreamServer};
//!
//! # async fn run() -> ascii_stream_rs::Result<()> {
//! let server = StreamServer::new(ServerConfig::default(), Box::new(TestPatternDevice::new()));
//! println!("API key: {}", server.api_key());
//! server.run().await
//! # }
//! ```

pub mod capture;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use registry::{BroadcastHub, HubConfig, HubError};
pub use server::{ApiKey, ServerConfig, StreamServer};
pub use session::{Role, Session, SessionPhase};
