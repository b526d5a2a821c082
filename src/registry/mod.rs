//! Broadcast hub and viewer registry
//!
//! The hub owns the one live stream and fans each rendered frame out to the
//! registered sessions.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<BroadcastHub>
//!                  ┌───────────────────────────┐
//!                  │ viewers: ViewerSet {      │
//!                  │   id -> Weak<Session>,    │
//!                  │   controller slot         │
//!                  │ }                         │
//!                  └─────────────┬─────────────┘
//!                                │
//!         ┌──────────────────────┼──────────────────────┐
//!         │                      │                      │
//!         ▼                      ▼                      ▼
//!   [capture loop]           [Session]              [Session]
//!   render frame             send_frame()           send_frame()
//!         │                      │                      │
//!         └──► viewers.broadcast() ──► queue ──► writer ──► socket
//! ```
//!
//! # Zero-Copy Design
//!
//! A [`TextFrame`] wraps `bytes::Bytes`, so every viewer queue holding the
//! same frame shares one allocation.

pub mod config;
pub mod error;
pub mod frame;
pub mod hub;
pub mod viewers;

pub use config::{HubConfig, DEFAULT_RECORDINGS_DIR};
pub use error::HubError;
pub use frame::{Resolution, TextFrame};
pub use hub::{BroadcastHub, CapturePipeline, StreamSettings};
pub use viewers::ViewerSet;
