//! Client sessions
//!
//! Each upgraded connection gets a [`Session`]: an authentication state
//! machine plus an outbound queue with exactly one writer. A [`Dispatcher`]
//! applies the session's commands to the broadcast hub.

pub mod context;
pub mod dispatch;
pub mod outbound;
pub mod state;

pub use context::{BoxSink, Session};
pub use dispatch::Dispatcher;
pub use outbound::{Outbound, OutboundQueue, DEFAULT_QUEUE_CAPACITY};
pub use state::{Role, SessionPhase};
