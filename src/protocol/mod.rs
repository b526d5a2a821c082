//! Client protocol
//!
//! JSON command messages received from clients and the text replies sent
//! back to them.

pub mod message;

pub use message::{ClientMessage, Reply};
