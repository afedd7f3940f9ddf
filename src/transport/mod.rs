//! The `transport` module exposes the broker to other processes.
//!
//! It defines the JSON protocol spoken over WebSockets and the server that
//! maps each frame onto a `Broker` call.

pub mod message;
pub mod websocket;


pub use message::{ClientMessage, ServerMessage};
pub use websocket::{serve, start_websocket_server};
