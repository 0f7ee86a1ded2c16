//! Roverlink Protocol
//!
//! Shared types for communication between the Roverlink signaling server
//! and its robot/driver clients. These types are serialized as JSON over
//! WebSocket. Wire tags keep the kebab-case socket event names
//! (`robot-alive`, `click-to-drive`, ...) and payload fields are camelCase
//! to match the browser-side consumers.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod server;
pub mod types;

pub use client::ClientMessage;
pub use server::ServerMessage;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
