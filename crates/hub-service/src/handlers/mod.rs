//! HTTP and WebSocket request handlers for the hub.

pub mod authorize;
pub mod ws;

pub use authorize::authorize_room;
pub use ws::ws_handler;
