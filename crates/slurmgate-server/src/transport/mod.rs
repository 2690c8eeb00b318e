//! Connection transports.

pub mod websocket;
