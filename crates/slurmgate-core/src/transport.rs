//! Abstract message-framed transport halves for the duplex bridge.
//!
//! The WebSocket implementation lives in the server; tests use in-memory
//! channels. The halves are separate so each relay direction can own one.

use crate::error::GateResult;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by transport operations.
pub type FrameFuture<'a, T> = Pin<Box<dyn Future<Output = GateResult<T>> + Send + 'a>>;

/// Receiving half of a framed transport.
pub trait FrameSource: Send {
    /// Receive the next frame payload. `None` means the peer closed.
    fn recv_frame(&mut self) -> FrameFuture<'_, Option<Vec<u8>>>;
}

/// Sending half of a framed transport.
pub trait FrameSink: Send {
    /// Send one binary frame.
    fn send_frame<'a>(&'a mut self, data: &'a [u8]) -> FrameFuture<'a, ()>;

    /// Close the sending side.
    fn close(&mut self) -> FrameFuture<'_, ()>;
}
