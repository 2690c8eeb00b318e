//! Frame transport over an axum WebSocket.
//!
//! Binary and text frames are both delivered as raw payload bytes; every
//! outgoing frame is binary.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use slurmgate_core::{FrameFuture, FrameSink, FrameSource, GateError};
use tracing::debug;

/// Split an upgraded socket into relay halves.
pub fn split(socket: WebSocket) -> (WsSink, WsSource) {
    let (sink, stream) = socket.split();
    (WsSink { sink }, WsSource { stream })
}

/// Receiving half of a WebSocket.
pub struct WsSource {
    stream: SplitStream<WebSocket>,
}

impl FrameSource for WsSource {
    fn recv_frame(&mut self) -> FrameFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                    Some(Ok(Message::Text(text))) => {
                        return Ok(Some(text.as_str().as_bytes().to_vec()))
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    // Pings are answered by the socket itself.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Err(GateError::Transport(format!("WS recv failed: {e}")))
                    }
                }
            }
        })
    }
}

/// Sending half of a WebSocket.
pub struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

impl WsSink {
    /// Report an error to the client as a single text frame, then close.
    pub async fn send_error(&mut self, message: &str) {
        if let Err(e) = self.sink.send(Message::Text(message.to_string().into())).await {
            debug!(error = %e, "error frame send failed");
        }
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "connection close failed");
        }
    }
}

impl FrameSink for WsSink {
    fn send_frame<'a>(&'a mut self, data: &'a [u8]) -> FrameFuture<'a, ()> {
        Box::pin(async move {
            self.sink
                .send(Message::Binary(data.to_vec().into()))
                .await
                .map_err(|e| GateError::Transport(format!("WS send failed: {e}")))
        })
    }

    fn close(&mut self) -> FrameFuture<'_, ()> {
        Box::pin(async move {
            self.sink
                .close()
                .await
                .map_err(|e| GateError::Transport(format!("WS close failed: {e}")))
        })
    }
}
