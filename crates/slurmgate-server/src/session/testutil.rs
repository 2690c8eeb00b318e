//! Helpers shared by the session tests.

use super::launcher::Launched;
use super::process::ProcessHandle;
use super::pty::{self, Terminal};
use crate::identity::{current_identity, Identity, IdentityResolver};
use slurmgate_core::{FrameFuture, FrameSink, FrameSource, GateError, GateResult};
use std::time::Duration;
use tokio::sync::mpsc;

/// Read from `terminal` until the accumulated output contains `needle`.
pub async fn read_until(terminal: &Terminal, needle: &str) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    tokio::time::timeout(Duration::from_secs(10), async {
        while !String::from_utf8_lossy(&out).contains(needle) {
            let n = terminal.read(&mut buf).await.unwrap();
            assert!(
                n > 0,
                "terminal hit EOF before {needle:?}: {:?}",
                String::from_utf8_lossy(&out)
            );
            out.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .expect("timed out reading terminal");
    String::from_utf8_lossy(&out).into_owned()
}

/// A launched session backed by a long sleep on a hung-up terminal. Callers
/// kill the process when done.
pub fn idle_launched() -> Launched {
    let pair = pty::allocate(80, 24).unwrap();
    let child = tokio::process::Command::new("sleep")
        .arg("600")
        .spawn()
        .unwrap();
    Launched {
        terminal: pair.terminal,
        process: ProcessHandle::supervise(child),
    }
}

/// Receiving half backed by an in-memory channel.
pub struct ChannelSource(pub mpsc::Receiver<Vec<u8>>);

impl FrameSource for ChannelSource {
    fn recv_frame(&mut self) -> FrameFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move { Ok(self.0.recv().await) })
    }
}

/// Sending half backed by an in-memory channel. Closing drops the sender.
pub struct ChannelSink(pub Option<mpsc::Sender<Vec<u8>>>);

impl FrameSink for ChannelSink {
    fn send_frame<'a>(&'a mut self, data: &'a [u8]) -> FrameFuture<'a, ()> {
        Box::pin(async move {
            let tx = self
                .0
                .as_ref()
                .ok_or_else(|| GateError::Transport("sink closed".into()))?;
            tx.send(data.to_vec())
                .await
                .map_err(|_| GateError::Transport("peer gone".into()))
        })
    }

    fn close(&mut self) -> FrameFuture<'_, ()> {
        Box::pin(async move {
            self.0.take();
            Ok(())
        })
    }
}

/// A connected pair of in-memory transports: the client's sender and
/// receiver, and the server's source and sink.
pub fn channel_transport() -> (
    mpsc::Sender<Vec<u8>>,
    ChannelSource,
    ChannelSink,
    mpsc::Receiver<Vec<u8>>,
) {
    let (client_tx, server_rx) = mpsc::channel(64);
    let (server_tx, client_rx) = mpsc::channel(64);
    (
        client_tx,
        ChannelSource(server_rx),
        ChannelSink(Some(server_tx)),
        client_rx,
    )
}

/// Concatenate received frames until at least `len` bytes arrived.
pub async fn collect_frames(rx: &mut mpsc::Receiver<Vec<u8>>, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while out.len() < len {
            match rx.recv().await {
                Some(frame) => out.extend_from_slice(&frame),
                None => break,
            }
        }
    })
    .await
    .expect("timed out waiting for frames");
    out
}

/// Resolves every username to the current process's account, keeping the
/// requested name.
pub struct AnyUserResolver;

impl IdentityResolver for AnyUserResolver {
    fn resolve(&self, username: &str) -> GateResult<Identity> {
        Ok(Identity {
            username: username.to_string(),
            ..current_identity()?
        })
    }
}
