//! Duplex relay between a framed connection and a session terminal.
//!
//! Two tasks per attach: inbound copies frames into the terminal, outbound
//! reads the terminal and sends each read as one binary frame. Neither
//! aborts the other; the survivor stops at its next I/O on the closed side.

use super::pty::Terminal;
use slurmgate_core::{FrameSink, FrameSource};
use std::sync::Arc;
use tracing::{debug, warn};

/// One direction of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Connection to terminal.
    Inbound,
    /// Terminal to connection.
    Outbound,
}

/// Bytes moved by a finished relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub inbound_bytes: u64,
    pub outbound_bytes: u64,
    /// The direction that stopped first.
    pub first_end: Direction,
}

/// Relay between `source`/`sink` and `terminal` until both directions stop.
///
/// `on_first_end` runs exactly once, as soon as either direction stops.
pub async fn relay<S, K, F>(
    terminal: Arc<Terminal>,
    mut source: S,
    mut sink: K,
    buffer_size: usize,
    on_first_end: F,
) -> RelayStats
where
    S: FrameSource + 'static,
    K: FrameSink + 'static,
    F: FnOnce(Direction) + Send,
{
    let input = terminal.clone();
    let mut inbound = tokio::spawn(async move {
        let mut bytes = 0u64;
        loop {
            let frame = match source.recv_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("connection closed by peer");
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "connection receive failed");
                    break;
                }
            };
            if let Err(e) = input.write_all(&frame).await {
                debug!(error = %e, "terminal write failed");
                break;
            }
            bytes += frame.len() as u64;
        }
        bytes
    });

    let mut outbound = tokio::spawn(async move {
        let mut buf = vec![0u8; buffer_size.max(1)];
        let mut bytes = 0u64;
        loop {
            let n = match terminal.read(&mut buf).await {
                Ok(0) => {
                    debug!("terminal reached end of output");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "terminal read failed");
                    break;
                }
            };
            if let Err(e) = sink.send_frame(&buf[..n]).await {
                debug!(error = %e, "connection send failed");
                break;
            }
            bytes += n as u64;
        }
        if let Err(e) = sink.close().await {
            debug!(error = %e, "connection close failed");
        }
        bytes
    });

    let (first_end, first_bytes) = tokio::select! {
        result = &mut inbound => (Direction::Inbound, join_bytes(result)),
        result = &mut outbound => (Direction::Outbound, join_bytes(result)),
    };
    on_first_end(first_end);

    let stats = match first_end {
        Direction::Inbound => RelayStats {
            inbound_bytes: first_bytes,
            outbound_bytes: join_bytes(outbound.await),
            first_end,
        },
        Direction::Outbound => RelayStats {
            inbound_bytes: join_bytes(inbound.await),
            outbound_bytes: first_bytes,
            first_end,
        },
    };
    debug!(
        inbound = stats.inbound_bytes,
        outbound = stats.outbound_bytes,
        first_end = ?stats.first_end,
        "relay finished"
    );
    stats
}

fn join_bytes(result: Result<u64, tokio::task::JoinError>) -> u64 {
    result.unwrap_or_else(|e| {
        warn!(error = %e, "relay task failed");
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaunchConfig;
    use crate::identity::current_identity;
    use crate::session::launcher::Launcher;
    use crate::session::testutil::{channel_transport, collect_frames};
    use slurmgate_core::AllocRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cat_launcher() -> Launcher {
        Launcher::new(LaunchConfig {
            alloc_command: vec!["/bin/cat".into()],
            ..LaunchConfig::default()
        })
    }

    #[tokio::test]
    async fn relays_bytes_faithfully_across_fragmentation() {
        let launched = cat_launcher()
            .allocation(&current_identity().unwrap(), &AllocRequest::default())
            .unwrap();
        let terminal = Arc::new(launched.terminal);
        let (client_tx, source, sink, mut client_rx) = channel_transport();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let relay_task = tokio::spawn(relay(terminal.clone(), source, sink, 4096, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        client_tx.send(b"he".to_vec()).await.unwrap();
        client_tx.send(b"llo\n".to_vec()).await.unwrap();

        // Line discipline echo followed by cat's copy, both with ONLCR.
        let expected = b"hello\r\nhello\r\n";
        let received = collect_frames(&mut client_rx, expected.len()).await;
        assert_eq!(received, expected);

        launched.process.kill();
        launched.process.wait().await;
        drop(client_tx);

        let stats = tokio::time::timeout(Duration::from_secs(5), relay_task)
            .await
            .expect("relay did not finish")
            .unwrap();
        assert_eq!(stats.inbound_bytes, 5);
        assert_eq!(stats.outbound_bytes, expected.len() as u64);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn terminal_end_closes_connection() {
        let launched = cat_launcher()
            .allocation(&current_identity().unwrap(), &AllocRequest::default())
            .unwrap();
        let terminal = Arc::new(launched.terminal);
        let (client_tx, source, sink, mut client_rx) = channel_transport();

        let relay_task = tokio::spawn(relay(terminal.clone(), source, sink, 4096, |_| {}));
        terminal.close();

        // Sink closed by the outbound task.
        let end = tokio::time::timeout(Duration::from_secs(5), client_rx.recv())
            .await
            .unwrap();
        assert!(end.is_none());

        drop(client_tx);
        let stats = tokio::time::timeout(Duration::from_secs(5), relay_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.first_end, Direction::Outbound);
        launched.process.kill();
    }

    #[tokio::test]
    async fn first_end_hook_sees_inbound_close() {
        let launched = cat_launcher()
            .allocation(&current_identity().unwrap(), &AllocRequest::default())
            .unwrap();
        let terminal = Arc::new(launched.terminal);
        let (client_tx, source, sink, _client_rx) = channel_transport();
        drop(client_tx);

        let hook_terminal = terminal.clone();
        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            relay(terminal, source, sink, 4096, move |direction| {
                assert_eq!(direction, Direction::Inbound);
                hook_terminal.close();
            }),
        )
        .await
        .expect("relay did not finish");
        assert_eq!(stats.first_end, Direction::Inbound);
        assert_eq!(stats.inbound_bytes, 0);
        launched.process.kill();
    }
}
