//! Interactive WebSocket session shared by `attach`, `alloc --attach` and
//! `shell`.
//!
//! Puts the local terminal in raw mode and pipes keystrokes to the remote
//! terminal and its output to stdout. Ctrl+] detaches. When stdin is not a
//! terminal, it is forwarded as-is until EOF.

use std::io::{IsTerminal, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::client::describe_failure;
use crate::terminal::{self as term, RawModeGuard};

/// How an interactive session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The user pressed Ctrl+]; the remote session keeps running.
    Detached,
    /// The server closed the connection.
    Closed,
}

enum Input {
    Bytes(Vec<u8>),
    Detach,
}

/// Connect to `url` and run the session until either side ends it.
pub async fn run(url: &str) -> Result<Outcome> {
    debug!(url = %redact(url), "connecting");
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(connect_error)?;
    info!("connected");

    let (mut sink, mut stream) = socket.split();
    let (tx_input, mut rx_input) = mpsc::channel::<Input>(64);

    let guard = if std::io::stdin().is_terminal() {
        let guard = RawModeGuard::enter()?;
        spawn_key_reader(tx_input);
        Some(guard)
    } else {
        tokio::spawn(forward_stdin(tx_input));
        None
    };

    let mut stdout = std::io::stdout();
    let mut server_error: Option<String> = None;
    let mut input_open = true;

    let outcome = loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    stdout.write_all(&data).context("failed to write to stdout")?;
                    stdout.flush().context("failed to flush stdout")?;
                }
                Some(Ok(Message::Text(text))) => {
                    eprint!("{text}\r\n");
                    server_error = Some(text.to_string());
                }
                Some(Ok(Message::Close(_))) | None => break Outcome::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "connection error");
                    break Outcome::Closed;
                }
            },
            input = rx_input.recv(), if input_open => match input {
                Some(Input::Bytes(bytes)) => {
                    if let Err(e) = sink.send(Message::Binary(bytes)).await {
                        warn!(error = %e, "send failed");
                        break Outcome::Closed;
                    }
                }
                Some(Input::Detach) => {
                    let _ = sink.close().await;
                    break Outcome::Detached;
                }
                None => input_open = false,
            },
        }
    };

    // Stop the key reader thread.
    drop(rx_input);
    drop(guard);

    if let (Outcome::Closed, Some(message)) = (outcome, server_error) {
        anyhow::bail!("{}", message.trim());
    }
    Ok(outcome)
}

/// Read crossterm key events on a plain thread so a pending read does not
/// hold up runtime shutdown.
fn spawn_key_reader(tx: mpsc::Sender<Input>) {
    std::thread::spawn(move || {
        while !tx.is_closed() {
            match event::poll(Duration::from_millis(100)) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    warn!("terminal event error: {e}");
                    break;
                }
            }
            match event::read() {
                Ok(Event::Key(key)) => {
                    if term::is_detach(&key) {
                        let _ = tx.blocking_send(Input::Detach);
                        break;
                    }
                    if let Some(bytes) = term::key_event_to_bytes(&key) {
                        if tx.blocking_send(Input::Bytes(bytes)).is_err() {
                            break;
                        }
                    }
                }
                Ok(Event::Paste(text)) => {
                    if tx.blocking_send(Input::Bytes(text.into_bytes())).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("terminal event error: {e}");
                    break;
                }
            }
        }
    });
}

async fn forward_stdin(tx: mpsc::Sender<Input>) {
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; 4096];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Input::Bytes(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        }
    }
}

fn connect_error(err: tungstenite::Error) -> anyhow::Error {
    match err {
        tungstenite::Error::Http(resp) => {
            let body = resp
                .body()
                .as_deref()
                .map(String::from_utf8_lossy)
                .unwrap_or_default();
            anyhow::anyhow!("{}", describe_failure(resp.status(), &body))
        }
        other => anyhow::Error::new(other).context("WebSocket connection failed"),
    }
}

/// Hide the token in logged URLs.
fn redact(url: &str) -> String {
    match url.split_once("token=") {
        Some((head, _)) => format!("{head}token=***"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_hides_token() {
        assert_eq!(
            redact("ws://h:1/api/v1/shell?token=secret.sig"),
            "ws://h:1/api/v1/shell?token=***"
        );
        assert_eq!(redact("ws://h:1/healthz"), "ws://h:1/healthz");
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = run(&format!("ws://{addr}/api/v1/shell?token=t"))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("WebSocket connection failed"));
    }
}
