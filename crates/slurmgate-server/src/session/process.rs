//! Child process supervision.
//!
//! Each launched child is owned by a supervisor task that reaps it and
//! publishes its exit state; handles talk to the supervisor over channels.

use slurmgate_core::ExitState;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Handle to a supervised child process. Clones share the same child.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    kill_tx: mpsc::Sender<()>,
    status: watch::Receiver<Option<ExitState>>,
}

impl ProcessHandle {
    /// Hand `child` to a supervisor task. Must be called inside a runtime.
    pub fn supervise(mut child: Child) -> Self {
        // `id()` is only `None` once the child has been reaped.
        let pid = child.id().unwrap_or(0);
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        let (status_tx, status) = watch::channel(None);

        tokio::spawn(async move {
            let result = loop {
                tokio::select! {
                    result = child.wait() => break result,
                    Some(()) = kill_rx.recv() => {
                        if let Err(e) = child.start_kill() {
                            debug!(pid, error = %e, "kill failed");
                        }
                    }
                }
            };
            let state = match result {
                Ok(status) => exit_state(status),
                Err(e) => {
                    warn!(pid, error = %e, "failed to collect exit status");
                    ExitState::Unknown
                }
            };
            status_tx.send_replace(Some(state));
        });

        Self {
            pid,
            kill_tx,
            status,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit state if the child has been reaped.
    pub fn try_status(&self) -> Option<ExitState> {
        *self.status.borrow()
    }

    /// Ask the supervisor to SIGKILL the child. No-op once it has exited.
    pub fn kill(&self) {
        // A full channel means a kill is already pending.
        let _ = self.kill_tx.try_send(());
    }

    /// Wait until the child has been reaped.
    pub async fn wait(&self) -> ExitState {
        let mut status = self.status.clone();
        let state = status
            .wait_for(|s| s.is_some())
            .await
            .map(|s| *s)
            .ok()
            .flatten();
        state.unwrap_or(ExitState::Unknown)
    }
}

fn exit_state(status: ExitStatus) -> ExitState {
    if let Some(code) = status.code() {
        ExitState::Exited(code)
    } else if let Some(signal) = status.signal() {
        ExitState::Signaled(signal)
    } else {
        ExitState::Unknown
    }
}
