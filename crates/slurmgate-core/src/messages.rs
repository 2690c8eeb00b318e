//! JSON bodies exchanged between the server and its clients.

use serde::{Deserialize, Serialize};

/// Response to a successful session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// Body of every non-2xx API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// What kind of process backs a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Interactive login shell, lives for exactly one attach.
    LoginShell,
    /// Scheduler allocation command, outlives attaches.
    Allocation,
}

/// How a session's process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitState {
    Exited(i32),
    Signaled(i32),
    /// The status could not be collected.
    Unknown,
}

/// Listing entry for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub owner: String,
    pub kind: SessionKind,
    /// Creation time, unix seconds.
    pub created_at: u64,
    /// Whether the terminal has been closed.
    pub closed: bool,
    pub exit: Option<ExitState>,
}
