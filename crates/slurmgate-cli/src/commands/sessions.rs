//! `slurmgate sessions` / `attach` / `close`: session management.

use anyhow::Result;
use slurmgate_core::{ExitState, SessionKind, SessionSummary};
use tracing::info;

use super::interactive;
use crate::client::ApiClient;
use crate::config::Endpoint;

/// List the caller's sessions.
pub async fn list(endpoint: &Endpoint) -> Result<()> {
    let sessions = ApiClient::new(endpoint.clone())?.list().await?;
    if sessions.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    println!("{:<34} {:<12} {:<14} CREATED", "SESSION", "KIND", "STATE");
    for s in &sessions {
        println!("{}", format_row(s));
    }
    Ok(())
}

/// Attach to an allocation's terminal.
pub async fn attach(endpoint: &Endpoint, session_id: &str) -> Result<()> {
    info!(session_id, "attaching");
    let path = format!("/api/v1/salloc/interactive/{session_id}/attach");
    let outcome = interactive::run(&endpoint.ws_url(&path)).await?;
    super::report(outcome, Some(session_id));
    Ok(())
}

/// Close an allocation's terminal and drop it from the server.
pub async fn close(endpoint: &Endpoint, session_id: &str) -> Result<()> {
    ApiClient::new(endpoint.clone())?.close(session_id).await?;
    println!("closed {session_id}");
    Ok(())
}

fn format_row(s: &SessionSummary) -> String {
    let kind = match s.kind {
        SessionKind::Allocation => "allocation",
        SessionKind::LoginShell => "login-shell",
    };
    format!(
        "{:<34} {:<12} {:<14} {}",
        s.session_id,
        kind,
        state_label(s),
        format_time(s.created_at)
    )
}

fn state_label(s: &SessionSummary) -> String {
    match s.exit {
        None if s.closed => "closed".to_string(),
        None => "running".to_string(),
        Some(ExitState::Exited(code)) => format!("exited({code})"),
        Some(ExitState::Signaled(sig)) => format!("signaled({sig})"),
        Some(ExitState::Unknown) => "exited(?)".to_string(),
    }
}

/// UTC `YYYY-MM-DD HH:MM:SS` for unix seconds.
fn format_time(secs: u64) -> String {
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (y, m, d) = civil_from_days(days as i64);
    format!(
        "{y:04}-{m:02}-{d:02} {:02}:{:02}:{:02}",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}
