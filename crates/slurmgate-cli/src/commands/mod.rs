//! CLI subcommand implementations.

pub mod alloc;
pub mod interactive;
pub mod sessions;
pub mod shell;

use interactive::Outcome;

/// Tell the user how an interactive session ended.
pub(crate) fn report(outcome: Outcome, session_id: Option<&str>) {
    match (outcome, session_id) {
        (Outcome::Detached, Some(id)) => {
            eprintln!("\r\nslurmgate: detached; reattach with `slurmgate attach {id}`")
        }
        (Outcome::Detached, None) => eprintln!("\r\nslurmgate: disconnected"),
        (Outcome::Closed, _) => eprintln!("\r\nslurmgate: connection closed"),
    }
}
