//! `slurmgate shell`: open a login shell on the frontend.
//!
//! The shell lives only as long as this connection; detaching ends it.

use anyhow::Result;

use super::interactive;
use crate::config::Endpoint;

pub async fn run(endpoint: &Endpoint) -> Result<()> {
    let outcome = interactive::run(&endpoint.ws_url("/api/v1/shell")).await?;
    super::report(outcome, None);
    Ok(())
}
