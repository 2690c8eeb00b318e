//! `slurmgate alloc`: start an interactive allocation.

use anyhow::Result;
use slurmgate_core::AllocRequest;
use tracing::info;

use crate::client::ApiClient;
use crate::config::Endpoint;

pub async fn run(endpoint: &Endpoint, request: AllocRequest, attach: bool) -> Result<()> {
    let client = ApiClient::new(endpoint.clone())?;
    let session_id = client.create(&request).await?;
    info!(session_id = %session_id, "allocation started");

    if !attach {
        println!("{session_id}");
        return Ok(());
    }
    eprintln!("slurmgate: session {session_id}");
    super::sessions::attach(endpoint, &session_id).await
}
