//! Session protocol: creation, authorization, attach, close, login shell.

use super::bridge::{relay, RelayStats};
use super::launcher::{Launched, Launcher};
use super::registry::{Registry, Session};
use crate::identity::{Identity, IdentityResolver};
use slurmgate_core::{
    AllocRequest, FrameSink, FrameSource, GateError, GateResult, SessionKind, SessionSummary,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entry point for everything a connection can do with sessions.
pub struct SessionService {
    registry: Arc<Registry>,
    launcher: Launcher,
    resolver: Arc<dyn IdentityResolver>,
    relay_buffer_size: usize,
}

impl SessionService {
    pub fn new(
        registry: Arc<Registry>,
        launcher: Launcher,
        resolver: Arc<dyn IdentityResolver>,
        relay_buffer_size: usize,
    ) -> Self {
        Self {
            registry,
            launcher,
            resolver,
            relay_buffer_size,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn resolve(&self, principal: &str) -> GateResult<Identity> {
        self.resolver.resolve(principal)
    }

    /// Launch an allocation for `principal` and register it. On failure
    /// nothing is registered.
    pub async fn create_allocation(
        &self,
        principal: &str,
        request: &AllocRequest,
    ) -> GateResult<String> {
        let identity = self.resolve(principal)?;
        let launched = self.launcher.allocation(&identity, request).map_err(|e| {
            warn!(owner = %principal, error = %e, "allocation launch failed");
            e
        })?;
        let session = self
            .registry
            .add(principal, SessionKind::Allocation, launched)
            .await;
        self.registry.watch(session.clone());
        Ok(session.id.clone())
    }

    /// Check that `principal` may attach to session `id` right now.
    pub async fn authorize_attach(&self, id: &str, principal: &str) -> GateResult<Arc<Session>> {
        let session = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| GateError::NotFound(id.to_string()))?;
        if session.owner != principal {
            warn!(session_id = %id, principal = %principal, "attach by non-owner rejected");
            return Err(GateError::Forbidden(format!(
                "session {id} belongs to another user"
            )));
        }
        if !session.is_open() {
            return Err(GateError::TerminalClosed(id.to_string()));
        }
        Ok(session)
    }

    /// Relay a connection to an authorized session until either side ends.
    /// The session outlives the attach.
    pub async fn attach<S, K>(&self, session: Arc<Session>, source: S, sink: K) -> RelayStats
    where
        S: FrameSource + 'static,
        K: FrameSink + 'static,
    {
        info!(session_id = %session.id, owner = %session.owner, "attached");
        let id = session.id.clone();
        let stats = relay(
            session.terminal.clone(),
            source,
            sink,
            self.relay_buffer_size,
            move |direction| debug!(session_id = %id, ?direction, "attach ending"),
        )
        .await;
        info!(
            session_id = %session.id,
            inbound = stats.inbound_bytes,
            outbound = stats.outbound_bytes,
            "detached"
        );
        stats
    }

    /// Spawn a login shell for an already resolved identity.
    pub fn open_login_shell(&self, identity: &Identity) -> GateResult<Launched> {
        self.launcher.login_shell(identity)
    }

    /// Relay a connection to a login shell. The shell is killed as soon as
    /// either direction ends, and reaped before this returns.
    pub async fn run_login_shell<S, K>(&self, launched: Launched, source: S, sink: K) -> RelayStats
    where
        S: FrameSource + 'static,
        K: FrameSink + 'static,
    {
        let Launched { terminal, process } = launched;
        let terminal = Arc::new(terminal);
        let pid = process.pid();
        info!(pid, "login shell attached");

        let hook_terminal = terminal.clone();
        let hook_process = process.clone();
        let stats = relay(
            terminal.clone(),
            source,
            sink,
            self.relay_buffer_size,
            move |direction| {
                debug!(pid, ?direction, "login shell connection ending");
                hook_process.kill();
                hook_terminal.close();
            },
        )
        .await;

        let state = process.wait().await;
        terminal.close();
        info!(pid, exit = ?state, "login shell ended");
        stats
    }

    /// Remove a session on behalf of its owner.
    pub async fn close(&self, id: &str, principal: &str) -> GateResult<()> {
        let session = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| GateError::NotFound(id.to_string()))?;
        if session.owner != principal {
            return Err(GateError::Forbidden(format!(
                "session {id} belongs to another user"
            )));
        }
        self.registry.remove(id).await;
        Ok(())
    }

    pub async fn list(&self, principal: &str) -> Vec<SessionSummary> {
        self.registry.list_owned(principal).await
    }
}
