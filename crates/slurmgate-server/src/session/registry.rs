//! Session registry.
//!
//! Owns every registered session, generates their IDs, and removes them
//! either on request or once their process has exited and the grace period
//! has passed.

use super::launcher::Launched;
use super::process::ProcessHandle;
use super::pty::Terminal;
use slurmgate_core::{SessionKind, SessionSummary};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// A registered terminal session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    /// Username of the principal that created the session.
    pub owner: String,
    pub kind: SessionKind,
    pub created_at: SystemTime,
    pub terminal: Arc<Terminal>,
    pub process: ProcessHandle,
}

impl Session {
    /// Attachable while the terminal is open.
    pub fn is_open(&self) -> bool {
        !self.terminal.is_closed()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            owner: self.owner.clone(),
            kind: self.kind,
            created_at: self
                .created_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            closed: self.terminal.is_closed(),
            exit: self.process.try_status(),
        }
    }
}

struct PendingEviction {
    generation: u64,
    handle: AbortHandle,
}

/// Concurrency-safe map of session ID to session.
pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    evictions: Mutex<HashMap<String, PendingEviction>>,
    next_generation: Mutex<u64>,
    grace: Duration,
}

impl Registry {
    /// Create an empty registry whose exited sessions linger for `grace`.
    pub fn new(grace: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            evictions: Mutex::new(HashMap::new()),
            next_generation: Mutex::new(0),
            grace,
        }
    }

    /// Register a launched process under a fresh, unique ID.
    pub async fn add(&self, owner: &str, kind: SessionKind, launched: Launched) -> Arc<Session> {
        let mut sessions = self.sessions.write().await;
        let id = loop {
            let candidate = generate_session_id();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = Arc::new(Session {
            id: id.clone(),
            owner: owner.to_string(),
            kind,
            created_at: SystemTime::now(),
            terminal: Arc::new(launched.terminal),
            process: launched.process,
        });
        sessions.insert(id, session.clone());
        info!(
            session_id = %session.id,
            owner = %session.owner,
            kind = ?kind,
            pid = session.process.pid(),
            total = sessions.len(),
            "session registered"
        );
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session, closing its terminal and cancelling any pending
    /// eviction. Unknown IDs are ignored. Returns whether an entry existed.
    pub async fn remove(&self, id: &str) -> bool {
        if let Some(pending) = self.lock_evictions().remove(id) {
            pending.handle.abort();
        }
        self.remove_entry(id).await
    }

    async fn remove_entry(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(session) => {
                session.terminal.close();
                info!(session_id = %id, owner = %session.owner, "session removed");
                true
            }
            None => false,
        }
    }

    /// Sessions owned by `owner`, oldest first.
    pub async fn list_owned(&self, owner: &str) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut owned: Vec<&Arc<Session>> =
            sessions.values().filter(|s| s.owner == owner).collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        owned.into_iter().map(|s| s.summary()).collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Spawn the exit watcher for `session`: once the process exits, close
    /// the terminal and schedule eviction after the grace period.
    pub fn watch(self: &Arc<Self>, session: Arc<Session>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let state = session.process.wait().await;
            session.terminal.close();
            info!(
                session_id = %session.id,
                owner = %session.owner,
                exit = ?state,
                "session process exited"
            );

            let still_registered = registry
                .get(&session.id)
                .await
                .is_some_and(|current| Arc::ptr_eq(&current, &session));
            if still_registered {
                registry.schedule_eviction(&session.id, registry.grace);
            }
        });
    }

    /// Remove `id` after `delay`. Replaces any eviction already pending for
    /// the same ID.
    pub fn schedule_eviction(self: &Arc<Self>, id: &str, delay: Duration) {
        let generation = {
            let mut next = self
                .next_generation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };

        let deadline = tokio::time::Instant::now() + delay;
        let registry = Arc::clone(self);
        let key = id.to_string();
        // Held across the spawn so the task cannot look for its entry before
        // it is inserted.
        let mut evictions = self.lock_evictions();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let current = {
                let mut evictions = registry.lock_evictions();
                let current = evictions
                    .get(&key)
                    .is_some_and(|pending| pending.generation == generation);
                if current {
                    evictions.remove(&key);
                }
                current
            };
            // A superseded or cancelled timer must not evict.
            if current && registry.remove_entry(&key).await {
                debug!(session_id = %key, "session evicted after grace period");
            }
        });

        let previous = evictions.insert(
            id.to_string(),
            PendingEviction {
                generation,
                handle: task.abort_handle(),
            },
        );
        drop(evictions);
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        debug!(session_id = %id, delay_ms = delay.as_millis() as u64, "eviction scheduled");
    }

    fn lock_evictions(&self) -> MutexGuard<'_, HashMap<String, PendingEviction>> {
        self.evictions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Generate a random session ID (16 bytes, hex-encoded).
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
