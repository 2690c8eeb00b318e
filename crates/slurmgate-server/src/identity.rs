//! Username to operating-system identity resolution.

use nix::unistd::User;
use slurmgate_core::{GateError, GateResult};
use std::path::PathBuf;

/// An operating-system account a session runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    /// Login shell from the account database.
    pub shell: PathBuf,
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Self {
            username: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
            shell: user.shell,
        }
    }
}

/// Maps a principal name to an [`Identity`].
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, username: &str) -> GateResult<Identity>;
}

/// Resolver backed by the system passwd database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl IdentityResolver for SystemResolver {
    fn resolve(&self, username: &str) -> GateResult<Identity> {
        if username.is_empty() {
            return Err(GateError::IdentityNotFound("empty username".into()));
        }
        match User::from_name(username) {
            Ok(Some(user)) => Ok(user.into()),
            Ok(None) => Err(GateError::IdentityNotFound(username.to_string())),
            Err(e) => Err(GateError::IdentityNotFound(format!(
                "{username}: lookup failed: {e}"
            ))),
        }
    }
}

/// Identity of the user running this process.
#[cfg(test)]
pub fn current_identity() -> GateResult<Identity> {
    use nix::unistd::{Gid, Uid};
    let uid = Uid::current();
    match User::from_uid(uid) {
        Ok(Some(user)) => Ok(user.into()),
        _ => Ok(Identity {
            username: std::env::var("USER").unwrap_or_else(|_| uid.to_string()),
            uid: uid.as_raw(),
            gid: Gid::current().as_raw(),
            home: dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
            shell: PathBuf::from("/bin/sh"),
        }),
    }
}
