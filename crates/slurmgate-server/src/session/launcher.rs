//! Spawning terminal-backed processes as a resolved identity.
//!
//! All privilege transitions go through [`spawn_as`]: the child gets a fresh
//! session with the pty slave as its controlling terminal, a minimal
//! environment and the target account's groups, gid and uid.

use super::process::ProcessHandle;
use super::pty::{self, PtyPair, Terminal};
use crate::config::LaunchConfig;
use crate::identity::Identity;
use nix::unistd::{Gid, Uid};
use slurmgate_core::{AllocRequest, GateError, GateResult};
use std::ffi::CString;
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

const FALLBACK_SHELL: &str = "/bin/sh";

/// A program and its arguments, resolved but not yet spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Replacement for `argv[0]`.
    pub arg0: Option<String>,
}

/// Terminal parameters for a spawn.
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    pub term: String,
    pub cols: u16,
    pub rows: u16,
}

/// A running child and the terminal it is attached to.
#[derive(Debug)]
pub struct Launched {
    pub terminal: Terminal,
    pub process: ProcessHandle,
}

/// Spawn `command` on a new pseudo-terminal, running as `identity`.
pub fn spawn_as(
    identity: &Identity,
    command: &CommandSpec,
    options: &TerminalOptions,
) -> GateResult<Launched> {
    let PtyPair { terminal, slave } = pty::allocate(options.cols, options.rows)?;
    let credentials = Credentials::for_identity(identity)?;

    let mut cmd = Command::new(&command.program);
    if let Some(arg0) = &command.arg0 {
        cmd.arg0(arg0);
    }
    cmd.args(&command.args)
        .env_clear()
        .env("TERM", &options.term)
        .env("HOME", &identity.home)
        .env("USER", &identity.username)
        .env("LOGNAME", &identity.username);
    if let Some(path) = std::env::var_os("PATH") {
        cmd.env("PATH", path);
    }
    cmd.current_dir(&identity.home)
        .stdin(slave_stdio(&slave)?)
        .stdout(slave_stdio(&slave)?)
        .stderr(Stdio::from(slave));

    // SAFETY: the closure only issues raw syscalls and touches data moved
    // into it before the fork.
    unsafe {
        cmd.pre_exec(move || {
            nix::unistd::setsid()?;
            if libc::ioctl(0, libc::TIOCSCTTY as _, 0) < 0 {
                return Err(io::Error::last_os_error());
            }
            credentials.apply()
        });
    }

    let child = cmd.spawn().map_err(|e| {
        GateError::LaunchFailure(format!(
            "failed to spawn {}: {e}",
            command.program.display()
        ))
    })?;
    // The parent's copies of the slave live in `cmd`; releasing them lets
    // the master see a hangup once the child exits.
    drop(cmd);

    let process = ProcessHandle::supervise(child);
    info!(
        user = %identity.username,
        uid = identity.uid,
        pid = process.pid(),
        program = %command.program.display(),
        "process launched"
    );

    Ok(Launched { terminal, process })
}

fn slave_stdio(slave: &OwnedFd) -> GateResult<Stdio> {
    slave
        .try_clone()
        .map(Stdio::from)
        .map_err(|e| GateError::LaunchFailure(format!("failed to duplicate pty slave: {e}")))
}

/// Group and user ids the child switches to before exec.
struct Credentials {
    /// Supplementary groups; only settable when starting as root.
    groups: Option<Vec<Gid>>,
    gid: Gid,
    uid: Uid,
}

impl Credentials {
    fn for_identity(identity: &Identity) -> GateResult<Self> {
        let gid = Gid::from_raw(identity.gid);
        let groups = if Uid::effective().is_root() {
            let name = CString::new(identity.username.as_str()).map_err(|_| {
                GateError::IdentityNotFound(format!("invalid username {:?}", identity.username))
            })?;
            let groups = nix::unistd::getgrouplist(&name, gid).map_err(|e| {
                GateError::LaunchFailure(format!(
                    "failed to list groups of {}: {e}",
                    identity.username
                ))
            })?;
            Some(groups)
        } else {
            None
        };
        Ok(Self {
            groups,
            gid,
            uid: Uid::from_raw(identity.uid),
        })
    }

    fn apply(&self) -> io::Result<()> {
        if let Some(groups) = &self.groups {
            nix::unistd::setgroups(groups)?;
        }
        nix::unistd::setgid(self.gid)?;
        nix::unistd::setuid(self.uid)?;
        Ok(())
    }
}

/// Builds the login-shell and allocation commands from configuration.
#[derive(Debug, Clone)]
pub struct Launcher {
    config: LaunchConfig,
}

impl Launcher {
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }

    fn terminal_options(&self) -> TerminalOptions {
        TerminalOptions {
            term: self.config.term.clone(),
            cols: self.config.cols,
            rows: self.config.rows,
        }
    }

    /// The login shell command for `identity`, with a `-`-prefixed `argv[0]`.
    pub fn login_shell_command(&self, identity: &Identity) -> CommandSpec {
        let program = match &self.config.login_shell {
            Some(shell) => shell.clone(),
            None if identity.shell.as_os_str().is_empty() => PathBuf::from(FALLBACK_SHELL),
            None => identity.shell.clone(),
        };
        let arg0 = format!("-{}", basename(&program));
        CommandSpec {
            program,
            args: Vec::new(),
            arg0: Some(arg0),
        }
    }

    /// The allocation command: configured prefix followed by the request's
    /// scheduler arguments.
    pub fn allocation_command(&self, request: &AllocRequest) -> GateResult<CommandSpec> {
        let (program, prefix) = self
            .config
            .alloc_command
            .split_first()
            .ok_or_else(|| GateError::LaunchFailure("allocation command is empty".into()))?;
        let mut args = prefix.to_vec();
        args.extend(request.to_args());
        Ok(CommandSpec {
            program: PathBuf::from(program),
            args,
            arg0: None,
        })
    }

    pub fn login_shell(&self, identity: &Identity) -> GateResult<Launched> {
        spawn_as(
            identity,
            &self.login_shell_command(identity),
            &self.terminal_options(),
        )
    }

    pub fn allocation(&self, identity: &Identity, request: &AllocRequest) -> GateResult<Launched> {
        spawn_as(
            identity,
            &self.allocation_command(request)?,
            &self.terminal_options(),
        )
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::current_identity;
    use crate::session::testutil::read_until;
    use slurmgate_core::ExitState;

    fn launcher(alloc_command: &[&str], login_shell: Option<&str>) -> Launcher {
        Launcher::new(LaunchConfig {
            alloc_command: alloc_command.iter().map(|s| s.to_string()).collect(),
            login_shell: login_shell.map(PathBuf::from),
            ..LaunchConfig::default()
        })
    }

    #[test]
    fn allocation_command_appends_request_args() {
        let l = launcher(&["sudo", "-n", "salloc"], None);
        let spec = l
            .allocation_command(&AllocRequest {
                partition: Some("gpu".into()),
                gpu_count: Some(0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(spec.program, PathBuf::from("sudo"));
        assert_eq!(
            spec.args,
            vec!["-n", "salloc", "--ntasks-per-node", "1", "--partition", "gpu"]
        );
        assert_eq!(spec.arg0, None);
    }

    #[test]
    fn empty_allocation_command_fails() {
        let l = launcher(&[], None);
        assert!(matches!(
            l.allocation_command(&AllocRequest::default()),
            Err(GateError::LaunchFailure(_))
        ));
    }

    #[test]
    fn login_shell_uses_dash_prefixed_basename() {
        let identity = Identity {
            username: "alice".into(),
            uid: 1000,
            gid: 1000,
            home: PathBuf::from("/home/alice"),
            shell: PathBuf::from("/usr/bin/zsh"),
        };
        let spec = launcher(&["salloc"], None).login_shell_command(&identity);
        assert_eq!(spec.program, PathBuf::from("/usr/bin/zsh"));
        assert_eq!(spec.arg0.as_deref(), Some("-zsh"));

        let spec = launcher(&["salloc"], Some("/bin/bash")).login_shell_command(&identity);
        assert_eq!(spec.arg0.as_deref(), Some("-bash"));

        let no_shell = Identity {
            shell: PathBuf::new(),
            ..identity
        };
        let spec = launcher(&["salloc"], None).login_shell_command(&no_shell);
        assert_eq!(spec.program, PathBuf::from("/bin/sh"));
    }

    #[tokio::test]
    async fn spawned_command_line_carries_gpu_flag_only_when_nonzero() {
        let identity = current_identity().unwrap();
        let l = launcher(&["/bin/sh", "-c", "echo \"args: $*\"; exec cat", "salloc"], None);

        let with_gpus = l
            .allocation(
                &identity,
                &AllocRequest {
                    gpu_count: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        let out = read_until(&with_gpus.terminal, "\n").await;
        assert!(out.contains("args: --ntasks-per-node 1 --gpus 2"), "{out}");

        let without = l
            .allocation(
                &identity,
                &AllocRequest {
                    gpu_count: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();
        let out = read_until(&without.terminal, "\n").await;
        assert!(out.contains("args: --ntasks-per-node 1"), "{out}");
        assert!(!out.contains("--gpus"), "{out}");

        for launched in [with_gpus, without] {
            launched.process.kill();
            assert_eq!(
                launched.process.wait().await,
                ExitState::Signaled(libc::SIGKILL)
            );
        }
    }

    #[tokio::test]
    async fn environment_is_minimal() {
        std::env::set_var("SLURMGATE_LEAK_CHECK", "leaked");
        let identity = current_identity().unwrap();
        let l = launcher(
            &[
                "/bin/sh",
                "-c",
                "echo \"term=$TERM user=$USER leak=${SLURMGATE_LEAK_CHECK:-none} cwd=$(pwd)\"; exec cat",
            ],
            None,
        );
        let launched = l.allocation(&identity, &AllocRequest::default()).unwrap();
        let out = read_until(&launched.terminal, "\n").await;

        assert!(out.contains("term=xterm"), "{out}");
        assert!(out.contains(&format!("user={}", identity.username)), "{out}");
        assert!(out.contains("leak=none"), "{out}");
        let home = std::fs::canonicalize(&identity.home).unwrap();
        assert!(out.contains(&format!("cwd={}", home.display())), "{out}");
        launched.process.kill();
    }

    #[tokio::test]
    async fn child_has_controlling_terminal() {
        let identity = current_identity().unwrap();
        let l = launcher(&["/bin/sh", "-c", "tty && echo done && exec cat"], None);
        let launched = l.allocation(&identity, &AllocRequest::default()).unwrap();
        let out = read_until(&launched.terminal, "done").await;
        assert!(out.contains("/dev/pts/"), "{out}");
        launched.process.kill();
    }

    #[tokio::test]
    async fn login_shell_sees_dash_argv0() {
        let identity = current_identity().unwrap();
        let l = launcher(&["salloc"], Some("/bin/sh"));
        let launched = l.login_shell(&identity).unwrap();

        launched
            .terminal
            .write_all(b"echo \"zero=[$0]\"\n")
            .await
            .unwrap();
        read_until(&launched.terminal, "zero=[-sh]").await;

        launched.process.kill();
        launched.process.wait().await;
    }

    #[tokio::test]
    async fn missing_program_is_launch_failure() {
        let identity = current_identity().unwrap();
        let l = launcher(&["/nonexistent/slurmgate-salloc"], None);
        let err = l
            .allocation(&identity, &AllocRequest::default())
            .unwrap_err();
        assert!(matches!(err, GateError::LaunchFailure(_)), "{err}");
    }
}
