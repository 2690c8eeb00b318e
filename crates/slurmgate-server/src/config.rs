//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use slurmgate_core::{GateError, GateResult};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub sessions: SessionsSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    /// Hex-encoded HMAC secret for bearer tokens.
    #[serde(default)]
    pub token_secret: Option<String>,
    #[serde(default = "default_token_ttl")]
    pub token_ttl: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_ttl: default_token_ttl(),
        }
    }
}

/// `[sessions]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsSection {
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
    /// Program and leading arguments of the allocation command.
    #[serde(default = "default_alloc_command")]
    pub alloc_command: Vec<String>,
    /// Overrides the login shell from the passwd database.
    #[serde(default)]
    pub login_shell: Option<String>,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            relay_buffer_size: default_relay_buffer_size(),
            alloc_command: default_alloc_command(),
            login_shell: None,
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    8080
}
fn default_max_frame_size() -> usize {
    1_048_576
}
fn default_token_ttl() -> u64 {
    86400
}
fn default_grace_period() -> u64 {
    60
}
fn default_relay_buffer_size() -> usize {
    4096
}
fn default_alloc_command() -> Vec<String> {
    vec!["salloc".to_string()]
}
fn default_term() -> String {
    "xterm".to_string()
}
fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    24
}

/// Settings the launcher needs to build and spawn commands.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub alloc_command: Vec<String>,
    pub login_shell: Option<PathBuf>,
    pub term: String,
    pub cols: u16,
    pub rows: u16,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        let sessions = SessionsSection::default();
        Self {
            alloc_command: sessions.alloc_command,
            login_shell: None,
            term: sessions.term,
            cols: sessions.cols,
            rows: sessions.rows,
        }
    }
}

/// CLI values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub grace_period: Option<u64>,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub max_frame_size: usize,
    pub token_secret: Option<Vec<u8>>,
    pub token_ttl: u64,
    pub grace_period: Duration,
    pub relay_buffer_size: usize,
    pub launch: LaunchConfig,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> GateResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| GateError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, overrides)
    }

    fn resolve(file: ConfigFile, overrides: &Overrides) -> GateResult<Self> {
        let bind = overrides.bind.unwrap_or(file.server.bind);
        let port = overrides.port.unwrap_or(file.server.port);
        let grace = overrides.grace_period.unwrap_or(file.sessions.grace_period);

        let token_secret = file
            .auth
            .token_secret
            .as_deref()
            .map(decode_secret)
            .transpose()?;

        if file.sessions.alloc_command.is_empty() {
            return Err(GateError::Config("sessions.alloc_command is empty".into()));
        }
        if file.sessions.relay_buffer_size == 0 {
            return Err(GateError::Config(
                "sessions.relay_buffer_size must be positive".into(),
            ));
        }

        Ok(Self {
            listen_addr: SocketAddr::new(bind, port),
            max_frame_size: file.server.max_frame_size,
            token_secret,
            token_ttl: file.auth.token_ttl,
            grace_period: Duration::from_secs(grace),
            relay_buffer_size: file.sessions.relay_buffer_size,
            launch: LaunchConfig {
                alloc_command: file.sessions.alloc_command,
                login_shell: file.sessions.login_shell.as_deref().map(expand_tilde_str),
                term: file.sessions.term,
                cols: file.sessions.cols,
                rows: file.sessions.rows,
            },
        })
    }
}

fn decode_secret(secret_hex: &str) -> GateResult<Vec<u8>> {
    let secret = hex::decode(secret_hex.trim())
        .map_err(|e| GateError::Config(format!("auth.token_secret is not hex: {e}")))?;
    if secret.len() < 16 {
        return Err(GateError::Config(
            "auth.token_secret must be at least 16 bytes".into(),
        ));
    }
    Ok(secret)
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
