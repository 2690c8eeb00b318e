//! Client configuration at `~/.slurmgate/config.toml`.
//!
//! Provides the default server URL and bearer token. Flags and the
//! `SLURMGATE_TOKEN` environment variable override config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,
}

/// Default connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultConfig {
    /// Base URL of the gateway.
    #[serde(default = "default_server")]
    pub server: String,

    /// Bearer token issued by `slurmgate-server issue-token`.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            token: None,
        }
    }
}

fn default_server() -> String {
    "http://127.0.0.1:8080".to_string()
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

/// Connection settings after applying flags over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub server: String,
    pub token: String,
}

impl Endpoint {
    /// Pick the server and token: flag (or env) first, then config file.
    pub fn resolve(
        cfg: &Config,
        server_flag: Option<String>,
        token_flag: Option<String>,
    ) -> Result<Self> {
        let server = server_flag
            .unwrap_or_else(|| cfg.default.server.clone())
            .trim_end_matches('/')
            .to_string();
        if !(server.starts_with("http://") || server.starts_with("https://")) {
            anyhow::bail!("server URL must start with http:// or https://, got '{server}'");
        }
        let token = token_flag
            .or_else(|| cfg.default.token.clone())
            .filter(|t| !t.trim().is_empty())
            .context("no token: pass --token, set SLURMGATE_TOKEN, or add token to the config file")?;
        Ok(Self {
            server,
            token: token.trim().to_string(),
        })
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    /// WebSocket URL for `path`, carrying the token as a query parameter.
    pub fn ws_url(&self, path: &str) -> String {
        let base = if let Some(rest) = self.server.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.server.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.server.clone()
        };
        format!("{base}{path}?token={}", self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.default.server, "http://127.0.0.1:8080");
        assert!(cfg.default.token.is_none());
    }

    #[test]
    fn parse_toml_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[default]
server = "https://gate.example.org"
token = "abc.def"
"#
        )
        .unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.default.server, "https://gate.example.org");
        assert_eq!(cfg.default.token.as_deref(), Some("abc.def"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.default.server, "http://127.0.0.1:8080");
    }

    #[test]
    fn flags_override_config() {
        let cfg = Config {
            default: DefaultConfig {
                server: "http://config:8080".into(),
                token: Some("from-config".into()),
            },
        };
        let ep = Endpoint::resolve(&cfg, None, None).unwrap();
        assert_eq!(ep.token, "from-config");
        assert_eq!(ep.server, "http://config:8080");

        let ep = Endpoint::resolve(&cfg, Some("https://flag/".into()), Some("from-flag".into()))
            .unwrap();
        assert_eq!(ep.server, "https://flag");
        assert_eq!(ep.token, "from-flag");
    }

    #[test]
    fn missing_token_or_bad_scheme_fails() {
        assert!(Endpoint::resolve(&Config::default(), None, None).is_err());
        assert!(Endpoint::resolve(&Config::default(), Some("ftp://x".into()), Some("t".into())).is_err());
    }

    #[test]
    fn websocket_urls() {
        let ep = Endpoint {
            server: "https://gate.example.org".into(),
            token: "aa.bb".into(),
        };
        assert_eq!(
            ep.ws_url("/api/v1/shell"),
            "wss://gate.example.org/api/v1/shell?token=aa.bb"
        );
        let ep = Endpoint {
            server: "http://127.0.0.1:8080".into(),
            token: "t".into(),
        };
        assert_eq!(
            ep.ws_url("/api/v1/salloc/interactive/abc/attach"),
            "ws://127.0.0.1:8080/api/v1/salloc/interactive/abc/attach?token=t"
        );
        assert_eq!(
            ep.api_url("/api/v1/salloc/interactive"),
            "http://127.0.0.1:8080/api/v1/salloc/interactive"
        );
    }
}
