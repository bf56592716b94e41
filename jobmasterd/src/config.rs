//! Daemon configuration.
//!
//! Resolution order mirrors the CLI: explicit `--config` flag, then
//! the `JOBMASTERD_CONFIG` environment variable, then built-in
//! defaults. Missing file with an explicit path is an error; no path
//! at all means defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const CONFIG_ENV: &str = "JOBMASTERD_CONFIG";

/// Number of worker slots serving client calls when unconfigured.
pub const DEFAULT_CLIENT_THREAD_COUNT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientServiceConfig {
    /// Size of the bounded worker pool serving client calls.
    pub client_thread_count: usize,
    /// Restrict the listener to this inclusive port range. Unset
    /// means any ephemeral port.
    pub port_range: Option<PortRange>,
    /// Require the environment-provided client secret and sign all
    /// protocol envelopes with the attempt-scoped key.
    pub security_enabled: bool,
    /// Enforce the service ACL policy before dispatching calls.
    pub authorization_enabled: bool,
    /// Policy file consulted when authorization is enabled.
    pub policy_file: Option<PathBuf>,
    /// Bind address for the auxiliary HTTP status interface.
    pub status_addr: String,
}

impl Default for ClientServiceConfig {
    fn default() -> Self {
        Self {
            client_thread_count: DEFAULT_CLIENT_THREAD_COUNT,
            port_range: None,
            security_enabled: false,
            authorization_enabled: false,
            policy_file: None,
            status_addr: "127.0.0.1:0".to_string(),
        }
    }
}

impl ClientServiceConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = path
            .map(PathBuf::from)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));

        let Some(path) = resolved else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_documented_values() {
        let config = ClientServiceConfig::default();
        assert_eq!(config.client_thread_count, DEFAULT_CLIENT_THREAD_COUNT);
        assert!(config.port_range.is_none());
        assert!(!config.security_enabled);
        assert!(!config.authorization_enabled);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            b"client_thread_count = 4\nsecurity_enabled = true\n\n[port_range]\nstart = 41000\nend = 41010\n",
        )
        .unwrap();

        let config = ClientServiceConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.client_thread_count, 4);
        assert!(config.security_enabled);
        assert_eq!(
            config.port_range,
            Some(PortRange {
                start: 41000,
                end: 41010
            })
        );
        assert!(!config.authorization_enabled);
        assert_eq!(config.status_addr, "127.0.0.1:0");
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        assert!(ClientServiceConfig::load(Some(Path::new("/nonexistent/jobmasterd.toml"))).is_err());
    }
}
