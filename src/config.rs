//! Client configuration: built-in defaults, an optional JSON file, and CLI overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5001/api";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(10),
            user_agent: format!("leadctl/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Values given on the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub poll_interval: Option<Duration>,
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit `path` must exist; the per-user default file is only read if present.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        if let Some(url) = overrides.base_url {
            cfg.base_url = url;
        }
        if let Some(d) = overrides.poll_interval {
            cfg.poll_interval = d;
        }
        if let Some(d) = overrides.request_timeout {
            cfg.request_timeout = d;
        }
        cfg.base_url = cfg.base_url.trim_end_matches('/').to_string();
        if cfg.poll_interval.is_zero() {
            anyhow::bail!("poll interval must be greater than zero");
        }
        Ok(cfg)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("leadctl").join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn file_values_are_overridden_by_flags() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"base_url": "http://backend:8080/api/", "poll_interval": "2s"}}"#
        )
        .unwrap();

        let cfg = ClientConfig::load(
            Some(f.path()),
            Overrides {
                request_timeout: Some(Duration::from_secs(3)),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(cfg.base_url, "http://backend:8080/api");
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.request_timeout, Duration::from_secs(3));
        assert_eq!(cfg.user_agent, ClientConfig::default().user_agent);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(ClientConfig::load(Some(&missing), Overrides::default()).is_err());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"poll_interval": "0s"}}"#).unwrap();
        assert!(ClientConfig::load(Some(f.path()), Overrides::default()).is_err());
    }
}
