//! perch.toml configuration parser.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerchConfig {
    /// Where the state and ledger databases live.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Where report artifacts are written. Defaults to `<data_dir>/reports`.
    pub report_dir: Option<PathBuf>,
    /// `host:port` of an HTTP alarm feed. When unset, alarm states come from
    /// the local store (`perch alarm set`).
    pub alarm_endpoint: Option<String>,
    /// Seconds between health samples during holds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".perch")
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for PerchConfig {
    fn default() -> Self {
        PerchConfig {
            data_dir: default_data_dir(),
            report_dir: None,
            alarm_endpoint: None,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl PerchConfig {
    /// Load from a toml file. A missing file is not an error: every field
    /// has a default, so a bare `perch` invocation works out of the box.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(PerchConfig::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: PerchConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn report_dir(&self) -> PathBuf {
        self.report_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("reports"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = PerchConfig::load(Path::new("/nonexistent/perch.toml")).unwrap();
        assert_eq!(config.data_dir, PathBuf::from(".perch"));
        assert_eq!(config.poll_interval_secs, 30);
        assert!(config.alarm_endpoint.is_none());
    }

    #[test]
    fn parses_partial_toml() {
        let toml_str = r#"
data_dir = "/var/lib/perch"
alarm_endpoint = "monitor.internal:9000"
"#;
        let config: PerchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/perch"));
        assert_eq!(
            config.alarm_endpoint.as_deref(),
            Some("monitor.internal:9000")
        );
        assert_eq!(config.poll_interval_secs, 30);
    }

    #[test]
    fn report_dir_falls_back_under_data_dir() {
        let config = PerchConfig::default();
        assert_eq!(config.report_dir(), PathBuf::from(".perch/reports"));

        let explicit = PerchConfig {
            report_dir: Some(PathBuf::from("/tmp/reports")),
            ..PerchConfig::default()
        };
        assert_eq!(explicit.report_dir(), PathBuf::from("/tmp/reports"));
    }

    #[test]
    fn rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perch.toml");
        std::fs::write(&path, "data_dir = [not toml").unwrap();
        assert!(PerchConfig::load(&path).is_err());
    }
}
