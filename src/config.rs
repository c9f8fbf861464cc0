//! Daemon configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Default ceiling for payloads handed to the online relay.
pub const DEFAULT_RELAY_MAX_BYTES: usize = 800_000;
const DEFAULT_WORKBOOK_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub log_filter: String,
    pub workbook_timeout: Duration,
    pub relay_max_bytes: usize,
    /// Workspace opened before the first request, if set.
    pub workspace: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            workbook_timeout: Duration::from_secs(DEFAULT_WORKBOOK_TIMEOUT_SECS),
            relay_max_bytes: DEFAULT_RELAY_MAX_BYTES,
            workspace: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let log_filter = get("FORM137_LOG")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.log_filter);

        let workbook_timeout = match get("FORM137_WORKBOOK_TIMEOUT_SECS") {
            Some(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|e| {
                    ConfigError::InvalidValue(
                        "FORM137_WORKBOOK_TIMEOUT_SECS".to_string(),
                        e.to_string(),
                    )
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue(
                        "FORM137_WORKBOOK_TIMEOUT_SECS".to_string(),
                        "must be at least 1".to_string(),
                    ));
                }
                Duration::from_secs(secs)
            }
            None => defaults.workbook_timeout,
        };

        let relay_max_bytes = match get("FORM137_RELAY_MAX_BYTES") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                ConfigError::InvalidValue("FORM137_RELAY_MAX_BYTES".to_string(), e.to_string())
            })?,
            None => defaults.relay_max_bytes,
        };

        let workspace = get("FORM137_WORKSPACE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            log_filter,
            workbook_timeout,
            relay_max_bytes,
            workspace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).expect("config");
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.workbook_timeout, Duration::from_secs(60));
        assert_eq!(cfg.relay_max_bytes, DEFAULT_RELAY_MAX_BYTES);
        assert!(cfg.workspace.is_none());
    }

    #[test]
    fn rejects_zero_timeout_and_garbage_sizes() {
        assert!(Config::from_lookup(lookup(&[("FORM137_WORKBOOK_TIMEOUT_SECS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("FORM137_RELAY_MAX_BYTES", "lots")])).is_err());
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("FORM137_LOG", "debug"),
            ("FORM137_WORKBOOK_TIMEOUT_SECS", "5"),
            ("FORM137_WORKSPACE", "/tmp/ws"),
        ]))
        .expect("config");
        assert_eq!(cfg.log_filter, "debug");
        assert_eq!(cfg.workbook_timeout, Duration::from_secs(5));
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
    }
}
