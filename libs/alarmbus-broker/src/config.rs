// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! `alarmd` configuration file.
//!
//! ```toml
//! [paths]
//! run_dir = "/run/alarmbus"
//!
//! [filter]
//! id_mask = "1001,1010-1012"
//!
//! [broker]
//! max_connections = 100
//! supervisor_interval_secs = 3
//! janitor_interval_secs = 60
//! poll_timeout_ms = 1000
//!
//! [log]
//! level = "info"
//! file = "/var/log/alarmbus/alarmd.log"
//! ```
//!
//! Every section and key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use alarmbus_client::{BusPaths, DEFAULT_RUN_DIR};
use serde::Deserialize;

use crate::error::{BrokerError, Result};
use crate::filter::FilterTable;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/alarmbus/alarmd.toml";

pub const DEFAULT_MAX_CONNECTIONS: usize = 100;
pub const DEFAULT_SUPERVISOR_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_JANITOR_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub paths: PathsSection,
    pub filter: FilterSection,
    pub broker: BrokerSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsSection {
    pub run_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from(DEFAULT_RUN_DIR),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterSection {
    pub id_mask: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerSection {
    pub max_connections: usize,
    pub supervisor_interval_secs: u64,
    pub janitor_interval_secs: u64,
    pub poll_timeout_ms: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            supervisor_interval_secs: DEFAULT_SUPERVISOR_INTERVAL.as_secs(),
            janitor_interval_secs: DEFAULT_JANITOR_INTERVAL.as_secs(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}

impl BrokerConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load the config file.
    ///
    /// With no explicit path the default location is tried and a missing
    /// file there means "all defaults". An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => Ok(Self::default()),
            Err(source) => Err(BrokerError::ConfigRead {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Resolve into the settings the broker runs with.
    pub fn settings(&self) -> Result<BrokerSettings> {
        if self.broker.max_connections == 0 {
            return Err(BrokerError::ConfigValue {
                key: "broker.max_connections",
                reason: "must be at least 1".to_string(),
            });
        }
        let nonzero = |key: &'static str, value: u64| {
            if value == 0 {
                Err(BrokerError::ConfigValue {
                    key,
                    reason: "must be greater than 0".to_string(),
                })
            } else {
                Ok(value)
            }
        };
        Ok(BrokerSettings {
            paths: BusPaths::new(&self.paths.run_dir),
            filter: FilterTable::from_config(self.filter.id_mask.as_deref()),
            max_connections: self.broker.max_connections,
            supervisor_interval: Duration::from_secs(nonzero(
                "broker.supervisor_interval_secs",
                self.broker.supervisor_interval_secs,
            )?),
            janitor_interval: Duration::from_secs(nonzero(
                "broker.janitor_interval_secs",
                self.broker.janitor_interval_secs,
            )?),
            poll_timeout: Duration::from_millis(nonzero(
                "broker.poll_timeout_ms",
                self.broker.poll_timeout_ms,
            )?),
        })
    }
}

/// Resolved runtime parameters for [`crate::Broker::start`].
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub paths: BusPaths,
    pub filter: FilterTable,
    pub max_connections: usize,
    pub supervisor_interval: Duration,
    pub janitor_interval: Duration,
    pub poll_timeout: Duration,
}

impl BrokerSettings {
    /// Defaults for everything but the rendezvous directory.
    pub fn new(paths: BusPaths) -> Self {
        Self {
            paths,
            filter: FilterTable::allow_all(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            supervisor_interval: DEFAULT_SUPERVISOR_INTERVAL,
            janitor_interval: DEFAULT_JANITOR_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BrokerConfig::from_toml("").unwrap();
        let settings = config.settings().unwrap();
        assert_eq!(settings.paths.run_dir(), Path::new(DEFAULT_RUN_DIR));
        assert!(!settings.filter.is_filtering());
        assert_eq!(settings.max_connections, 100);
        assert_eq!(settings.supervisor_interval, Duration::from_secs(3));
        assert_eq!(settings.janitor_interval, Duration::from_secs(60));
        assert_eq!(settings.poll_timeout, Duration::from_secs(1));
        assert!(config.log.level.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = BrokerConfig::from_toml(
            r#"
            [paths]
            run_dir = "/tmp/bus"

            [filter]
            id_mask = "1001,1010-1012"

            [broker]
            max_connections = 8
            supervisor_interval_secs = 1
            janitor_interval_secs = 5
            poll_timeout_ms = 250

            [log]
            level = "debug"
            file = "/tmp/alarmd.log"
            "#,
        )
        .unwrap();
        let settings = config.settings().unwrap();
        assert_eq!(settings.paths.report_socket(), Path::new("/tmp/bus/report"));
        assert!(settings.filter.allows(1011));
        assert!(!settings.filter.allows(1013));
        assert_eq!(settings.max_connections, 8);
        assert_eq!(settings.poll_timeout, Duration::from_millis(250));
        assert_eq!(config.log.level.as_deref(), Some("debug"));
        assert_eq!(config.log.file.as_deref(), Some(Path::new("/tmp/alarmd.log")));
    }

    #[test]
    fn test_rejects_unknown_keys_and_zero_values() {
        assert!(matches!(
            BrokerConfig::from_toml("[broker]\nmax_conns = 3\n"),
            Err(BrokerError::ConfigParse(_))
        ));
        let config = BrokerConfig::from_toml("[broker]\npoll_timeout_ms = 0\n").unwrap();
        assert!(matches!(
            config.settings(),
            Err(BrokerError::ConfigValue { key: "broker.poll_timeout_ms", .. })
        ));
    }

    #[test]
    fn test_load_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("alarmd.toml");
        assert!(matches!(
            BrokerConfig::load(Some(&missing)),
            Err(BrokerError::ConfigRead { .. })
        ));

        std::fs::write(&missing, "[filter]\nid_mask = \"1005\"\n").unwrap();
        let config = BrokerConfig::load(Some(&missing)).unwrap();
        assert_eq!(config.filter.id_mask.as_deref(), Some("1005"));
    }
}
