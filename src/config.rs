// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the replication layer.
//!
//! Configuration is passed to [`PouchLink::new()`](crate::PouchLink::new) (or
//! directly to [`PouchManager::new()`](crate::PouchManager::new)) and can be
//! constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use pouch_link::config::LinkConfig;
//!
//! let config = LinkConfig {
//!     doctypes: vec!["io.cozy.files".into(), "io.cozy.contacts".into()],
//!     remote_url: "https://alice.mycozy.cloud".into(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! LinkConfig
//! ├── doctypes: Vec<String>              # One local store + loop each
//! ├── prefix: Option<String>             # Local database name prefix
//! ├── remote_url: String                 # Base URL of the remote API
//! ├── replication: ReplicationSettings   # Shared loop settings
//! └── doctypes_replication: map          # Per-doctype overrides
//!     └── DoctypeReplication { interval, strategy }
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! doctypes: ["io.cozy.files", "io.cozy.contacts"]
//! prefix: "alice.mycozy.cloud"
//! remote_url: "https://alice.mycozy.cloud"
//!
//! replication:
//!   interval: "30s"
//!   initial_sync: true
//!
//! doctypes_replication:
//!   io.cozy.files:
//!     interval: "5m"
//!     strategy: pull
//! ```

use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Fallback when an interval string does not parse.
pub const DEFAULT_REPLICATION_INTERVAL: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Doctypes mirrored locally. Fixed for the manager's lifetime.
    pub doctypes: Vec<String>,

    /// Prefix for local database names (usually the instance host).
    #[serde(default)]
    pub prefix: Option<String>,

    /// Base URL of the remote document API.
    #[serde(default)]
    pub remote_url: String,

    /// Settings shared by every doctype's replication loop.
    #[serde(default)]
    pub replication: ReplicationSettings,

    /// Per-doctype overrides.
    #[serde(default)]
    pub doctypes_replication: HashMap<String, DoctypeReplication>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            doctypes: Vec::new(),
            prefix: None,
            remote_url: "http://localhost:8080".to_string(),
            replication: ReplicationSettings::default(),
            doctypes_replication: HashMap::new(),
        }
    }
}

impl LinkConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(doctypes: &[&str]) -> Self {
        Self {
            doctypes: doctypes.iter().map(|d| d.to_string()).collect(),
            prefix: Some("test".to_string()),
            remote_url: "http://cozy.localhost:8080".to_string(),
            replication: ReplicationSettings::default(),
            doctypes_replication: HashMap::new(),
        }
    }

    /// Check the config before building stores and loops from it.
    pub fn validate(&self) -> Result<()> {
        if self.doctypes.is_empty() {
            return Err(LinkError::Config("no doctypes configured".to_string()));
        }

        let mut seen = HashSet::new();
        for doctype in &self.doctypes {
            if doctype.trim().is_empty() {
                return Err(LinkError::Config("empty doctype name".to_string()));
            }
            if !seen.insert(doctype.as_str()) {
                return Err(LinkError::Config(format!("duplicate doctype: {}", doctype)));
            }
        }

        check_interval("replication.interval", &self.replication.interval)?;

        for (doctype, overrides) in &self.doctypes_replication {
            if !seen.contains(doctype.as_str()) {
                return Err(LinkError::Config(format!(
                    "replication override for unconfigured doctype: {}",
                    doctype
                )));
            }
            if let Some(ref interval) = overrides.interval {
                check_interval(&format!("doctypes_replication.{}.interval", doctype), interval)?;
            }
        }

        Ok(())
    }

    /// Local database name for a doctype: `{prefix}_{doctype}`.
    pub fn database_name(&self, doctype: &str) -> String {
        match self.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{}_{}", prefix, doctype),
            _ => doctype.to_string(),
        }
    }

    /// Remote endpoint the local store replicates with.
    pub fn remote_url_for(&self, doctype: &str) -> String {
        format!("{}/data/{}/", self.remote_url.trim_end_matches('/'), doctype)
    }

    /// Replication period for a doctype (override, else shared interval).
    pub fn interval_for(&self, doctype: &str) -> Duration {
        self.doctypes_replication
            .get(doctype)
            .and_then(|o| o.interval.as_deref())
            .map(parse_interval)
            .unwrap_or_else(|| self.replication.interval_duration())
    }

    /// Replication direction for a doctype.
    pub fn strategy_for(&self, doctype: &str) -> ReplicationStrategy {
        self.doctypes_replication
            .get(doctype)
            .map(|o| o.strategy)
            .unwrap_or_default()
    }
}

fn check_interval(field: &str, value: &str) -> Result<()> {
    match humantime::parse_duration(value) {
        Ok(d) if !d.is_zero() => Ok(()),
        Ok(_) => Err(LinkError::Config(format!("{} must be greater than zero", field))),
        Err(e) => Err(LinkError::Config(format!("{}: {} ({})", field, e, value))),
    }
}

fn parse_interval(value: &str) -> Duration {
    humantime::parse_duration(value).unwrap_or(DEFAULT_REPLICATION_INTERVAL)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationSettings: shared loop settings
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings shared by all replication loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Period between rounds as a duration string (e.g., "30s").
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Start replication as part of login.
    #[serde(default = "default_false")]
    pub initial_sync: bool,

    /// Run the first round as soon as a loop starts instead of after one interval.
    #[serde(default = "default_true")]
    pub run_on_start: bool,

    /// Batch size handed to the store's replicate call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_interval() -> String {
    "30s".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_batch_size() -> usize {
    100
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            interval: "30s".to_string(),
            initial_sync: false,
            run_on_start: true,
            batch_size: 100,
        }
    }
}

impl ReplicationSettings {
    /// Parse the interval string to a Duration.
    pub fn interval_duration(&self) -> Duration {
        parse_interval(&self.interval)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Per-doctype overrides
// ═══════════════════════════════════════════════════════════════════════════════

/// Direction of a replication round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationStrategy {
    /// Remote → local only.
    #[serde(alias = "fromRemote")]
    Pull,
    /// Local → remote only.
    #[serde(alias = "toRemote")]
    Push,
    /// Both directions.
    #[default]
    Sync,
}

impl ReplicationStrategy {
    pub fn pulls(&self) -> bool {
        matches!(self, Self::Pull | Self::Sync)
    }

    pub fn pushes(&self) -> bool {
        matches!(self, Self::Push | Self::Sync)
    }
}

impl std::fmt::Display for ReplicationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pull => write!(f, "pull"),
            Self::Push => write!(f, "push"),
            Self::Sync => write!(f, "sync"),
        }
    }
}

/// Overrides for one doctype.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctypeReplication {
    /// Replication period, replaces the shared interval.
    #[serde(default)]
    pub interval: Option<String>,

    #[serde(default)]
    pub strategy: ReplicationStrategy,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_name_with_prefix() {
        let config = LinkConfig::for_testing(&["io.cozy.files"]);
        assert_eq!(config.database_name("io.cozy.files"), "test_io.cozy.files");
    }

    #[test]
    fn test_database_name_without_prefix() {
        let config = LinkConfig {
            doctypes: vec!["io.cozy.files".into()],
            ..Default::default()
        };
        assert_eq!(config.database_name("io.cozy.files"), "io.cozy.files");
    }

    #[test]
    fn test_remote_url_for_trims_slash() {
        let config = LinkConfig {
            remote_url: "https://alice.mycozy.cloud/".into(),
            ..Default::default()
        };
        assert_eq!(
            config.remote_url_for("io.cozy.files"),
            "https://alice.mycozy.cloud/data/io.cozy.files/"
        );
    }

    #[test]
    fn test_interval_various_formats() {
        let test_cases = [
            ("5s", Duration::from_secs(5)),
            ("1m", Duration::from_secs(60)),
            ("500ms", Duration::from_millis(500)),
            ("2min", Duration::from_secs(120)),
        ];

        for (input, expected) in test_cases {
            let settings = ReplicationSettings {
                interval: input.to_string(),
                ..Default::default()
            };
            assert_eq!(settings.interval_duration(), expected, "Failed for input: {}", input);
        }
    }

    #[test]
    fn test_interval_invalid_fallback() {
        let settings = ReplicationSettings {
            interval: "soon".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.interval_duration(), DEFAULT_REPLICATION_INTERVAL);
    }

    #[test]
    fn test_per_doctype_overrides() {
        let mut config = LinkConfig::for_testing(&["io.cozy.files", "io.cozy.contacts"]);
        config.doctypes_replication.insert(
            "io.cozy.files".into(),
            DoctypeReplication {
                interval: Some("5m".into()),
                strategy: ReplicationStrategy::Pull,
            },
        );

        assert_eq!(config.interval_for("io.cozy.files"), Duration::from_secs(300));
        assert_eq!(config.strategy_for("io.cozy.files"), ReplicationStrategy::Pull);
        assert_eq!(config.interval_for("io.cozy.contacts"), Duration::from_secs(30));
        assert_eq!(config.strategy_for("io.cozy.contacts"), ReplicationStrategy::Sync);
    }

    #[test]
    fn test_validate_rejects_empty_doctypes() {
        let config = LinkConfig::default();
        assert!(matches!(config.validate(), Err(LinkError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let config = LinkConfig::for_testing(&["io.cozy.files", "io.cozy.files"]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = LinkConfig::for_testing(&["io.cozy.files"]);
        config.replication.interval = "0s".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_override() {
        let mut config = LinkConfig::for_testing(&["io.cozy.files"]);
        config
            .doctypes_replication
            .insert("io.cozy.todos".into(), DoctypeReplication::default());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("io.cozy.todos"));
    }

    #[test]
    fn test_replication_settings_default() {
        let settings = ReplicationSettings::default();
        assert_eq!(settings.interval, "30s");
        assert!(!settings.initial_sync);
        assert!(settings.run_on_start);
        assert_eq!(settings.batch_size, 100);
    }

    #[test]
    fn test_strategy_directions() {
        assert!(ReplicationStrategy::Sync.pulls() && ReplicationStrategy::Sync.pushes());
        assert!(ReplicationStrategy::Pull.pulls() && !ReplicationStrategy::Pull.pushes());
        assert!(!ReplicationStrategy::Push.pulls() && ReplicationStrategy::Push.pushes());
    }

    #[test]
    fn test_config_from_json_with_defaults() {
        let json = r#"{
            "doctypes": ["io.cozy.files", "io.cozy.notes"],
            "remote_url": "https://bob.mycozy.cloud",
            "doctypes_replication": {
                "io.cozy.notes": { "strategy": "toRemote" }
            }
        }"#;
        let config: LinkConfig = serde_json::from_str(json).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.replication.interval, "30s");
        assert!(config.replication.run_on_start);
        assert_eq!(config.strategy_for("io.cozy.notes"), ReplicationStrategy::Push);
        assert_eq!(config.strategy_for("io.cozy.files"), ReplicationStrategy::Sync);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let mut config = LinkConfig::for_testing(&["io.cozy.files"]);
        config.replication.initial_sync = true;

        let json = serde_json::to_string(&config).unwrap();
        let parsed: LinkConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.doctypes, vec!["io.cozy.files".to_string()]);
        assert!(parsed.replication.initial_sync);
        assert_eq!(parsed.prefix.as_deref(), Some("test"));
    }
}
