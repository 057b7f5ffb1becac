//! Counter tool configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) is valid.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CounterError, CounterResult};

/// Default bpffs directory holding the pinned counter maps.
pub const DEFAULT_PIN_DIR: &str = "/sys/fs/bpf/tc/globals";

/// Default name of the pinned fixed counter map.
pub const DEFAULT_COUNTERS_MAP: &str = "cali_counters";

/// Default name of the pinned rule counter map.
pub const DEFAULT_RULE_COUNTERS_MAP: &str = "cali_rule_ctrs";

/// Configuration for locating and interpreting the counter maps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CountersConfig {
    /// Directory on bpffs where the maps are pinned.
    pub pin_dir: PathBuf,
    /// File name of the pinned fixed counter map.
    pub counters_map: String,
    /// File name of the pinned rule counter map.
    pub rule_counters_map: String,
    /// Number of per-context replicas. `None` means one per possible CPU.
    pub replicas: Option<usize>,
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self {
            pin_dir: PathBuf::from(DEFAULT_PIN_DIR),
            counters_map: DEFAULT_COUNTERS_MAP.to_string(),
            rule_counters_map: DEFAULT_RULE_COUNTERS_MAP.to_string(),
            replicas: None,
        }
    }
}

impl CountersConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml(text: &str) -> CounterResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| CounterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> CounterResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| CounterError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Checks the configuration for values that can never work.
    pub fn validate(&self) -> CounterResult<()> {
        if self.counters_map.is_empty() || self.rule_counters_map.is_empty() {
            return Err(CounterError::Config("map names cannot be empty".to_string()));
        }
        if self.replicas == Some(0) {
            return Err(CounterError::Config("replicas must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Path of the pinned fixed counter map.
    pub fn counters_map_path(&self) -> PathBuf {
        self.pin_dir.join(&self.counters_map)
    }

    /// Path of the pinned rule counter map.
    pub fn rule_counters_map_path(&self) -> PathBuf {
        self.pin_dir.join(&self.rule_counters_map)
    }

    /// Resolves the replica count, asking the host when not configured.
    pub fn resolve_replicas(&self) -> CounterResult<usize> {
        match self.replicas {
            Some(n) => Ok(n),
            None => possible_cpus(),
        }
    }
}

#[cfg(target_os = "linux")]
fn possible_cpus() -> CounterResult<usize> {
    aya::util::nr_cpus()
        .map_err(|(msg, e)| CounterError::Config(format!("{}: {}", msg, e)))
}

#[cfg(not(target_os = "linux"))]
fn possible_cpus() -> CounterResult<usize> {
    Err(CounterError::Config(
        "replicas must be configured on this platform".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CountersConfig::from_toml("").unwrap();
        assert_eq!(config, CountersConfig::default());
        assert_eq!(
            config.counters_map_path(),
            PathBuf::from("/sys/fs/bpf/tc/globals/cali_counters")
        );
    }

    #[test]
    fn test_partial_config() {
        let config = CountersConfig::from_toml(
            r#"
            pin_dir = "/run/bpf"
            replicas = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.pin_dir, PathBuf::from("/run/bpf"));
        assert_eq!(config.resolve_replicas().unwrap(), 4);
        assert_eq!(config.rule_counters_map, DEFAULT_RULE_COUNTERS_MAP);
    }

    #[test]
    fn test_invalid_values() {
        assert!(CountersConfig::from_toml("replicas = 0").is_err());
        // Record width is fixed by the shared layout.
        assert!(CountersConfig::from_toml("record_width = 12").is_err());
        assert!(CountersConfig::from_toml("counters_map = \"\"").is_err());
        assert!(CountersConfig::from_toml("unknown = 1").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rule_counters_map = \"rule_ctrs\"").unwrap();
        let config = CountersConfig::load(file.path()).unwrap();
        assert_eq!(config.rule_counters_map, "rule_ctrs");

        let missing = CountersConfig::load(Path::new("/nonexistent/counters.toml"));
        assert!(matches!(missing, Err(CounterError::Config(_))));
    }
}
