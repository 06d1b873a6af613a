//! drydock.toml cluster configuration parser.
//!
//! ```toml
//! listen_addr = "0.0.0.0:8080"
//!
//! [[engines]]
//! id = "engine-1"
//! addr = "tcp://10.0.0.11:2375"
//! cpus = 4.0
//! memory = 8192.0
//! labels = ["ssd", "zone=a"]
//!
//! [[schedulers]]
//! name = "service"
//! strategies = ["label", "unique"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;

use crate::types::EngineInfo;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Built-in strategy kinds a configured scheduler can chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Label,
    Unique,
}

/// A named scheduler: the strategies it chains, all of which must agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub name: String,
    pub strategies: Vec<StrategyKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub engines: Vec<EngineInfo>,
    #[serde(default = "default_schedulers")]
    pub schedulers: Vec<SchedulerConfig>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_schedulers() -> Vec<SchedulerConfig> {
    vec![SchedulerConfig {
        name: "service".to_string(),
        strategies: vec![StrategyKind::Label],
    }]
}

impl ClusterConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ClusterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engines.is_empty() {
            return Err(ConfigError::Invalid("at least one engine is required".to_string()));
        }

        let mut ids = HashSet::new();
        for engine in &self.engines {
            if engine.id.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "engine at {} has an empty id",
                    engine.addr
                )));
            }
            if !ids.insert(engine.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate engine id: {}", engine.id)));
            }
            let capacity = engine.capacity();
            if !(capacity.cpus > 0.0 && capacity.memory > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "engine {} must have positive cpus and memory",
                    engine.id
                )));
            }
        }

        let mut names = HashSet::new();
        for scheduler in &self.schedulers {
            if scheduler.name.is_empty() {
                return Err(ConfigError::Invalid("scheduler has an empty name".to_string()));
            }
            if scheduler.strategies.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "scheduler {} lists no strategies",
                    scheduler.name
                )));
            }
            if !names.insert(scheduler.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate scheduler name: {}",
                    scheduler.name
                )));
            }
        }

        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_ENGINES: &str = r#"
listen_addr = "127.0.0.1:9000"

[[engines]]
id = "e1"
addr = "tcp://10.0.0.1:2375"
cpus = 4.0
memory = 8192.0
labels = ["ssd"]

[[engines]]
id = "e2"
addr = "tcp://10.0.0.2:2375"
cpus = 2.0
memory = 4096.0

[[schedulers]]
name = "service"
strategies = ["label", "unique"]
"#;

    #[test]
    fn parses_engines_and_schedulers() {
        let config = ClusterConfig::parse(TWO_ENGINES).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.engines.len(), 2);
        assert!(config.engines[0].labels.contains("ssd"));
        assert!(config.engines[1].labels.is_empty());
        assert_eq!(
            config.schedulers[0].strategies,
            vec![StrategyKind::Label, StrategyKind::Unique]
        );
    }

    #[test]
    fn defaults_to_label_service_scheduler() {
        let config = ClusterConfig::parse(
            r#"
[[engines]]
id = "e1"
addr = "unix:///var/run/docker.sock"
cpus = 1.0
memory = 512.0
"#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.schedulers.len(), 1);
        assert_eq!(config.schedulers[0].name, "service");
    }

    #[test]
    fn rejects_duplicate_engine_ids() {
        let doc = r#"
[[engines]]
id = "e1"
addr = "a"
cpus = 1.0
memory = 1.0

[[engines]]
id = "e1"
addr = "b"
cpus = 1.0
memory = 1.0
"#;
        let err = ClusterConfig::parse(doc).unwrap_err();
        assert!(err.to_string().contains("duplicate engine id"));
    }

    #[test]
    fn rejects_empty_engine_list() {
        let err = ClusterConfig::parse("engines = []").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_capacity() {
        let doc = r#"
[[engines]]
id = "e1"
addr = "a"
cpus = 0.0
memory = 1024.0
"#;
        assert!(matches!(ClusterConfig::parse(doc), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_scheduler_without_strategies() {
        let doc = r#"
[[engines]]
id = "e1"
addr = "a"
cpus = 1.0
memory = 1.0

[[schedulers]]
name = "service"
strategies = []
"#;
        let err = ClusterConfig::parse(doc).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("service")));
    }

    #[test]
    fn rejects_unnamed_scheduler() {
        let doc = r#"
[[engines]]
id = "e1"
addr = "a"
cpus = 1.0
memory = 1.0

[[schedulers]]
name = ""
strategies = ["label"]
"#;
        assert!(matches!(ClusterConfig::parse(doc), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_unknown_strategy_kind() {
        let doc = r#"
[[engines]]
id = "e1"
addr = "a"
cpus = 1.0
memory = 1.0

[[schedulers]]
name = "x"
strategies = ["random"]
"#;
        assert!(matches!(ClusterConfig::parse(doc), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drydock.toml");
        std::fs::write(&path, TWO_ENGINES).unwrap();

        let config = ClusterConfig::from_file(&path).unwrap();
        assert_eq!(config.engines[1].id, "e2");

        let missing = ClusterConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = ClusterConfig::parse(TWO_ENGINES).unwrap();
        let rendered = config.to_toml_string().unwrap();
        let back = ClusterConfig::parse(&rendered).unwrap();
        assert_eq!(back, config);
    }
}
