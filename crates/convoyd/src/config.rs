//! convoyd.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use convoy_scheduler::AssemblerOpts;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvoydConfig {
    /// Listen address, e.g. "0.0.0.0:7171".
    pub listen: Option<String>,
    /// Path of the GDM state database.
    pub state_path: Option<PathBuf>,
    /// Path of the image-name cache database.
    pub cache_path: Option<PathBuf>,
    /// Base URL of the build metadata service answering label queries.
    pub registry_api_url: Option<String>,
    pub scheduler: Option<SchedulerConfig>,
    /// "warn" (default) or "propagate".
    pub delete_policy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub reqs_per_server: Option<usize>,
    pub max_assemblers: Option<usize>,
    pub retry_limit: Option<u32>,
}

impl ConvoydConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConvoydConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn listen(&self) -> &str {
        self.listen.as_deref().unwrap_or("0.0.0.0:7171")
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("convoy-state.redb"))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("convoy-cache.redb"))
    }

    pub fn assembler_opts(&self) -> AssemblerOpts {
        let mut opts = AssemblerOpts::default();
        if let Some(scheduler) = &self.scheduler {
            if let Some(n) = scheduler.reqs_per_server {
                opts.reqs_per_server = n;
            }
            if let Some(n) = scheduler.max_assemblers {
                opts.max_assemblers = n;
            }
            if let Some(n) = scheduler.retry_limit {
                opts.retry_limit = n;
            }
        }
        opts
    }

    pub fn propagate_deletes(&self) -> bool {
        self.delete_policy.as_deref() == Some("propagate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config: ConvoydConfig = toml::from_str("").unwrap();
        assert_eq!(config.listen(), "0.0.0.0:7171");
        assert!(!config.propagate_deletes());
        let opts = config.assembler_opts();
        assert_eq!(opts.reqs_per_server, 10);
        assert_eq!(opts.max_assemblers, 100);
    }

    #[test]
    fn parses_full_config() {
        let raw = r#"
listen = "127.0.0.1:9999"
state_path = "/var/lib/convoy/state.redb"
registry_api_url = "http://build-meta.internal"
delete_policy = "propagate"

[scheduler]
reqs_per_server = 4
retry_limit = 5
"#;
        let config: ConvoydConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.listen(), "127.0.0.1:9999");
        assert!(config.propagate_deletes());
        let opts = config.assembler_opts();
        assert_eq!(opts.reqs_per_server, 4);
        assert_eq!(opts.retry_limit, 5);
        assert_eq!(opts.max_assemblers, 100);
    }
}
