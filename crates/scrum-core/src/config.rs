use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_project_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_project_name() -> String {
    "Untitled project".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file. Relative to the project root; defaults to
    /// `.scrum/scrum.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    7878
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Seconds a correlated request may wait for its response.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Child command that serves RPC on stdio. Empty means this binary's own
    /// `rpc` subcommand.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl() -> u64 {
    30
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
}

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            ..Default::default()
        }
    }

    /// Load `<root>/.scrum/config.yaml`, falling back to defaults when the
    /// file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn db_path(&self, root: &Path) -> PathBuf {
        paths::db_path(root, self.store.path.as_deref())
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.project.name.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "project.name is empty".to_string(),
            });
        }
        if self.rpc.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "rpc.timeout_secs must be greater than zero".to_string(),
            });
        } else if self.rpc.timeout_secs > 600 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "rpc.timeout_secs={} (>600 is unusual)",
                    self.rpc.timeout_secs
                ),
            });
        }
        if self.rpc.command.first().is_some_and(|c| c.trim().is_empty()) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "rpc.command has an empty program name".to_string(),
            });
        }
        if self.server.port == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "server.port is 0; an ephemeral port will be chosen".to_string(),
            });
        }

        warnings
    }
}
