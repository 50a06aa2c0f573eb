//! Engine configuration.
//!
//! Loaded from a TOML file with every field optional, then overridden
//! from the environment. A broken file never stops the engine: it logs
//! and falls back to defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::ModelChoice;
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable overriding the CLI executable.
pub const ENV_CLI_PATH: &str = "TETHER_CLI_PATH";
/// Environment variable overriding the model.
pub const ENV_MODEL: &str = "TETHER_MODEL";
/// Environment variable overriding the permission toggle.
pub const ENV_SKIP_PERMISSIONS: &str = "TETHER_SKIP_PERMISSIONS";
/// Environment variable overriding the state directory.
pub const ENV_STATE_DIR: &str = "TETHER_STATE_DIR";

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// How hard the model is asked to think before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThinkingIntensity {
    #[default]
    Think,
    ThinkHard,
    ThinkHarder,
    Ultrathink,
}

impl ThinkingIntensity {
    /// The directive phrase prefixed to the message.
    pub fn phrase(&self) -> &'static str {
        match self {
            Self::Think => "THINK",
            Self::ThinkHard => "THINK HARD",
            Self::ThinkHarder => "THINK HARDER",
            Self::Ultrathink => "ULTRATHINK",
        }
    }
}

/// Command line of the approval hook server the CLI launches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalServer {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ApprovalServer {
    fn default() -> Self {
        Self {
            command: "tether-approval".to_string(),
            args: Vec::new(),
        }
    }
}

/// Everything the session controller and permission broker need to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// CLI executable (name on PATH or absolute path)
    pub cli_path: String,

    /// Directory the CLI runs in; the current directory when unset
    pub working_dir: Option<PathBuf>,

    pub model: ModelChoice,

    pub thinking_intensity: ThinkingIntensity,

    /// Pass `--dangerously-skip-permissions` instead of the broker hookup
    pub skip_permissions: bool,

    pub approval_server: ApprovalServer,

    /// Root for per-session permission directories
    pub state_dir: PathBuf,

    /// Always-allow store location
    pub permissions_file: PathBuf,

    /// Grace period between SIGTERM and SIGKILL on stop
    pub stop_grace_ms: u64,

    /// Upper bound on the pre-turn backup
    pub backup_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cli_path: "claude".to_string(),
            working_dir: None,
            model: ModelChoice::Default,
            thinking_intensity: ThinkingIntensity::Think,
            skip_permissions: false,
            approval_server: ApprovalServer::default(),
            state_dir: default_state_dir(),
            permissions_file: config_dir().join("permissions.json"),
            stop_grace_ms: 2_000,
            backup_timeout_ms: 10_000,
        }
    }
}

impl EngineConfig {
    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads a config file. A missing file is not an error.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Loads the file and applies environment overrides, degrading to
    /// defaults when the file is unusable.
    pub fn load(path: &Path) -> Self {
        let config = Self::from_file(path).unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unusable config file");
            Self::default()
        });
        config.with_env_overrides(|key| env::var(key).ok())
    }

    /// Applies overrides from a variable lookup (injectable for tests).
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(cli) = lookup(ENV_CLI_PATH).filter(|v| !v.is_empty()) {
            self.cli_path = cli;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.model = ModelChoice::from_name(&model);
        }
        if let Some(flag) = lookup(ENV_SKIP_PERMISSIONS) {
            self.skip_permissions = matches!(flag.trim(), "1" | "true" | "yes");
        }
        if let Some(dir) = lookup(ENV_STATE_DIR).filter(|v| !v.is_empty()) {
            self.state_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn backup_timeout(&self) -> Duration {
        Duration::from_millis(self.backup_timeout_ms)
    }

    /// Returns true if switching to `other` must start a fresh session.
    pub fn requires_new_session(&self, other: &EngineConfig) -> bool {
        self.skip_permissions != other.skip_permissions || self.model != other.model
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tether")
}

fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tether")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.cli_path, "claude");
        assert_eq!(config.model, ModelChoice::Default);
        assert_eq!(config.thinking_intensity, ThinkingIntensity::Think);
        assert!(!config.skip_permissions);
        assert_eq!(config.stop_grace(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml(
            r#"
            model = "opus"
            thinking_intensity = "think-harder"
            skip_permissions = true

            [approval_server]
            command = "node"
            args = ["/opt/approval/server.js"]
            "#,
            Path::new("config.toml"),
        )
        .unwrap();

        assert_eq!(config.model, ModelChoice::Opus);
        assert_eq!(config.thinking_intensity.phrase(), "THINK HARDER");
        assert!(config.skip_permissions);
        assert_eq!(config.approval_server.args, vec!["/opt/approval/server.js"]);
        assert_eq!(config.cli_path, "claude");
    }

    #[test]
    fn test_malformed_toml_is_error() {
        let err = EngineConfig::from_toml("model = [", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_degrades_on_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "skip_permissions = \"maybe\"").unwrap();

        let config = EngineConfig::from_file(&path);
        assert!(config.is_err());
        // load() never fails
        let _ = EngineConfig::load(&path);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_CLI_PATH, "/usr/local/bin/claude"),
            (ENV_MODEL, "sonnet"),
            (ENV_SKIP_PERMISSIONS, "1"),
        ]);
        let config = EngineConfig::default()
            .with_env_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.cli_path, "/usr/local/bin/claude");
        assert_eq!(config.model, ModelChoice::Sonnet);
        assert!(config.skip_permissions);
    }

    #[test]
    fn test_requires_new_session() {
        let base = EngineConfig::default();
        let mut yolo = base.clone();
        yolo.skip_permissions = true;
        assert!(base.requires_new_session(&yolo));

        let mut thinking = base.clone();
        thinking.thinking_intensity = ThinkingIntensity::Ultrathink;
        assert!(!base.requires_new_session(&thinking));
    }
}
