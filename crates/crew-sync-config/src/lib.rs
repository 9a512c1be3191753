//! Configuration for the crew-sync engine.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables, so a device can run the same binary against a
//! different backend without editing files.
//!
//! ```toml
//! backend_url = "https://project.example.co"
//! anon_key = "public-anon-key"
//! retry_interval_secs = 300
//! namespace_prefix = "crew"
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the config file when no explicit path is given.
pub const CONFIG_PATH_ENV: &str = "CREW_SYNC_CONFIG";
/// Environment override for [`SyncConfig::backend_url`].
pub const BACKEND_URL_ENV: &str = "CREW_SYNC_URL";
/// Environment override for [`SyncConfig::anon_key`].
pub const ANON_KEY_ENV: &str = "CREW_SYNC_ANON_KEY";
/// Environment override for [`SyncConfig::queue_dir`].
pub const QUEUE_DIR_ENV: &str = "CREW_SYNC_QUEUE_DIR";

const DEFAULT_RETRY_INTERVAL_SECS: u64 = 300;
const DEFAULT_NAMESPACE_PREFIX: &str = "crew";

/// Error types for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no platform data directory available; set {QUEUE_DIR_ENV}")]
    NoDataDir,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Settings for the sync engine and its operator tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the hosted relational backend
    pub backend_url: Option<String>,
    /// Public API key sent with every request
    pub anon_key: Option<String>,
    /// Directory holding the persisted mutation queues
    pub queue_dir: Option<PathBuf>,
    /// How often the coordinator retries pending writes while online (0 disables)
    pub retry_interval_secs: u64,
    /// Per-request timeout; `None` leaves requests unbounded
    pub request_timeout_secs: Option<u64>,
    /// Prefix for persisted queue keys
    pub namespace_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            anon_key: None,
            queue_dir: None,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            request_timeout_secs: None,
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration.
    ///
    /// Prefers the explicit path, then the `CREW_SYNC_CONFIG` variable, and
    /// falls back to defaults when neither names a file. Environment overrides
    /// are applied last. An explicitly named file that does not exist is an
    /// error rather than a silent fallback.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let chosen = path
            .map(Path::to_path_buf)
            .or_else(|| non_blank_env(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match chosen {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("No config file given, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a TOML config file without applying environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay non-blank environment variables on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = non_blank_env(BACKEND_URL_ENV) {
            self.backend_url = Some(url);
        }
        if let Some(key) = non_blank_env(ANON_KEY_ENV) {
            self.anon_key = Some(key);
        }
        if let Some(dir) = non_blank_env(QUEUE_DIR_ENV) {
            self.queue_dir = Some(PathBuf::from(dir));
        }
    }

    /// Both the backend URL and key are present. Without them the engine
    /// runs in offline mode and every write is queued.
    pub fn is_backend_configured(&self) -> bool {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
        present(&self.backend_url) && present(&self.anon_key)
    }

    /// Directory for the local queue store, defaulting to the platform data dir.
    pub fn resolved_queue_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.queue_dir {
            return Ok(dir.clone());
        }

        ProjectDirs::from("io", "crew-sync", "crew-sync")
            .map(|dirs| dirs.data_dir().join("queues"))
            .ok_or(ConfigError::NoDataDir)
    }

    /// Persisted key of the mutation queue for one entity family,
    /// e.g. `crew-clip-sync-queue`.
    pub fn queue_key(&self, family: &str) -> String {
        format!("{}-{}-sync-queue", self.namespace_prefix, family)
    }
}

fn non_blank_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn clear_env() {
        for name in [CONFIG_PATH_ENV, BACKEND_URL_ENV, ANON_KEY_ENV, QUEUE_DIR_ENV] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_load_defaults_without_file() {
        clear_env();
        let config = SyncConfig::load(None).unwrap();

        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.retry_interval_secs, 300);
        assert!(!config.is_backend_configured());
    }

    #[test]
    #[serial]
    fn test_load_from_file_with_partial_fields() {
        clear_env();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "backend_url = \"https://db.example.test\"\nanon_key = \"anon\"\nretry_interval_secs = 30"
        )
        .unwrap();

        let config = SyncConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.backend_url.as_deref(), Some("https://db.example.test"));
        assert_eq!(config.retry_interval_secs, 30);
        assert_eq!(config.namespace_prefix, "crew");
        assert!(config.is_backend_configured());
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_values() {
        clear_env();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "backend_url = \"https://file.example.test\"").unwrap();

        std::env::set_var(BACKEND_URL_ENV, "https://env.example.test");
        std::env::set_var(ANON_KEY_ENV, "   ");
        let config = SyncConfig::load(Some(file.path())).unwrap();
        clear_env();

        assert_eq!(config.backend_url.as_deref(), Some("https://env.example.test"));
        assert_eq!(config.anon_key, None);
    }

    #[test]
    #[serial]
    fn test_config_path_from_env() {
        clear_env();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "namespace_prefix = \"asw\"").unwrap();

        std::env::set_var(CONFIG_PATH_ENV, file.path());
        let config = SyncConfig::load(None).unwrap();
        clear_env();

        assert_eq!(config.namespace_prefix, "asw");
        assert_eq!(config.queue_key("notes"), "asw-notes-sync-queue");
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_error() {
        clear_env();
        let result = SyncConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "retry_interval_secs = \"soon\"").unwrap();

        let err = SyncConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_explicit_queue_dir_wins() {
        let config = SyncConfig {
            queue_dir: Some(PathBuf::from("/tmp/crew-queues")),
            ..SyncConfig::default()
        };
        assert_eq!(
            config.resolved_queue_dir().unwrap(),
            PathBuf::from("/tmp/crew-queues")
        );
    }
}
