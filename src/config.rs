//! Configuration: `subtide.toml` (or `--config <path>`) plus environment.
//! Every field has a default, so a missing file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::orchestrator::RunSettings;
use crate::translate::context::ContextOptions;
use crate::translate::memory::DEFAULT_CAPACITY;
use crate::translate::prompt::QualitySettings;
use crate::translate::retry::RetryPolicy;
use crate::translate::{GenerationParams, TranslateError};

pub const DEFAULT_CONFIG_FILE: &str = "subtide.toml";
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub generation: GenerationParams,
    pub run: RunConfig,
    pub quality: QualitySettings,
    pub context: ContextOptions,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub key: Option<String>,
    pub endpoint: String,
    pub model: String,
    /// Hard ceiling on one remote call.
    pub timeout_secs: u64,
    /// Minimum spacing between two remote calls.
    pub min_interval_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: None,
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models".into(),
            model: "gemini-2.0-flash-exp".into(),
            timeout_secs: 30,
            min_interval_ms: 100,
        }
    }
}

impl ApiConfig {
    /// The API key, or a configuration error when none is set.
    pub fn api_key(&self) -> Result<&str, TranslateError> {
        match self.key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(TranslateError::Configuration(format!(
                "no API key: set api.key or {API_KEY_ENV}"
            ))),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub target_language: String,
    pub chunk_count: usize,
    pub max_retries: u32,
    pub inter_chunk_delay_ms: u64,
    pub network_delay_ms: u64,
    pub server_delay_ms: u64,
    pub quota_delay_ms: u64,
    pub quota_cap_ms: u64,
    /// Persian clean-up of received translations.
    pub post_process: bool,
    /// Ask the model to separate translations with this token.
    pub separator: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_language: "fa".into(),
            chunk_count: 3,
            max_retries: 2,
            inter_chunk_delay_ms: 1000,
            network_delay_ms: 3000,
            server_delay_ms: 2000,
            quota_delay_ms: 5000,
            quota_cap_ms: 30_000,
            post_process: true,
            separator: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub db_path: PathBuf,
    pub capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("subtide_memory.db"),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl Config {
    /// Load from `path`, or from `subtide.toml` in the working directory when
    /// present, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, TranslateError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_file(default)?
                } else {
                    debug!("no config file, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env_key(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, TranslateError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TranslateError::Configuration(format!("read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&raw)
            .map_err(|e| TranslateError::Configuration(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "config_loaded");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// A non-blank environment key replaces the file's key.
    pub fn apply_env_key(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.api.key = Some(key);
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.run.max_retries,
            network_delay: Duration::from_millis(self.run.network_delay_ms),
            server_delay: Duration::from_millis(self.run.server_delay_ms),
            quota_delay: Duration::from_millis(self.run.quota_delay_ms),
            quota_cap: Duration::from_millis(self.run.quota_cap_ms),
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            target_language: self.run.target_language.clone(),
            chunk_count: self.run.chunk_count,
            inter_chunk_delay: Duration::from_millis(self.run.inter_chunk_delay_ms),
            retry: self.retry_policy(),
            params: self.generation.clamped(),
            quality: self.quality.clone(),
            context: self.context.clone(),
            post_process: self.run.post_process,
            separator: self.run.separator.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::context::ContextMode;
    use crate::translate::prompt::Genre;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.run.chunk_count, 3);
        assert_eq!(config.run.max_retries, 2);
        assert_eq!(config.generation, GenerationParams::default());
        assert_eq!(config.memory.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            [api]
            model = "gemini-1.5-pro"

            [generation]
            temperature = 3.0
            top_k = 100

            [run]
            chunk_count = 5
            inter_chunk_delay_ms = 0

            [quality]
            genre = "comedy"
            quality_check = true

            [context]
            mode = "full"
            "#,
        )
        .unwrap();
        assert_eq!(config.api.model, "gemini-1.5-pro");
        assert_eq!(config.quality.genre, Genre::Comedy);
        assert!(config.quality.quality_check);
        assert_eq!(config.context.mode, ContextMode::Full);

        let settings = config.run_settings();
        assert_eq!(settings.chunk_count, 5);
        assert_eq!(settings.inter_chunk_delay, Duration::ZERO);
        assert_eq!(settings.params.temperature, 1.0);
        assert_eq!(settings.params.top_k, 40);
        assert_eq!(settings.params.top_p, 0.95);
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let mut config = Config::default();
        assert!(matches!(config.api.api_key(), Err(TranslateError::Configuration(_))));

        config.api.key = Some("   ".into());
        assert!(config.api.api_key().is_err());

        config.apply_env_key(Some(String::new()));
        assert!(config.api.api_key().is_err());

        config.apply_env_key(Some("env-key".into()));
        assert_eq!(config.api.api_key().unwrap(), "env-key");
    }

    #[test]
    fn env_key_wins_over_file() {
        let mut config = Config::from_toml("[api]\nkey = \"file-key\"").unwrap();
        assert_eq!(config.api.api_key().unwrap(), "file-key");
        config.apply_env_key(Some("env-key".into()));
        assert_eq!(config.api.api_key().unwrap(), "env-key");
        config.apply_env_key(None);
        assert_eq!(config.api.api_key().unwrap(), "env-key");
    }

    #[test]
    fn explicit_path_is_read_and_errors_surface() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[run]\nmax_retries = 4").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.run.max_retries, 4);

        let missing = Config::from_file(Path::new("/nonexistent/subtide.toml"));
        assert!(matches!(missing, Err(TranslateError::Configuration(_))));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[run]\nchunk_count = \"many\"").unwrap();
        assert!(matches!(
            Config::from_file(bad.path()),
            Err(TranslateError::Configuration(_))
        ));
    }
}
