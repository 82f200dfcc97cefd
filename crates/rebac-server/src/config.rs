use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rebac_core::engine::EngineConfig;
use rebac_core::policy::PolicyLimits;
use rebac_storage::QueuePolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfigValues,
    pub cache: CacheConfig,
    pub index: IndexConfig,
    pub normalizer: NormalizerConfig,
    pub policy: PolicyConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    pub url: String,
    pub max_connections: u32,
    pub schema: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfigValues {
    pub max_depth: usize,
    pub max_fanout: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Zero disables the periodic purge of expired keys.
    pub purge_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub visibility_timeout_secs: u64,
    /// Zero disables the periodic sweep.
    pub reconcile_interval_secs: u64,
    pub reconcile_page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub path: Option<PathBuf>,
    pub max_resource_types: usize,
    pub max_relations_per_type: usize,
    pub max_actions_per_type: usize,
    pub max_terms_per_action: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Postgres,
            url: "postgresql://localhost:5432/rebac".to_string(),
            max_connections: 10,
            schema: "rebac".to_string(),
        }
    }
}

impl Default for EngineConfigValues {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            max_depth: defaults.max_depth,
            max_fanout: defaults.max_fanout,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            purge_interval_secs: 60,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 200,
            max_attempts: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 60_000,
            visibility_timeout_secs: 30,
            reconcile_interval_secs: 600,
            reconcile_page_size: 500,
        }
    }
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            page_size: rebac_storage::normalize::DEFAULT_PAGE_SIZE,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let limits = PolicyLimits::default();
        Self {
            path: None,
            max_resource_types: limits.max_resource_types,
            max_relations_per_type: limits.max_relations_per_type,
            max_actions_per_type: limits.max_actions_per_type,
            max_terms_per_action: limits.max_terms_per_action,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<AppConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REBAC_DATABASE_BACKEND") {
            match v.as_str() {
                "postgres" => self.database.backend = StorageBackend::Postgres,
                "memory" => self.database.backend = StorageBackend::Memory,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("REBAC_DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("REBAC_DATABASE_MAX_CONNECTIONS")
            && let Ok(n) = v.parse()
        {
            self.database.max_connections = n;
        }
        if let Ok(v) = std::env::var("REBAC_DATABASE_SCHEMA") {
            self.database.schema = v;
        }
        if let Ok(v) = std::env::var("REBAC_ENGINE_MAX_DEPTH")
            && let Ok(n) = v.parse()
        {
            self.engine.max_depth = n;
        }
        if let Ok(v) = std::env::var("REBAC_CACHE_ENABLED")
            && let Ok(b) = v.parse()
        {
            self.cache.enabled = b;
        }
        if let Ok(v) = std::env::var("REBAC_CACHE_TTL_SECS")
            && let Ok(n) = v.parse()
        {
            self.cache.ttl_secs = n;
        }
        if let Ok(v) = std::env::var("REBAC_CACHE_PURGE_INTERVAL_SECS")
            && let Ok(n) = v.parse()
        {
            self.cache.purge_interval_secs = n;
        }
        if let Ok(v) = std::env::var("REBAC_INDEX_WORKERS")
            && let Ok(n) = v.parse()
        {
            self.index.workers = n;
        }
        if let Ok(v) = std::env::var("REBAC_POLICY_PATH") {
            self.policy.path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("REBAC_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = std::env::var("REBAC_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("engine.max_depth", self.engine.max_depth == 0),
            ("engine.max_fanout", self.engine.max_fanout == 0),
            ("database.max_connections", self.database.max_connections == 0),
            ("cache.ttl_secs", self.cache.enabled && self.cache.ttl_secs == 0),
            ("index.workers", self.index.workers == 0),
            ("index.max_attempts", self.index.max_attempts == 0),
            ("index.reconcile_page_size", self.index.reconcile_page_size == 0),
            ("normalizer.page_size", self.normalizer.page_size == 0),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::Validation(format!("{name} must be non-zero")));
        }
        if self.index.base_backoff_ms > self.index.max_backoff_ms {
            return Err(ConfigError::Validation(
                "index.base_backoff_ms must not exceed index.max_backoff_ms".to_string(),
            ));
        }
        if self.database.backend == StorageBackend::Postgres {
            rebac_storage::postgres::migrations::validate_schema_name(&self.database.schema)
                .map_err(|e| ConfigError::Validation(format!("database.schema: {e}")))?;
        }
        Ok(())
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_depth: self.engine.max_depth,
            max_fanout: self.engine.max_fanout,
        }
    }

    pub fn to_policy_limits(&self) -> PolicyLimits {
        PolicyLimits {
            max_resource_types: self.policy.max_resource_types,
            max_relations_per_type: self.policy.max_relations_per_type,
            max_actions_per_type: self.policy.max_actions_per_type,
            max_terms_per_action: self.policy.max_terms_per_action,
        }
    }

    pub fn to_queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            max_attempts: self.index.max_attempts,
            base_backoff: Duration::from_millis(self.index.base_backoff_ms),
            max_backoff: Duration::from_millis(self.index.max_backoff_ms),
            visibility_timeout: Duration::from_secs(self.index.visibility_timeout_secs),
        }
    }

    /// `None` when the decision cache is disabled.
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache
            .enabled
            .then(|| Duration::from_secs(self.cache.ttl_secs))
    }

    /// `None` when the cache is disabled or purging is turned off.
    pub fn cache_purge_interval(&self) -> Option<Duration> {
        (self.cache.enabled && self.cache.purge_interval_secs > 0)
            .then(|| Duration::from_secs(self.cache.purge_interval_secs))
    }

    /// `None` when the periodic sweep is disabled.
    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.index.reconcile_interval_secs > 0)
            .then(|| Duration::from_secs(self.index.reconcile_interval_secs))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}
