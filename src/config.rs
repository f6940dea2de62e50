use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::domain::AttributeCode;
use crate::error::{ReconcileError, Result};

/// What the matcher does when a candidate resolves to more than one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateMatchPolicy {
    /// Stage one pair per match.
    EmitAll,
    /// Stage nothing for the candidate and report the ambiguity.
    Reject,
    /// Stage the first match in catalog order.
    First,
}

impl Default for DuplicateMatchPolicy {
    fn default() -> Self {
        DuplicateMatchPolicy::Reject
    }
}

impl std::str::FromStr for DuplicateMatchPolicy {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "emit_all" => Ok(Self::EmitAll),
            "reject" => Ok(Self::Reject),
            "first" => Ok(Self::First),
            other => Err(ReconcileError::Config(format!(
                "unknown duplicate policy '{other}' (expected emit_all, reject or first)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 27017,
            database: "cache".to_string(),
            data_dir: PathBuf::from(constants::DEFAULT_DATA_DIR),
        }
    }
}

impl StoreConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.database))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub store: StoreConfig,
    pub jurisdiction: String,
    pub source_system_marker: AttributeCode,
    pub catalog_version_override: Option<String>,
    pub duplicate_policy: DuplicateMatchPolicy,
    pub stage_timeout_secs: u64,
    pub log_dir: PathBuf,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            jurisdiction: constants::DEFAULT_JURISDICTION.to_string(),
            source_system_marker: AttributeCode::Number(constants::DEFAULT_SOURCE_SYSTEM_MARKER),
            catalog_version_override: None,
            duplicate_policy: DuplicateMatchPolicy::default(),
            stage_timeout_secs: constants::DEFAULT_STAGE_TIMEOUT_SECS,
            log_dir: PathBuf::from(constants::DEFAULT_LOG_DIR),
        }
    }
}

impl ReconcileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ReconcileError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ReconcileConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `RECON_*` environment variables on top of the loaded values.
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Ok(host) = std::env::var("RECON_STORE_HOST") {
            self.store.host = host;
        }
        if let Ok(port) = std::env::var("RECON_STORE_PORT") {
            self.store.port = port
                .parse()
                .map_err(|_| ReconcileError::Config(format!("RECON_STORE_PORT is not a port: {port}")))?;
        }
        if let Ok(database) = std::env::var("RECON_STORE_DATABASE") {
            self.store.database = database;
        }
        if let Ok(dir) = std::env::var("RECON_DATA_DIR") {
            self.store.data_dir = PathBuf::from(dir);
        }
        if let Ok(jurisdiction) = std::env::var("RECON_JURISDICTION") {
            self.jurisdiction = jurisdiction;
        }
        if let Ok(marker) = std::env::var("RECON_SOURCE_SYSTEM") {
            self.source_system_marker = match marker.parse::<i64>() {
                Ok(n) => AttributeCode::Number(n),
                Err(_) => AttributeCode::Text(marker),
            };
        }
        if let Ok(version) = std::env::var("RECON_CATALOG_VERSION") {
            self.catalog_version_override = Some(version).filter(|v| !v.is_empty());
        }
        if let Ok(policy) = std::env::var("RECON_DUPLICATE_POLICY") {
            self.duplicate_policy = policy.parse()?;
        }
        if let Ok(secs) = std::env::var("RECON_STAGE_TIMEOUT_SECS") {
            self.stage_timeout_secs = secs
                .parse()
                .map_err(|_| ReconcileError::Config(format!("RECON_STAGE_TIMEOUT_SECS is not a number: {secs}")))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jurisdiction.trim().is_empty() {
            return Err(ReconcileError::Config("jurisdiction must not be empty".into()));
        }
        if self.store.database.trim().is_empty() {
            return Err(ReconcileError::Config("store.database must not be empty".into()));
        }
        if self.store.port == 0 {
            return Err(ReconcileError::Config("store.port must be greater than zero".into()));
        }
        if self.stage_timeout_secs == 0 {
            return Err(ReconcileError::Config("stage_timeout_secs must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}
