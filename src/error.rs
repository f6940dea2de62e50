use thiserror::Error;

use crate::domain::SkippedCandidate;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Missing descriptor attributes: {0}")]
    MissingDescriptor(SkippedCandidate),

    #[error("Catalog resolution failed for jurisdiction '{jurisdiction}': {reason}")]
    CatalogResolution { jurisdiction: String, reason: String },

    #[error("No catalog match for quote {quote_id} asset {asset_id} in version {version_id}")]
    NoMatchFound {
        quote_id: String,
        asset_id: String,
        version_id: String,
    },

    #[error("Ambiguous catalog match for quote {quote_id} asset {asset_id}: {matches} candidates")]
    DuplicateMatch {
        quote_id: String,
        asset_id: String,
        matches: usize,
    },

    #[error("Write to {target} failed: {message}")]
    WriteFailure { target: String, message: String },

    #[error("Stage gate closed: {0}")]
    StageGateFailure(String),

    #[error("Stage '{stage}' exceeded its {secs}s deadline")]
    StageTimeout { stage: &'static str, secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Wraps any storage-level error as a write failure against `target`.
    pub fn write_failure(target: impl Into<String>, source: &ReconcileError) -> Self {
        Self::WriteFailure {
            target: target.into(),
            message: source.to_string(),
        }
    }

    /// Per-candidate errors are reported and skipped; everything else aborts its stage.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MissingDescriptor(_) | Self::NoMatchFound { .. } | Self::DuplicateMatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
