// Collection names in the document store

pub const QUOTES: &str = "Quotes";

// Staging collections
pub const NEW_QUOTES: &str = "NewQuotes";
pub const UPDATE_LOG: &str = "UQuotesLog";

// Pipeline defaults
pub const DEFAULT_JURISDICTION: &str = "WI";
pub const DEFAULT_SOURCE_SYSTEM_MARKER: i64 = 1;
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_DATA_DIR: &str = "data";

// Stage names used in logs, metrics and timeout errors
pub const STAGE_EXTRACT: &str = "extract";
pub const STAGE_RESOLVE: &str = "resolve";
pub const STAGE_MATCH: &str = "match";
pub const STAGE_APPLY: &str = "apply";
