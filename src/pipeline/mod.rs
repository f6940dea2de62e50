// Reconciliation pipeline: extraction, catalog resolution, matching and staging, application

pub mod applier;
pub mod extractor;
pub mod matcher;
pub mod orchestrator;
pub mod resolver;
pub mod staging;

// Re-export the stage entry points
pub use applier::{ApplyOutcome, ApplySummary, Applier};
pub use extractor::{Extraction, Extractor};
pub use matcher::{MatchOutcome, Matcher};
pub use orchestrator::{ReconciliationPipeline, RunOptions, RunReport};
pub use resolver::CatalogResolver;
pub use staging::StagingWriter;
