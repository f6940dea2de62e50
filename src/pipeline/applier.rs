use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::app::ports::RepositoryGateway;
use crate::domain::{NewQuoteRecord, RunId, StagingRecord, StagingStore};
use crate::error::{ReconcileError, Result};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplySummary {
    pub staged: usize,
    /// Updates that found their quote/legacy quote/asset.
    pub matched: usize,
    /// Matched updates that changed at least one field.
    pub modified: usize,
    /// Staged records whose target no longer exists. Never inserted.
    pub missing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(ApplySummary),
    /// Nothing staged for the run.
    NoWork,
    /// Stage 2 did not succeed; nothing was written.
    StageGateFailure,
}

/// Stage 3: writes staged canonical ids back to the quote store.
pub struct Applier {
    gateway: Arc<dyn RepositoryGateway>,
}

impl Applier {
    pub fn new(gateway: Arc<dyn RepositoryGateway>) -> Self {
        Self { gateway }
    }

    /// Applies a run staged earlier, gated on the match-stage status it recorded.
    ///
    /// Runs with no recorded status are treated as failed.
    #[instrument(skip(self, run_id), fields(run_id = %run_id))]
    pub async fn apply_recorded(&self, run_id: RunId) -> Result<ApplyOutcome> {
        let match_success = match self.gateway.find_run_status(run_id).await? {
            Some(status) => status.match_success,
            None => {
                warn!("No match stage recorded for this run");
                false
            }
        };
        self.apply(run_id, match_success).await
    }

    #[instrument(skip(self, run_id), fields(run_id = %run_id))]
    pub async fn apply(&self, run_id: RunId, stage2_success: bool) -> Result<ApplyOutcome> {
        if !stage2_success {
            error!("Match stage failed; refusing to apply staged values");
            return Ok(ApplyOutcome::StageGateFailure);
        }

        let staged: Vec<NewQuoteRecord> = self
            .gateway
            .scan_staging(StagingStore::NewValues, Some(run_id))
            .await?
            .into_iter()
            .filter_map(|r| match r {
                StagingRecord::NewValues(record) => Some(record),
                StagingRecord::AuditLog(_) => None,
            })
            .collect();

        if staged.is_empty() {
            info!("No staged values for this run");
            return Ok(ApplyOutcome::NoWork);
        }

        let mut summary = ApplySummary {
            staged: staged.len(),
            ..ApplySummary::default()
        };
        for record in &staged {
            let outcome = self
                .gateway
                .update_quote_asset(
                    &record.quote_id,
                    &record.legacy_quote_id,
                    &record.asset_id,
                    &record.assignment(),
                )
                .await
                .map_err(|e| ReconcileError::write_failure(crate::constants::QUOTES, &e))?;

            if outcome.matched {
                summary.matched += 1;
                if outcome.modified {
                    summary.modified += 1;
                }
                metrics::quote_updated(outcome.modified);
            } else {
                warn!(
                    quote_id = %record.quote_id,
                    legacy_quote_id = %record.legacy_quote_id,
                    asset_id = %record.asset_id,
                    "Staged quote asset not found; skipping"
                );
                summary.missing += 1;
                metrics::quote_missing();
            }
        }

        info!(
            staged = summary.staged,
            matched = summary.matched,
            modified = summary.modified,
            missing = summary.missing,
            "Apply stage finished"
        );
        Ok(ApplyOutcome::Applied(summary))
    }
}
