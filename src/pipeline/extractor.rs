use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::app::ports::RepositoryGateway;
use crate::domain::{AttributeCode, SkippedCandidate, ValidatedCandidate};
use crate::error::{ReconcileError, Result};
use crate::metrics;

/// Candidates and skips from one extraction pass.
#[derive(Debug, Default)]
pub struct Extraction {
    pub candidates: Vec<ValidatedCandidate>,
    pub skipped: Vec<SkippedCandidate>,
}

impl IntoIterator for Extraction {
    type Item = ValidatedCandidate;
    type IntoIter = std::vec::IntoIter<ValidatedCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.into_iter()
    }
}

/// Stage 1: pulls legacy asset descriptors and drops incomplete ones.
pub struct Extractor {
    gateway: Arc<dyn RepositoryGateway>,
    source_system_marker: AttributeCode,
}

impl Extractor {
    pub fn new(gateway: Arc<dyn RepositoryGateway>, source_system_marker: AttributeCode) -> Self {
        Self {
            gateway,
            source_system_marker,
        }
    }

    #[instrument(skip(self), fields(marker = %self.source_system_marker))]
    pub async fn extract(&self) -> Result<Extraction> {
        let scan = self
            .gateway
            .find_legacy_candidates(&self.source_system_marker)
            .await?;

        let mut extraction = Extraction::default();
        for skipped in scan.unreadable {
            extraction.skip(skipped);
        }
        for descriptor in scan.descriptors {
            match ValidatedCandidate::try_from(descriptor) {
                Ok(candidate) => extraction.candidates.push(candidate),
                Err(ReconcileError::MissingDescriptor(skipped)) => extraction.skip(skipped),
                Err(other) => return Err(other),
            }
        }

        metrics::candidates_extracted(extraction.candidates.len());
        info!(
            candidates = extraction.candidates.len(),
            skipped = extraction.skipped.len(),
            "Extraction finished"
        );
        Ok(extraction)
    }
}

impl Extraction {
    fn skip(&mut self, skipped: SkippedCandidate) {
        warn!(
            quote_id = %skipped.quote_id,
            legacy_quote_id = %skipped.legacy_quote_id,
            asset_id = %skipped.asset_id,
            reason = %skipped.reason,
            "Skipping legacy asset"
        );
        metrics::candidate_skipped();
        self.skipped.push(skipped);
    }
}
