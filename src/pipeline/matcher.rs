use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::app::ports::RepositoryGateway;
use crate::catalog::CatalogKeys;
use crate::config::DuplicateMatchPolicy;
use crate::domain::{CanonicalAssignment, RunId, StagedPair, ValidatedCandidate};
use crate::error::{ReconcileError, Result};
use crate::metrics;
use crate::pipeline::staging::StagingWriter;

/// What happened to a single candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    Staged(usize),
    NoMatch,
    Ambiguous(usize),
}

/// Result of stage 2 over a batch of candidates.
#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub pairs: Vec<StagedPair>,
    pub no_match: usize,
    pub ambiguous: usize,
    /// Set when a write failed; the stage stops at that candidate.
    pub failure: Option<ReconcileError>,
}

impl MatchOutcome {
    /// True unless a write failed. An empty batch succeeds.
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }

    fn record(&mut self, outcome: &CandidateOutcome) {
        match outcome {
            CandidateOutcome::Staged(_) => {}
            CandidateOutcome::NoMatch => self.no_match += 1,
            CandidateOutcome::Ambiguous(_) => self.ambiguous += 1,
        }
    }
}

/// Stage 2: resolves candidates against one catalog version and stages the results.
pub struct Matcher {
    gateway: Arc<dyn RepositoryGateway>,
    staging: StagingWriter,
    policy: DuplicateMatchPolicy,
}

impl Matcher {
    pub fn new(gateway: Arc<dyn RepositoryGateway>, policy: DuplicateMatchPolicy) -> Self {
        let staging = StagingWriter::new(gateway.clone());
        Self {
            gateway,
            staging,
            policy,
        }
    }

    /// Catalog read errors propagate and fail the stage. Write errors are
    /// captured in the outcome together with the pairs staged before them.
    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn run(&self, run_id: RunId, candidates: &[ValidatedCandidate], version_id: &str) -> Result<MatchOutcome> {
        let mut outcome = MatchOutcome::default();

        for candidate in candidates {
            let assignments = self.lookup(candidate, version_id).await?;
            let selected = match self.select(candidate, version_id, assignments) {
                Ok(selected) => selected,
                Err(result) => {
                    outcome.record(&result);
                    continue;
                }
            };

            let mut staged = 0;
            for assignment in &selected {
                let pair = StagedPair::build(run_id, candidate, assignment);
                if let Err(e) = self.staging.stage(&pair).await {
                    error!(
                        quote_id = %candidate.quote_id,
                        asset_id = %candidate.asset_id,
                        error = %e,
                        "Staging write failed; stopping match stage"
                    );
                    outcome.failure = Some(e);
                    return Ok(outcome);
                }
                outcome.pairs.push(pair);
                staged += 1;
            }
            outcome.record(&CandidateOutcome::Staged(staged));
        }

        info!(
            staged = outcome.pairs.len(),
            no_match = outcome.no_match,
            ambiguous = outcome.ambiguous,
            "Match stage finished"
        );
        Ok(outcome)
    }

    async fn lookup(&self, candidate: &ValidatedCandidate, version_id: &str) -> Result<Vec<CanonicalAssignment>> {
        let keys = CatalogKeys::from(candidate);
        self.gateway
            .find_catalog_matches(version_id, candidate.year, &keys)
            .await
    }

    /// Applies the duplicate policy. `Err` carries the outcome of a candidate that stages nothing.
    fn select(
        &self,
        candidate: &ValidatedCandidate,
        version_id: &str,
        mut assignments: Vec<CanonicalAssignment>,
    ) -> std::result::Result<Vec<CanonicalAssignment>, CandidateOutcome> {
        match assignments.len() {
            0 => {
                let err = ReconcileError::NoMatchFound {
                    quote_id: candidate.quote_id.clone(),
                    asset_id: candidate.asset_id.clone(),
                    version_id: version_id.to_string(),
                };
                warn!(legacy_quote_id = %candidate.legacy_quote_id, "{err}");
                metrics::no_match();
                Err(CandidateOutcome::NoMatch)
            }
            1 => {
                metrics::match_found(1);
                Ok(assignments)
            }
            n => match self.policy {
                DuplicateMatchPolicy::EmitAll => {
                    warn!(
                        quote_id = %candidate.quote_id,
                        asset_id = %candidate.asset_id,
                        matches = n,
                        "Staging every overlapping catalog match"
                    );
                    metrics::match_found(n);
                    Ok(assignments)
                }
                DuplicateMatchPolicy::First => {
                    warn!(
                        quote_id = %candidate.quote_id,
                        asset_id = %candidate.asset_id,
                        matches = n,
                        "Overlapping catalog matches; keeping the first"
                    );
                    assignments.truncate(1);
                    metrics::match_found(1);
                    Ok(assignments)
                }
                DuplicateMatchPolicy::Reject => {
                    let err = ReconcileError::DuplicateMatch {
                        quote_id: candidate.quote_id.clone(),
                        asset_id: candidate.asset_id.clone(),
                        matches: n,
                    };
                    error!(legacy_quote_id = %candidate.legacy_quote_id, "{err}");
                    metrics::duplicate_match();
                    Err(CandidateOutcome::Ambiguous(n))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BodyStyleGroup, CatalogNode, StagingStore, VehicleCatalogVersion, ModelFamily};
    use crate::infra::in_memory_gateway::InMemoryGateway;

    fn node(id: &str, key: &str) -> CatalogNode {
        CatalogNode {
            id: id.into(),
            key: key.into(),
        }
    }

    fn catalog(extra_body_style: bool) -> VehicleCatalogVersion {
        let mut body_styles = vec![node("BS-3", "3")];
        if extra_body_style {
            body_styles.push(node("BS-3-alt", "3"));
        }
        VehicleCatalogVersion {
            version_id: "V1".into(),
            year: 2015,
            makes: vec![node("M-5", "5")],
            models: vec![ModelFamily {
                make_id: "M-5".into(),
                models: vec![node("MD-12", "12")],
            }],
            body_styles: vec![BodyStyleGroup {
                model_id: "MD-12".into(),
                body_styles,
            }],
        }
    }

    fn candidate(quote_id: &str, model: i64) -> ValidatedCandidate {
        ValidatedCandidate {
            quote_id: quote_id.into(),
            legacy_quote_id: "LQ1".into(),
            asset_id: "A1".into(),
            year: 2015,
            make: 5i64.into(),
            model: model.into(),
            body_style: 3i64.into(),
        }
    }

    fn gateway(overlapping: bool) -> Arc<InMemoryGateway> {
        let gateway = InMemoryGateway::new();
        gateway.put_catalog(catalog(overlapping)).unwrap();
        Arc::new(gateway)
    }

    #[tokio::test]
    async fn test_empty_input_succeeds() {
        let matcher = Matcher::new(gateway(false), DuplicateMatchPolicy::Reject);
        let outcome = matcher.run(RunId::new(), &[], "V1").await.unwrap();
        assert!(outcome.success());
        assert!(outcome.pairs.is_empty());
    }

    #[tokio::test]
    async fn test_single_match_is_staged() {
        let g = gateway(false);
        let matcher = Matcher::new(g.clone(), DuplicateMatchPolicy::Reject);
        let run_id = RunId::new();
        let outcome = matcher.run(run_id, &[candidate("Q1", 12)], "V1").await.unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].new_record.make, "M-5");
        assert_eq!(g.scan_staging(StagingStore::NewValues, Some(run_id)).await.unwrap().len(), 1);
        assert_eq!(g.scan_staging(StagingStore::AuditLog, Some(run_id)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_match_is_not_fatal() {
        let matcher = Matcher::new(gateway(false), DuplicateMatchPolicy::Reject);
        let outcome = matcher
            .run(RunId::new(), &[candidate("Q1", 99), candidate("Q2", 12)], "V1")
            .await
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.no_match, 1);
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].new_record.quote_id, "Q2");
    }

    #[tokio::test]
    async fn test_wrong_version_yields_no_match() {
        let matcher = Matcher::new(gateway(false), DuplicateMatchPolicy::Reject);
        let outcome = matcher.run(RunId::new(), &[candidate("Q1", 12)], "V2").await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.no_match, 1);
    }

    #[tokio::test]
    async fn test_duplicate_policies() {
        let reject = Matcher::new(gateway(true), DuplicateMatchPolicy::Reject)
            .run(RunId::new(), &[candidate("Q1", 12)], "V1")
            .await
            .unwrap();
        assert!(reject.success());
        assert_eq!(reject.ambiguous, 1);
        assert!(reject.pairs.is_empty());

        let emit_all = Matcher::new(gateway(true), DuplicateMatchPolicy::EmitAll)
            .run(RunId::new(), &[candidate("Q1", 12)], "V1")
            .await
            .unwrap();
        assert_eq!(emit_all.pairs.len(), 2);
        assert!(emit_all.pairs.iter().all(|p| p.new_record.quote_id == "Q1"));

        let first = Matcher::new(gateway(true), DuplicateMatchPolicy::First)
            .run(RunId::new(), &[candidate("Q1", 12)], "V1")
            .await
            .unwrap();
        assert_eq!(first.pairs.len(), 1);
        assert_eq!(first.pairs[0].new_record.body_style, "BS-3");
    }
}
