use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};

use crate::app::ports::RepositoryGateway;
use crate::config::ReconcileConfig;
use crate::constants;
use crate::domain::{RunId, RunStatus, SkippedCandidate};
use crate::error::{ReconcileError, Result};
use crate::metrics;
use crate::pipeline::applier::{ApplyOutcome, Applier};
use crate::pipeline::extractor::Extractor;
use crate::pipeline::matcher::Matcher;
use crate::pipeline::resolver::CatalogResolver;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after staging; leave the quote store untouched.
    pub dry_run: bool,
}

/// Summary of one reconciliation run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    pub candidates: usize,
    pub skipped: Vec<SkippedCandidate>,
    pub version_id: Option<String>,
    pub staged_pairs: usize,
    pub no_match: usize,
    pub ambiguous: usize,
    pub match_success: bool,
    pub apply: Option<ApplyOutcome>,
    /// The stage error that ended the run early, if any.
    pub failure: Option<ReconcileError>,
}

impl RunReport {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            candidates: 0,
            skipped: Vec::new(),
            version_id: None,
            staged_pairs: 0,
            no_match: 0,
            ambiguous: 0,
            match_success: false,
            apply: None,
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
            && self.match_success
            && !matches!(self.apply, Some(ApplyOutcome::StageGateFailure))
    }
}

/// Runs extract, resolve, match and apply strictly in order against one shared gateway.
pub struct ReconciliationPipeline {
    gateway: Arc<dyn RepositoryGateway>,
    config: ReconcileConfig,
}

impl ReconciliationPipeline {
    pub fn new(gateway: Arc<dyn RepositoryGateway>, config: ReconcileConfig) -> Self {
        Self { gateway, config }
    }

    pub async fn run(&self, options: RunOptions) -> RunReport {
        let run_id = RunId::new();
        let span = info_span!("reconcile", run_id = %run_id);
        self.run_stages(run_id, options).instrument(span).await
    }

    async fn run_stages(&self, run_id: RunId, options: RunOptions) -> RunReport {
        let mut report = RunReport::new(run_id);
        let limit = self.config.stage_timeout();
        info!(jurisdiction = %self.config.jurisdiction, dry_run = options.dry_run, "Starting reconciliation run");

        // Stage 1
        let extractor = Extractor::new(self.gateway.clone(), self.config.source_system_marker.clone());
        let extraction = match within(constants::STAGE_EXTRACT, limit, extractor.extract()).await {
            Ok(extraction) => extraction,
            Err(e) => return fail(report, e),
        };
        report.candidates = extraction.candidates.len();
        report.skipped = extraction.skipped;

        // Resolve the catalog version once for the whole run
        let resolver = CatalogResolver::new(self.gateway.clone(), self.config.catalog_version_override.clone());
        let version_id = match within(
            constants::STAGE_RESOLVE,
            limit,
            resolver.resolve_active_version(&self.config.jurisdiction),
        )
        .await
        {
            Ok(version_id) => version_id,
            Err(e) => return fail(report, e),
        };
        report.version_id = Some(version_id.clone());

        // Stage 2
        let matcher = Matcher::new(self.gateway.clone(), self.config.duplicate_policy);
        let outcome = match within(
            constants::STAGE_MATCH,
            limit,
            matcher.run(run_id, &extraction.candidates, &version_id),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.record_status(run_id, false).await;
                return fail(report, e);
            }
        };
        report.staged_pairs = outcome.pairs.len();
        report.no_match = outcome.no_match;
        report.ambiguous = outcome.ambiguous;
        report.match_success = outcome.success();

        // Later `apply` calls for this run read the recorded result
        if let Err(e) = self
            .gateway
            .record_run_status(&RunStatus::new(run_id, report.match_success))
            .await
        {
            return fail(report, e);
        }

        if options.dry_run && report.match_success {
            info!(staged = report.staged_pairs, "Dry run; staged values left unapplied");
            return report;
        }

        // Stage 3, gated on stage 2
        let applier = Applier::new(self.gateway.clone());
        match within(constants::STAGE_APPLY, limit, applier.apply(run_id, report.match_success)).await {
            Ok(apply) => report.apply = Some(apply),
            Err(e) => return fail(report, e),
        }

        if let Some(e) = outcome.failure {
            report.failure = Some(e);
        }
        if !report.succeeded() {
            metrics::run_failed();
        }
        info!(succeeded = report.succeeded(), "Reconciliation run finished");
        report
    }
}

impl ReconciliationPipeline {
    async fn record_status(&self, run_id: RunId, match_success: bool) {
        if let Err(e) = self
            .gateway
            .record_run_status(&RunStatus::new(run_id, match_success))
            .await
        {
            warn!(error = %e, "Could not record match stage status");
        }
    }
}

fn fail(mut report: RunReport, error: ReconcileError) -> RunReport {
    error!(error = %error, "Reconciliation run aborted");
    metrics::run_failed();
    report.failure = Some(error);
    report
}

/// Runs one stage under a deadline and records its duration.
pub async fn within<T, F>(stage: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = tokio::time::timeout(limit, fut).await;
    metrics::stage_duration(stage, started.elapsed().as_secs_f64());
    match result {
        Ok(inner) => inner,
        Err(_) => Err(ReconcileError::StageTimeout {
            stage,
            secs: limit.as_secs(),
        }),
    }
}
