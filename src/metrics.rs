//! Counters and histograms for reconciliation runs.
//!
//! Nothing here installs a recorder; without one every call is a no-op.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    CandidatesExtracted,
    CandidatesSkipped,
    MatchesFound,
    MatchesMissing,
    MatchesAmbiguous,
    PairsStaged,
    StagingWriteErrors,
    QuotesUpdated,
    QuotesUnchanged,
    QuotesMissing,
    StageDuration,
    RunsFailed,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::CandidatesExtracted => "recon_extract_candidates_total",
            MetricName::CandidatesSkipped => "recon_extract_skipped_total",
            MetricName::MatchesFound => "recon_match_found_total",
            MetricName::MatchesMissing => "recon_match_missing_total",
            MetricName::MatchesAmbiguous => "recon_match_ambiguous_total",
            MetricName::PairsStaged => "recon_staging_pairs_total",
            MetricName::StagingWriteErrors => "recon_staging_write_errors_total",
            MetricName::QuotesUpdated => "recon_apply_updated_total",
            MetricName::QuotesUnchanged => "recon_apply_unchanged_total",
            MetricName::QuotesMissing => "recon_apply_missing_total",
            MetricName::StageDuration => "recon_stage_duration_seconds",
            MetricName::RunsFailed => "recon_runs_failed_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn increment(name: MetricName, by: u64) {
    ::metrics::counter!(name.as_str()).increment(by);
}

pub fn candidates_extracted(count: usize) {
    increment(MetricName::CandidatesExtracted, count as u64);
}

pub fn candidate_skipped() {
    increment(MetricName::CandidatesSkipped, 1);
}

pub fn match_found(matches: usize) {
    increment(MetricName::MatchesFound, matches as u64);
}

pub fn no_match() {
    increment(MetricName::MatchesMissing, 1);
}

pub fn duplicate_match() {
    increment(MetricName::MatchesAmbiguous, 1);
}

pub fn pair_staged() {
    increment(MetricName::PairsStaged, 1);
}

pub fn staging_write_error() {
    increment(MetricName::StagingWriteErrors, 1);
}

pub fn quote_updated(modified: bool) {
    if modified {
        increment(MetricName::QuotesUpdated, 1);
    } else {
        increment(MetricName::QuotesUnchanged, 1);
    }
}

pub fn quote_missing() {
    increment(MetricName::QuotesMissing, 1);
}

pub fn run_failed() {
    increment(MetricName::RunsFailed, 1);
}

pub fn stage_duration(stage: &'static str, duration_secs: f64) {
    ::metrics::histogram!(MetricName::StageDuration.as_str(), "stage" => stage).record(duration_secs);
}
