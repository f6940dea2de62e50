use async_trait::async_trait;
use uuid::Uuid;

use crate::catalog::{self, CatalogKeys};
use crate::domain::{
    AttributeCode, CanonicalAssignment, LegacyScan, MasterRef, RunId, RunStatus, StagingRecord, StagingStore,
    UpdateOutcome, VehicleCatalogVersion,
};
use crate::error::Result;

/// Every read and write the pipeline performs against the document store.
///
/// One gateway instance is created per run and shared by all stages.
#[async_trait]
pub trait RepositoryGateway: Send + Sync {
    /// Ids of `Active` vehicle masters covering `jurisdiction`.
    async fn find_active_masters(&self, jurisdiction: &str) -> Result<Vec<MasterRef>>;

    /// Unwound (quote, legacy quote, asset) triples whose legacy quote came from `marker`.
    ///
    /// Entries that cannot be decoded come back in `LegacyScan::unreadable`
    /// instead of failing the scan.
    async fn find_legacy_candidates(&self, marker: &AttributeCode) -> Result<LegacyScan>;

    /// Catalog version documents for a version and model year.
    async fn find_catalog_versions(&self, version_id: &str, year: i32) -> Result<Vec<VehicleCatalogVersion>>;

    async fn find_catalog_matches(
        &self,
        version_id: &str,
        year: i32,
        keys: &CatalogKeys,
    ) -> Result<Vec<CanonicalAssignment>> {
        let versions = self.find_catalog_versions(version_id, year).await?;
        Ok(catalog::join_all(&versions, keys))
    }

    async fn insert_staging(&self, record: &StagingRecord) -> Result<()>;

    /// Removes one staged record. Returns whether it existed.
    async fn delete_staging(&self, store: StagingStore, staging_id: Uuid) -> Result<bool>;

    /// Staged records in insertion order, limited to `run_id` when given.
    async fn scan_staging(&self, store: StagingStore, run_id: Option<RunId>) -> Result<Vec<StagingRecord>>;

    /// Operational cleanup. Returns the number of records removed.
    async fn clear_staging(&self, store: StagingStore, run_id: Option<RunId>) -> Result<usize>;

    /// Stores the match-stage result of a run, replacing any earlier one.
    async fn record_run_status(&self, status: &RunStatus) -> Result<()>;

    async fn find_run_status(&self, run_id: RunId) -> Result<Option<RunStatus>>;

    /// Targeted, no-upsert update of one asset's make/model/bodyStyle.
    async fn update_quote_asset(
        &self,
        quote_id: &str,
        legacy_quote_id: &str,
        asset_id: &str,
        assignment: &CanonicalAssignment,
    ) -> Result<UpdateOutcome>;
}
