use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::app::ports::RepositoryGateway;
use crate::domain::*;
use crate::error::{ReconcileError, Result};

/// In-memory document store for tests and dry runs.
///
/// Quotes and masters are keyed by id so scans come back in a stable order.
#[derive(Default)]
pub struct InMemoryGateway {
    quotes: Mutex<BTreeMap<String, QuoteRecord>>,
    masters: Mutex<BTreeMap<String, VehicleMaster>>,
    catalogs: Mutex<Vec<VehicleCatalogVersion>>,
    staging: Mutex<Vec<StagingRecord>>,
    runs: Mutex<BTreeMap<RunId, RunStatus>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| ReconcileError::storage(format!("in-memory store poisoned: {e}")))
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_quote(&self, quote: QuoteRecord) -> Result<()> {
        lock(&self.quotes)?.insert(quote.quote_id.clone(), quote);
        Ok(())
    }

    pub fn put_master(&self, master: VehicleMaster) -> Result<()> {
        lock(&self.masters)?.insert(master.id.clone(), master);
        Ok(())
    }

    pub fn put_catalog(&self, version: VehicleCatalogVersion) -> Result<()> {
        lock(&self.catalogs)?.push(version);
        Ok(())
    }

    pub fn quote(&self, quote_id: &str) -> Result<Option<QuoteRecord>> {
        Ok(lock(&self.quotes)?.get(quote_id).cloned())
    }

    pub fn quote_count(&self) -> Result<usize> {
        Ok(lock(&self.quotes)?.len())
    }
}

#[async_trait]
impl RepositoryGateway for InMemoryGateway {
    async fn find_active_masters(&self, jurisdiction: &str) -> Result<Vec<MasterRef>> {
        let masters = lock(&self.masters)?;
        Ok(masters
            .values()
            .filter(|m| m.is_eligible(jurisdiction))
            .map(|m| MasterRef { id: m.id.clone() })
            .collect())
    }

    async fn find_legacy_candidates(&self, marker: &AttributeCode) -> Result<LegacyScan> {
        let quotes = lock(&self.quotes)?;
        Ok(LegacyScan::from_descriptors(
            quotes.values().flat_map(|q| q.legacy_assets(marker)).collect(),
        ))
    }

    async fn find_catalog_versions(&self, version_id: &str, year: i32) -> Result<Vec<VehicleCatalogVersion>> {
        let catalogs = lock(&self.catalogs)?;
        Ok(catalogs
            .iter()
            .filter(|c| c.version_id == version_id && c.year == year)
            .cloned()
            .collect())
    }

    async fn insert_staging(&self, record: &StagingRecord) -> Result<()> {
        let mut staging = lock(&self.staging)?;
        let store = record.store();
        if staging
            .iter()
            .any(|r| r.store() == store && r.staging_id() == record.staging_id())
        {
            return Err(ReconcileError::storage(format!(
                "duplicate staging id {} in {}",
                record.staging_id(),
                store
            )));
        }
        staging.push(record.clone());
        debug!("Staged record {} into {}", record.staging_id(), store);
        Ok(())
    }

    async fn delete_staging(&self, store: StagingStore, staging_id: Uuid) -> Result<bool> {
        let mut staging = lock(&self.staging)?;
        let before = staging.len();
        staging.retain(|r| !(r.store() == store && r.staging_id() == staging_id));
        Ok(staging.len() != before)
    }

    async fn scan_staging(&self, store: StagingStore, run_id: Option<RunId>) -> Result<Vec<StagingRecord>> {
        let staging = lock(&self.staging)?;
        Ok(staging
            .iter()
            .filter(|r| r.store() == store && run_id.map_or(true, |id| r.run_id() == id))
            .cloned()
            .collect())
    }

    async fn clear_staging(&self, store: StagingStore, run_id: Option<RunId>) -> Result<usize> {
        let mut staging = lock(&self.staging)?;
        let before = staging.len();
        staging.retain(|r| !(r.store() == store && run_id.map_or(true, |id| r.run_id() == id)));
        Ok(before - staging.len())
    }

    async fn record_run_status(&self, status: &RunStatus) -> Result<()> {
        lock(&self.runs)?.insert(status.run_id, status.clone());
        Ok(())
    }

    async fn find_run_status(&self, run_id: RunId) -> Result<Option<RunStatus>> {
        Ok(lock(&self.runs)?.get(&run_id).cloned())
    }

    async fn update_quote_asset(
        &self,
        quote_id: &str,
        legacy_quote_id: &str,
        asset_id: &str,
        assignment: &CanonicalAssignment,
    ) -> Result<UpdateOutcome> {
        let mut quotes = lock(&self.quotes)?;
        let Some(asset) = quotes
            .get_mut(quote_id)
            .and_then(|q| q.asset_mut(legacy_quote_id, asset_id))
        else {
            return Ok(UpdateOutcome::default());
        };

        let modified = asset.apply_assignment(assignment);
        debug!(quote_id, asset_id, modified, "Updated quote asset");
        Ok(UpdateOutcome {
            matched: true,
            modified,
        })
    }
}
