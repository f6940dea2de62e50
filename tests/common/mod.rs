#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use quote_reconciler::app::ports::RepositoryGateway;
use quote_reconciler::config::ReconcileConfig;
use quote_reconciler::domain::*;
use quote_reconciler::error::{ReconcileError, Result};
use quote_reconciler::infra::in_memory_gateway::InMemoryGateway;

pub fn quote_q1() -> QuoteRecord {
    serde_json::from_value(json!({
        "_id": "Q1",
        "state": "WI",
        "legacyQuotes": [{
            "_id": "LQ1",
            "sourceSystem": 1,
            "assets": [{ "_id": "A1", "year": 2015, "make": 5, "model": 12, "bodyStyle": 3 }]
        }]
    }))
    .unwrap()
}

pub fn quote_q2_null_model() -> QuoteRecord {
    serde_json::from_value(json!({
        "_id": "Q2",
        "legacyQuotes": [{
            "_id": "LQ2",
            "sourceSystem": 1,
            "assets": [{ "_id": "A1", "year": 2015, "make": 5, "model": null, "bodyStyle": 3 }]
        }]
    }))
    .unwrap()
}

pub fn master(id: &str) -> VehicleMaster {
    serde_json::from_value(json!({ "_id": id, "status": "Active", "states": ["WI", "MN"] })).unwrap()
}

pub fn catalog_v1() -> VehicleCatalogVersion {
    serde_json::from_value(json!({
        "versionId": "V1",
        "year": 2015,
        "makes": [{ "_id": "M-5", "key": "5" }, { "_id": "M-8", "key": "8" }],
        "models": [
            { "_id": "M-5", "models": [{ "_id": "MD-12", "key": "12" }] },
            { "_id": "M-8", "models": [{ "_id": "MD-812", "key": "12" }] }
        ],
        "bodyStyles": [
            { "_id": "MD-12", "bodyStyles": [{ "_id": "BS-3", "key": "3" }] },
            { "_id": "MD-812", "bodyStyles": [{ "_id": "BS-83", "key": "3" }] }
        ]
    }))
    .unwrap()
}

pub fn expected_assignment() -> CanonicalAssignment {
    CanonicalAssignment {
        make_id: "M-5".into(),
        model_id: "MD-12".into(),
        body_style_id: "BS-3".into(),
    }
}

pub fn seeded_gateway() -> InMemoryGateway {
    let gateway = InMemoryGateway::new();
    gateway.put_quote(quote_q1()).unwrap();
    gateway.put_quote(quote_q2_null_model()).unwrap();
    gateway.put_master(master("V1")).unwrap();
    gateway.put_catalog(catalog_v1()).unwrap();
    gateway
}

/// Same legacy codes as Q1 on a second quote, so both resolve to the same catalog entry.
pub fn quote_q3() -> QuoteRecord {
    serde_json::from_value(json!({
        "_id": "Q3",
        "legacyQuotes": [{
            "_id": "LQ3",
            "sourceSystem": 1,
            "assets": [{ "_id": "A1", "year": 2015, "make": 5, "model": 12, "bodyStyle": 3 }]
        }]
    }))
    .unwrap()
}

pub fn config() -> ReconcileConfig {
    ReconcileConfig::default()
}

/// Wraps the in-memory gateway and fails selected writes on demand.
pub struct FailingGateway {
    pub inner: InMemoryGateway,
    pub fail_new_values: AtomicBool,
    pub fail_audit_log: AtomicBool,
    pub fail_updates: AtomicBool,
    /// Fails new-values inserts for this quote only.
    pub fail_new_values_for: Mutex<Option<String>>,
}

impl FailingGateway {
    pub fn new(inner: InMemoryGateway) -> Self {
        Self {
            inner,
            fail_new_values: AtomicBool::new(false),
            fail_audit_log: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            fail_new_values_for: Mutex::new(None),
        }
    }

    fn injected(what: &str) -> ReconcileError {
        ReconcileError::storage(format!("injected {what} failure"))
    }
}

#[async_trait]
impl RepositoryGateway for FailingGateway {
    async fn find_active_masters(&self, jurisdiction: &str) -> Result<Vec<MasterRef>> {
        self.inner.find_active_masters(jurisdiction).await
    }

    async fn find_legacy_candidates(&self, marker: &AttributeCode) -> Result<LegacyScan> {
        self.inner.find_legacy_candidates(marker).await
    }

    async fn find_catalog_versions(&self, version_id: &str, year: i32) -> Result<Vec<VehicleCatalogVersion>> {
        self.inner.find_catalog_versions(version_id, year).await
    }

    async fn insert_staging(&self, record: &StagingRecord) -> Result<()> {
        let fail = match record.store() {
            StagingStore::NewValues => self.fail_new_values.load(Ordering::SeqCst),
            StagingStore::AuditLog => self.fail_audit_log.load(Ordering::SeqCst),
        };
        let failing_quote = match record {
            StagingRecord::NewValues(r) => {
                self.fail_new_values_for.lock().unwrap().as_deref() == Some(r.quote_id.as_str())
            }
            StagingRecord::AuditLog(_) => false,
        };
        if fail || failing_quote {
            return Err(Self::injected("staging"));
        }
        self.inner.insert_staging(record).await
    }

    async fn delete_staging(&self, store: StagingStore, staging_id: Uuid) -> Result<bool> {
        self.inner.delete_staging(store, staging_id).await
    }

    async fn scan_staging(&self, store: StagingStore, run_id: Option<RunId>) -> Result<Vec<StagingRecord>> {
        self.inner.scan_staging(store, run_id).await
    }

    async fn clear_staging(&self, store: StagingStore, run_id: Option<RunId>) -> Result<usize> {
        self.inner.clear_staging(store, run_id).await
    }

    async fn record_run_status(&self, status: &RunStatus) -> Result<()> {
        self.inner.record_run_status(status).await
    }

    async fn find_run_status(&self, run_id: RunId) -> Result<Option<RunStatus>> {
        self.inner.find_run_status(run_id).await
    }

    async fn update_quote_asset(
        &self,
        quote_id: &str,
        legacy_quote_id: &str,
        asset_id: &str,
        assignment: &CanonicalAssignment,
    ) -> Result<UpdateOutcome> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::injected("update"));
        }
        self.inner
            .update_quote_asset(quote_id, legacy_quote_id, asset_id, assignment)
            .await
    }
}
