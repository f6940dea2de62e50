use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::ports::RepositoryGateway;
use crate::config::StoreConfig;
use crate::domain::*;
use crate::error::{ReconcileError, Result};

/// Document store backed by a single SQLite file.
///
/// Each collection is a table of JSON documents. The connection is opened once
/// and shared by every stage of a run. Port calls run on the blocking pool so
/// stage deadlines can fire while SQLite is busy.
pub struct SqliteGateway {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    CREATE TABLE IF NOT EXISTS quotes (
        quote_id  TEXT PRIMARY KEY,
        doc       TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS vehicle_masters (
        master_id TEXT PRIMARY KEY,
        doc       TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS vehicle_catalogs (
        seq        INTEGER PRIMARY KEY AUTOINCREMENT,
        version_id TEXT NOT NULL,
        year       INTEGER NOT NULL,
        doc        TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS vehicle_catalogs_version_year
        ON vehicle_catalogs (version_id, year);
    CREATE TABLE IF NOT EXISTS staging (
        seq         INTEGER PRIMARY KEY AUTOINCREMENT,
        store       TEXT NOT NULL,
        staging_id  TEXT NOT NULL,
        run_id      TEXT NOT NULL,
        doc         TEXT NOT NULL,
        UNIQUE (store, staging_id)
    );
    CREATE INDEX IF NOT EXISTS staging_store_run ON staging (store, run_id);
    CREATE TABLE IF NOT EXISTS runs (
        run_id        TEXT PRIMARY KEY,
        match_success INTEGER NOT NULL,
        doc           TEXT NOT NULL
    );
"#;

fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| ReconcileError::storage(format!("sqlite connection poisoned: {e}")))
}

impl SqliteGateway {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_config(store: &StoreConfig) -> Result<Self> {
        let path = store.database_path();
        info!(
            "Opening document store '{}' ({}:{}) at {}",
            store.database,
            store.host,
            store.port,
            path.display()
        );
        Self::open(path)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }

    /// Runs `f` against the connection on tokio's blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock_conn(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| ReconcileError::storage(format!("sqlite task failed: {e}")))?
    }

    pub fn put_quote(&self, quote: &QuoteRecord) -> Result<()> {
        self.put_quote_document(&quote.quote_id, &serde_json::to_value(quote)?)
    }

    /// Stores a raw quote document as exported from the legacy store.
    pub fn put_quote_document(&self, quote_id: &str, doc: &Value) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO quotes (quote_id, doc) VALUES (?1, ?2)
             ON CONFLICT(quote_id) DO UPDATE SET doc=excluded.doc",
            params![quote_id, serde_json::to_string(doc)?],
        )?;
        Ok(())
    }

    pub fn put_master(&self, master: &VehicleMaster) -> Result<()> {
        let doc = serde_json::to_string(master)?;
        self.conn()?.execute(
            "INSERT INTO vehicle_masters (master_id, doc) VALUES (?1, ?2)
             ON CONFLICT(master_id) DO UPDATE SET doc=excluded.doc",
            params![master.id, doc],
        )?;
        Ok(())
    }

    pub fn put_catalog(&self, version: &VehicleCatalogVersion) -> Result<()> {
        let doc = serde_json::to_string(version)?;
        self.conn()?.execute(
            "INSERT INTO vehicle_catalogs (version_id, year, doc) VALUES (?1, ?2, ?3)",
            params![version.version_id, version.year, doc],
        )?;
        Ok(())
    }

    pub fn quote(&self, quote_id: &str) -> Result<Option<QuoteRecord>> {
        let conn = self.conn()?;
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM quotes WHERE quote_id = ?1",
                params![quote_id],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).map_err(ReconcileError::from))
            .transpose()
    }

    pub fn quote_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM quotes", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn decode_staging(store: StagingStore, doc: &str) -> Result<StagingRecord> {
    Ok(match store {
        StagingStore::NewValues => StagingRecord::NewValues(serde_json::from_str(doc)?),
        StagingStore::AuditLog => StagingRecord::AuditLog(serde_json::from_str(doc)?),
    })
}

fn staging_doc(record: &StagingRecord) -> Result<String> {
    Ok(match record {
        StagingRecord::NewValues(r) => serde_json::to_string(r)?,
        StagingRecord::AuditLog(r) => serde_json::to_string(r)?,
    })
}

#[async_trait]
impl RepositoryGateway for SqliteGateway {
    async fn find_active_masters(&self, jurisdiction: &str) -> Result<Vec<MasterRef>> {
        let jurisdiction = jurisdiction.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT doc FROM vehicle_masters ORDER BY master_id")?;
            let docs = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut masters = Vec::new();
            for doc in docs {
                let master: VehicleMaster = serde_json::from_str(&doc)?;
                if master.is_eligible(&jurisdiction) {
                    masters.push(MasterRef { id: master.id });
                }
            }
            Ok(masters)
        })
        .await
    }

    async fn find_legacy_candidates(&self, marker: &AttributeCode) -> Result<LegacyScan> {
        let marker = marker.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT quote_id, doc FROM quotes ORDER BY quote_id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut scan = LegacyScan::default();
            for (quote_id, doc) in rows {
                match serde_json::from_str::<Value>(&doc) {
                    Ok(doc) => scan.extend(LegacyScan::from_document(&quote_id, &doc, &marker)),
                    Err(e) => {
                        warn!(quote_id = %quote_id, error = %e, "Quote document is not valid JSON");
                        scan.unreadable
                            .push(SkippedCandidate::unreadable(&quote_id, "", "", e.to_string()));
                    }
                }
            }
            Ok(scan)
        })
        .await
    }

    async fn find_catalog_versions(&self, version_id: &str, year: i32) -> Result<Vec<VehicleCatalogVersion>> {
        let version_id = version_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT doc FROM vehicle_catalogs WHERE version_id = ?1 AND year = ?2 ORDER BY seq",
            )?;
            let docs = stmt
                .query_map(params![version_id, year], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            docs.iter()
                .map(|d| serde_json::from_str(d).map_err(ReconcileError::from))
                .collect()
        })
        .await
    }

    async fn insert_staging(&self, record: &StagingRecord) -> Result<()> {
        let doc = staging_doc(record)?;
        let store = record.store();
        let staging_id = record.staging_id();
        let run_id = record.run_id();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO staging (store, staging_id, run_id, doc) VALUES (?1, ?2, ?3, ?4)",
                params![store.collection_name(), staging_id.to_string(), run_id.to_string(), doc],
            )?;
            Ok(())
        })
        .await?;
        debug!("Staged record {} into {}", staging_id, store);
        Ok(())
    }

    async fn delete_staging(&self, store: StagingStore, staging_id: Uuid) -> Result<bool> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM staging WHERE store = ?1 AND staging_id = ?2",
                params![store.collection_name(), staging_id.to_string()],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn scan_staging(&self, store: StagingStore, run_id: Option<RunId>) -> Result<Vec<StagingRecord>> {
        self.with_conn(move |conn| {
            let docs = match run_id {
                Some(run_id) => {
                    let mut stmt =
                        conn.prepare("SELECT doc FROM staging WHERE store = ?1 AND run_id = ?2 ORDER BY seq")?;
                    let docs = stmt
                        .query_map(params![store.collection_name(), run_id.to_string()], |row| {
                            row.get::<_, String>(0)
                        })?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    docs
                }
                None => {
                    let mut stmt = conn.prepare("SELECT doc FROM staging WHERE store = ?1 ORDER BY seq")?;
                    let docs = stmt
                        .query_map(params![store.collection_name()], |row| row.get::<_, String>(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    docs
                }
            };

            docs.iter().map(|d| decode_staging(store, d)).collect()
        })
        .await
    }

    async fn clear_staging(&self, store: StagingStore, run_id: Option<RunId>) -> Result<usize> {
        self.with_conn(move |conn| {
            let removed = match run_id {
                Some(run_id) => conn.execute(
                    "DELETE FROM staging WHERE store = ?1 AND run_id = ?2",
                    params![store.collection_name(), run_id.to_string()],
                )?,
                None => conn.execute(
                    "DELETE FROM staging WHERE store = ?1",
                    params![store.collection_name()],
                )?,
            };
            Ok(removed)
        })
        .await
    }

    async fn record_run_status(&self, status: &RunStatus) -> Result<()> {
        let doc = serde_json::to_string(status)?;
        let run_id = status.run_id;
        let match_success = status.match_success;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO runs (run_id, match_success, doc) VALUES (?1, ?2, ?3)
                 ON CONFLICT(run_id) DO UPDATE SET match_success=excluded.match_success, doc=excluded.doc",
                params![run_id.to_string(), match_success, doc],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_run_status(&self, run_id: RunId) -> Result<Option<RunStatus>> {
        self.with_conn(move |conn| {
            let doc: Option<String> = conn
                .query_row(
                    "SELECT doc FROM runs WHERE run_id = ?1",
                    params![run_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            doc.map(|d| serde_json::from_str(&d).map_err(ReconcileError::from))
                .transpose()
        })
        .await
    }

    async fn update_quote_asset(
        &self,
        quote_id: &str,
        legacy_quote_id: &str,
        asset_id: &str,
        assignment: &CanonicalAssignment,
    ) -> Result<UpdateOutcome> {
        let quote_id = quote_id.to_string();
        let legacy_quote_id = legacy_quote_id.to_string();
        let asset_id = asset_id.to_string();
        let assignment = assignment.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let doc: Option<String> = tx
                .query_row(
                    "SELECT doc FROM quotes WHERE quote_id = ?1",
                    params![quote_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(doc) = doc else {
                return Ok(UpdateOutcome::default());
            };

            // Only the target asset is decoded and rewritten; the rest of the document stays as stored
            let mut document: Value = serde_json::from_str(&doc)?;
            let Some(entry) = asset_entry_mut(&mut document, &legacy_quote_id, &asset_id) else {
                return Ok(UpdateOutcome::default());
            };
            let mut asset: AssetDescriptor = serde_json::from_value(entry.clone())?;

            let modified = asset.apply_assignment(&assignment);
            if modified {
                *entry = serde_json::to_value(&asset)?;
                tx.execute(
                    "UPDATE quotes SET doc = ?2 WHERE quote_id = ?1",
                    params![quote_id, serde_json::to_string(&document)?],
                )?;
            }
            tx.commit()?;

            Ok(UpdateOutcome {
                matched: true,
                modified,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seed_quote(gateway: &SqliteGateway) {
        let quote: QuoteRecord = serde_json::from_value(json!({
            "_id": "Q1",
            "premium": 120.5,
            "legacyQuotes": [{
                "_id": "LQ1",
                "sourceSystem": 1,
                "assets": [{ "_id": "A1", "year": 2015, "make": 5, "model": 12, "bodyStyle": 3 }]
            }]
        }))
        .unwrap();
        gateway.put_quote(&quote).unwrap();
    }

    #[tokio::test]
    async fn test_update_preserves_unrelated_fields() {
        let gateway = SqliteGateway::in_memory().unwrap();
        seed_quote(&gateway);

        let assignment = CanonicalAssignment {
            make_id: "M-5".into(),
            model_id: "MD-12".into(),
            body_style_id: "BS-3".into(),
        };
        let outcome = gateway.update_quote_asset("Q1", "LQ1", "A1", &assignment).await.unwrap();
        assert!(outcome.matched && outcome.modified);

        let quote = gateway.quote("Q1").unwrap().unwrap();
        assert_eq!(quote.extra["premium"], json!(120.5));
        let asset = quote.asset("LQ1", "A1").unwrap();
        assert_eq!(asset.body_style, Some(AttributeCode::Text("BS-3".into())));
    }

    #[tokio::test]
    async fn test_update_of_unknown_asset_is_noop() {
        let gateway = SqliteGateway::in_memory().unwrap();
        seed_quote(&gateway);

        let assignment = CanonicalAssignment {
            make_id: "M".into(),
            model_id: "MD".into(),
            body_style_id: "BS".into(),
        };
        let missing_quote = gateway.update_quote_asset("Q9", "LQ1", "A1", &assignment).await.unwrap();
        let missing_asset = gateway.update_quote_asset("Q1", "LQ1", "A9", &assignment).await.unwrap();

        assert!(!missing_quote.matched);
        assert!(!missing_asset.matched);
        assert_eq!(gateway.quote_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_staging_is_scoped_by_run() {
        let gateway = SqliteGateway::in_memory().unwrap();
        let candidate = ValidatedCandidate {
            quote_id: "Q1".into(),
            legacy_quote_id: "LQ1".into(),
            asset_id: "A1".into(),
            year: 2015,
            make: 5i64.into(),
            model: 12i64.into(),
            body_style: 3i64.into(),
        };
        let assignment = CanonicalAssignment {
            make_id: "M-5".into(),
            model_id: "MD-12".into(),
            body_style_id: "BS-3".into(),
        };
        let old_run = RunId::new();
        let new_run = RunId::new();
        for run in [old_run, new_run] {
            let pair = StagedPair::build(run, &candidate, &assignment);
            gateway.insert_staging(&StagingRecord::NewValues(pair.new_record)).await.unwrap();
            gateway.insert_staging(&StagingRecord::AuditLog(pair.update_log)).await.unwrap();
        }

        let scoped = gateway.scan_staging(StagingStore::NewValues, Some(new_run)).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].run_id(), new_run);
        assert!(matches!(scoped[0], StagingRecord::NewValues(_)));

        let removed = gateway.clear_staging(StagingStore::NewValues, Some(old_run)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(gateway.scan_staging(StagingStore::NewValues, None).await.unwrap().len(), 1);
        assert_eq!(gateway.scan_staging(StagingStore::AuditLog, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_staging_id_rejected() {
        let gateway = SqliteGateway::in_memory().unwrap();
        let candidate = ValidatedCandidate {
            quote_id: "Q1".into(),
            legacy_quote_id: "LQ1".into(),
            asset_id: "A1".into(),
            year: 2015,
            make: 5i64.into(),
            model: 12i64.into(),
            body_style: 3i64.into(),
        };
        let assignment = CanonicalAssignment {
            make_id: "M-5".into(),
            model_id: "MD-12".into(),
            body_style_id: "BS-3".into(),
        };
        let pair = StagedPair::build(RunId::new(), &candidate, &assignment);
        let record = StagingRecord::NewValues(pair.new_record);

        gateway.insert_staging(&record).await.unwrap();
        assert!(gateway.insert_staging(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_double_codes_do_not_sink_sibling_assets() {
        let gateway = SqliteGateway::in_memory().unwrap();
        gateway
            .put_quote_document(
                "Q5",
                &json!({
                    "_id": "Q5",
                    "legacyQuotes": [{
                        "_id": "LQ5",
                        "sourceSystem": 1.0,
                        "assets": [
                            { "_id": "A1", "year": 2015, "make": 5.0, "model": 12, "bodyStyle": 3 },
                            { "_id": "A2", "year": 2015, "make": 5, "model": 12, "bodyStyle": 3 },
                            { "_id": "A3", "year": 2015, "make": { "code": 5 }, "model": 12, "bodyStyle": 3 }
                        ]
                    }]
                }),
            )
            .unwrap();

        let scan = gateway.find_legacy_candidates(&AttributeCode::Number(1)).await.unwrap();
        let ids: Vec<_> = scan.descriptors.iter().map(|d| d.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["A1", "A2"]);
        assert_eq!(scan.descriptors[0].make, Some(AttributeCode::Number(5)));

        assert_eq!(scan.unreadable.len(), 1);
        assert_eq!(scan.unreadable[0].quote_id, "Q5");
        assert_eq!(scan.unreadable[0].asset_id, "A3");
    }

    #[tokio::test]
    async fn test_invalid_document_is_reported_not_dropped() {
        let gateway = SqliteGateway::in_memory().unwrap();
        seed_quote(&gateway);
        gateway
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO quotes (quote_id, doc) VALUES (?1, ?2)",
                params!["Q0", "{\"_id\": \"Q0\", \"legacyQuotes\": ["],
            )
            .unwrap();

        let scan = gateway.find_legacy_candidates(&AttributeCode::Number(1)).await.unwrap();
        assert_eq!(scan.descriptors.len(), 1);
        assert_eq!(scan.descriptors[0].quote_id, "Q1");
        assert_eq!(scan.unreadable.len(), 1);
        assert_eq!(scan.unreadable[0].quote_id, "Q0");
        assert!(matches!(scan.unreadable[0].reason, SkipReason::Unreadable(_)));
    }

    #[tokio::test]
    async fn test_update_leaves_damaged_siblings_as_stored() {
        let gateway = SqliteGateway::in_memory().unwrap();
        let stored = json!({
            "_id": "Q5",
            "legacyQuotes": [{
                "_id": "LQ5",
                "sourceSystem": 1,
                "assets": [
                    { "_id": "A1", "year": 2015, "make": 5.0, "model": 12, "bodyStyle": 3 },
                    { "_id": "A3", "make": { "code": 5 } }
                ]
            }]
        });
        gateway.put_quote_document("Q5", &stored).unwrap();

        let assignment = CanonicalAssignment {
            make_id: "M-5".into(),
            model_id: "MD-12".into(),
            body_style_id: "BS-3".into(),
        };
        let outcome = gateway.update_quote_asset("Q5", "LQ5", "A1", &assignment).await.unwrap();
        assert!(outcome.matched && outcome.modified);

        let doc: String = gateway
            .conn()
            .unwrap()
            .query_row("SELECT doc FROM quotes WHERE quote_id = 'Q5'", [], |row| row.get(0))
            .unwrap();
        let doc: Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(doc["legacyQuotes"][0]["assets"][0]["make"], json!("M-5"));
        assert_eq!(doc["legacyQuotes"][0]["assets"][1], stored["legacyQuotes"][0]["assets"][1]);
    }

    #[tokio::test]
    async fn test_run_status_round_trip() {
        let gateway = SqliteGateway::in_memory().unwrap();
        let run_id = RunId::new();
        gateway.record_run_status(&RunStatus::new(run_id, false)).await.unwrap();
        gateway.record_run_status(&RunStatus::new(run_id, true)).await.unwrap();

        let status = gateway.find_run_status(run_id).await.unwrap().unwrap();
        assert_eq!(status.run_id, run_id);
        assert!(status.match_success);
        assert!(gateway.find_run_status(RunId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stage_deadline_fires_while_store_is_busy() {
        use crate::pipeline::orchestrator::within;
        use std::time::Duration;

        let gateway = SqliteGateway::in_memory().unwrap();
        let busy = gateway.conn().unwrap();

        let result = within("extract", Duration::from_millis(50), gateway.find_active_masters("WI")).await;
        assert!(matches!(result, Err(ReconcileError::StageTimeout { stage: "extract", .. })));

        drop(busy);
    }
}
