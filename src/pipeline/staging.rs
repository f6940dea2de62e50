use std::sync::Arc;
use tracing::{debug, error};

use crate::app::ports::RepositoryGateway;
use crate::domain::{StagedPair, StagingRecord, StagingStore};
use crate::error::{ReconcileError, Result};
use crate::metrics;

/// Writes matcher output to the new-values and audit-log staging stores.
///
/// The new-values record goes first. The audit record is only written once
/// that succeeds, and a failed audit write removes the new-values record so
/// the applier never sees a change without its audit entry.
pub struct StagingWriter {
    gateway: Arc<dyn RepositoryGateway>,
}

impl StagingWriter {
    pub fn new(gateway: Arc<dyn RepositoryGateway>) -> Self {
        Self { gateway }
    }

    pub async fn stage(&self, pair: &StagedPair) -> Result<()> {
        let new_values = StagingRecord::NewValues(pair.new_record.clone());
        if let Err(e) = self.gateway.insert_staging(&new_values).await {
            metrics::staging_write_error();
            return Err(ReconcileError::write_failure(StagingStore::NewValues.collection_name(), &e));
        }

        let audit = StagingRecord::AuditLog(pair.update_log.clone());
        if let Err(e) = self.gateway.insert_staging(&audit).await {
            metrics::staging_write_error();
            let staging_id = pair.new_record.staging_id;
            match self.gateway.delete_staging(StagingStore::NewValues, staging_id).await {
                Ok(_) => debug!(%staging_id, "Withdrew new-values record after audit write failure"),
                Err(cleanup) => error!(
                    %staging_id,
                    error = %cleanup,
                    "Could not withdraw new-values record; staged pair is incomplete"
                ),
            }
            return Err(ReconcileError::write_failure(StagingStore::AuditLog.collection_name(), &e));
        }

        metrics::pair_staged();
        Ok(())
    }
}
