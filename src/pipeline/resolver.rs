use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::app::ports::RepositoryGateway;
use crate::error::{ReconcileError, Result};

/// Picks the single catalog version a run matches against.
///
/// An explicit override wins but must itself be eligible. Otherwise the
/// eligible master with the lowest id is chosen so repeated runs agree.
pub struct CatalogResolver {
    gateway: Arc<dyn RepositoryGateway>,
    version_override: Option<String>,
}

impl CatalogResolver {
    pub fn new(gateway: Arc<dyn RepositoryGateway>, version_override: Option<String>) -> Self {
        Self {
            gateway,
            version_override,
        }
    }

    #[instrument(skip(self))]
    pub async fn resolve_active_version(&self, jurisdiction: &str) -> Result<String> {
        let masters = self.gateway.find_active_masters(jurisdiction).await?;
        if masters.is_empty() {
            return Err(ReconcileError::CatalogResolution {
                jurisdiction: jurisdiction.to_string(),
                reason: "no Active vehicle master covers this jurisdiction".to_string(),
            });
        }

        if let Some(wanted) = &self.version_override {
            if masters.iter().any(|m| &m.id == wanted) {
                info!(version_id = %wanted, "Using configured catalog version");
                return Ok(wanted.clone());
            }
            return Err(ReconcileError::CatalogResolution {
                jurisdiction: jurisdiction.to_string(),
                reason: format!("configured version '{wanted}' is not an eligible Active master"),
            });
        }

        let chosen = masters
            .iter()
            .map(|m| m.id.as_str())
            .min()
            .map(str::to_string)
            .ok_or_else(|| ReconcileError::CatalogResolution {
                jurisdiction: jurisdiction.to_string(),
                reason: "no eligible master ids".to_string(),
            })?;

        if masters.len() > 1 {
            warn!(
                eligible = masters.len(),
                version_id = %chosen,
                "Multiple Active vehicle masters; using lowest id"
            );
        }
        info!(version_id = %chosen, "Resolved active catalog version");
        Ok(chosen)
    }
}
