use std::sync::Arc;

use tracing::{info, warn};

use super::domain::ShiftCatalog;
use crate::remote::{HrApi, RemoteError};

/// Read-only lookup of the company's active shifts.
#[derive(Clone)]
pub struct ShiftResolver {
    api: Arc<dyn HrApi>,
}

impl ShiftResolver {
    pub fn new(api: Arc<dyn HrApi>) -> Self {
        Self { api }
    }

    /// Shifts in the order the service returned them.
    pub async fn list_active_shifts(&self, company_id: &str) -> Result<ShiftCatalog, RemoteError> {
        let shifts = self.api.list_active_shifts(company_id).await?;
        info!(company_id, count = shifts.len(), "active shifts fetched");
        Ok(ShiftCatalog::new(shifts))
    }

    /// Like [`Self::list_active_shifts`], but a failure yields an empty catalog.
    pub async fn list_or_empty(&self, company_id: &str) -> (ShiftCatalog, Option<RemoteError>) {
        match self.list_active_shifts(company_id).await {
            Ok(catalog) => (catalog, None),
            Err(err) => {
                warn!(company_id, error = %err, "shift list unavailable");
                (ShiftCatalog::default(), Some(err))
            }
        }
    }
}
