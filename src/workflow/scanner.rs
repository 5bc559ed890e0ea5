//! Pending task discovery.

use super::store::{Scan, TaskRow, TaskStore};
use crate::integrations::FeishuResult;

/// Finds rows waiting to be processed.
pub struct TaskScanner<'a> {
    store: &'a dyn TaskStore,
}

impl<'a> TaskScanner<'a> {
    pub fn new(store: &'a dyn TaskStore) -> Self {
        Self { store }
    }

    /// Pending rows in remote order. Only one page is read; a partial scan
    /// is logged and reported through [`Scan::complete`].
    pub fn scan(&self) -> FeishuResult<Scan> {
        let scan = self.store.fetch_pending()?;
        if !scan.complete {
            tracing::warn!(
                found = scan.rows.len(),
                "table has more rows than one page; rows beyond it were not scanned"
            );
        }
        tracing::info!(pending = scan.rows.len(), "scanned task table");
        Ok(scan)
    }

    /// Reset the first row that has a stock code, or the given row.
    pub fn reset(&self, row_id: Option<&str>) -> FeishuResult<Option<TaskRow>> {
        let all = self.store.fetch_all()?;
        let target = match row_id {
            Some(id) => all.rows.into_iter().find(|r| r.row_id == id),
            None => all.rows.into_iter().find(|r| !r.stock_code.trim().is_empty()),
        };

        let Some(row) = target else {
            tracing::warn!(row_id = row_id.unwrap_or("<first with code>"), "no row to reset");
            return Ok(None);
        };

        self.store.reset_row(&row.row_id)?;
        Ok(Some(row))
    }
}
