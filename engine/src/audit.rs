//! Audit logging.
//!
//! A thin layer over the audit store: one append operation and three
//! queries. Entries are provenance, never state — nothing reads them back
//! to make decisions.

use cycle_core::{
    error::Result,
    models::{AuditEntry, AuditReport, NewAuditEntry},
    store::AuditStore,
};
use std::sync::Arc;

/// Records and queries per-cycle audit entries.
pub struct AuditLogger<S> {
    store: Arc<S>,
}

impl<S: AuditStore> AuditLogger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Append one entry. Exactly one call per completed cycle.
    pub async fn record(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let recorded = self.store.record_audit(entry).await?;
        tracing::info!(
            cycle_id = %recorded.cycle_id,
            task_id = %recorded.task_id,
            from = %recorded.prev_state,
            to = %recorded.next_state,
            result = %recorded.result,
            "audit entry recorded"
        );
        Ok(recorded)
    }

    /// Entries for one task, ascending by time.
    pub async fn history(&self, task_id: &str) -> Result<Vec<AuditEntry>> {
        self.store.audit_history(task_id).await
    }

    /// The `n` most recent entries globally.
    pub async fn recent(&self, n: u32) -> Result<Vec<AuditEntry>> {
        self.store.recent_audits(n).await
    }

    /// Aggregate counts by state and the completion rate.
    pub async fn report(&self) -> Result<AuditReport> {
        self.store.audit_report().await
    }
}
