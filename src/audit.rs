//! Best-effort audit trail.
//!
//! Audit rows are operational telemetry, not the billing ledger. A failed
//! write must never abort the operation being audited, so every failure is
//! downgraded to a warning here.

use crate::db::{AuditEntry, Database, now_timestamp};

/// Request metadata attached to audit rows when available.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Source IP.
    pub ip_address: Option<String>,
    /// User agent header.
    pub user_agent: Option<String>,
}

/// Writes audit entries, swallowing storage errors.
#[derive(Clone)]
pub struct AuditRecorder {
    db: Database,
}

impl AuditRecorder {
    /// Create a recorder over the shared database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record an action. Storage failures are logged and dropped.
    pub fn record(
        &self,
        user_id: Option<&str>,
        action: &str,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
        details: Option<serde_json::Value>,
        meta: &RequestMeta,
    ) {
        let entry = AuditEntry {
            id: 0, // Auto-increment
            user_id: user_id.map(String::from),
            action: action.to_string(),
            resource_type: resource_type.map(String::from),
            resource_id: resource_id.map(String::from),
            details: details.map(|d| d.to_string()),
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            created_at: now_timestamp(),
        };

        if let Err(e) = self.db.insert_audit_entry(&entry) {
            tracing::warn!(action = %action, error = %e, "Audit write failed");
        }
    }

    /// Shorthand for entries with no resource or detail payload.
    pub fn record_action(&self, user_id: Option<&str>, action: &str) {
        self.record(user_id, action, None, None, None, &RequestMeta::default());
    }
}
