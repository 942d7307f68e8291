// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Append-only log of operator actions, written synchronously before an operator-mode
//! [`crate::scope::Scope`] becomes usable.

use std::sync::Mutex;

use chrono::Utc;

use crate::model::AuditRecord;

/// In-process append-only audit sink. Never scoped by tenant; readers see every record.
#[derive(Default)]
pub struct AuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl AuditLog {
    /// Create an empty audit log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record for an operator action about to be performed.
    pub fn record(
        &self,
        operator_id: impl Into<String>,
        action: impl Into<String>,
        target_tenant: Option<String>,
        request_ip: impl Into<String>,
        result_code: u16,
    ) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            operator_id: operator_id.into(),
            action: action.into(),
            target_tenant,
            request_ip: request_ip.into(),
            result_code,
        };
        log::info!(
            "operator audit: operator_id={} action={} target_tenant={:?}",
            record.operator_id,
            record.action,
            record.target_tenant
        );
        self.records.lock().unwrap().push(record);
    }

    /// Snapshot all recorded entries, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_in_order() {
        let log = AuditLog::new();
        log.record("op1", "list_devices", None, "127.0.0.1", 200);
        log.record("op1", "list_devices", Some("t1".to_string()), "127.0.0.1", 200);

        let all = log.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].target_tenant.as_deref(), Some("t1"));
    }
}
