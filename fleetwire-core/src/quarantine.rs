// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`Quarantine`]: append-only sink for payloads that failed validation or that a batch
//! writer could not persist after retrying. Distinct from the dead-letter queue, which holds
//! failed *deliveries* rather than rejected *ingest* payloads.

use std::sync::Mutex;

use chrono::Utc;

use crate::model::{QuarantineRecord, RejectReason};

/// In-process append-only quarantine sink.
#[derive(Default)]
pub struct Quarantine {
    records: Mutex<Vec<QuarantineRecord>>,
}

impl Quarantine {
    /// Create an empty quarantine sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rejected ingest payload.
    pub fn record(
        &self,
        tenant_id: Option<String>,
        topic: impl Into<String>,
        reason: RejectReason,
        payload: Vec<u8>,
    ) {
        let record = QuarantineRecord {
            tenant_id,
            topic: topic.into(),
            reason,
            payload,
            captured_at: Utc::now(),
        };
        log::warn!(
            "quarantined payload: tenant_id={:?} topic={} reason={}",
            record.tenant_id,
            record.topic,
            record.reason
        );
        self.records.lock().unwrap().push(record);
    }

    /// Snapshot all quarantined records, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<QuarantineRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Number of records currently quarantined.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// True if no records have been quarantined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
