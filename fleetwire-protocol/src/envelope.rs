// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! The wire-level telemetry envelope shared by the MQTT and HTTP ingest paths.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope versions this build understands. Only `"1"` exists today.
pub const SUPPORTED_ENVELOPE_VERSIONS: &[&str] = &["1"];

/// Returns true if `version` is one this build can parse.
#[must_use]
pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_ENVELOPE_VERSIONS.contains(&version)
}

/// A single metric reading: either a finite number or a boolean.
///
/// Serializes as a bare JSON number or boolean, matching the wire shape of `metrics` entries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// A finite `f64`. NaN and infinities are rejected at construction, not at serde time.
    Numeric(f64),
    /// A boolean reading (e.g. a digital input).
    Boolean(bool),
}

impl MetricValue {
    /// Returns the numeric value, if this is [`MetricValue::Numeric`].
    #[must_use]
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            MetricValue::Numeric(v) => Some(*v),
            MetricValue::Boolean(_) => None,
        }
    }

    /// True if this metric carries a finite, non-NaN numeric value, or is boolean.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match self {
            MetricValue::Numeric(v) => v.is_finite(),
            MetricValue::Boolean(_) => true,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Numeric(v) => write!(f, "{v}"),
            MetricValue::Boolean(v) => write!(f, "{v}"),
        }
    }
}

/// Errors that can occur while decoding a raw payload into a [`TelemetryEnvelope`].
#[derive(Debug, Error)]
pub enum EnvelopeDecodeError {
    /// The payload was not valid JSON, or did not match the envelope shape at all.
    #[error("malformed envelope JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The envelope declared a version this build does not understand.
    #[error("unsupported envelope version '{0}'")]
    UnsupportedVersion(String),
}

/// The device-submitted telemetry envelope, as received over MQTT or HTTPS.
///
/// This is the transient wire shape; size and content checks beyond basic JSON well-formedness
/// are the validator's job, not this type's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEnvelope {
    /// Envelope schema version, checked against [`SUPPORTED_ENVELOPE_VERSIONS`].
    #[serde(default = "default_version")]
    pub version: String,
    /// Tenant the device belongs to.
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    /// Device identifier within the tenant.
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Site identifier, checked against the device registry record at validation time.
    #[serde(rename = "siteId")]
    pub site_id: String,
    /// Monotonic-per-device sequence number.
    pub seq: u64,
    /// Device-reported timestamp. If absent, the ingest-time stamp is used instead.
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
    /// Metric readings by name.
    pub metrics: HashMap<String, MetricValue>,
}

fn default_version() -> String {
    "1".to_string()
}

impl TelemetryEnvelope {
    /// Parse a raw JSON payload into an envelope, rejecting unsupported versions up front.
    ///
    /// This only checks shape and version; size limits, metric-name grammar, and site
    /// consistency are enforced by the validator, which needs registry context this type
    /// does not have.
    ///
    /// # Errors
    /// Returns [`EnvelopeDecodeError::Malformed`] if `raw` is not valid envelope JSON, or
    /// [`EnvelopeDecodeError::UnsupportedVersion`] if the declared version is unrecognized.
    pub fn decode(raw: &[u8]) -> Result<Self, EnvelopeDecodeError> {
        let envelope: TelemetryEnvelope = serde_json::from_slice(raw)?;
        if !is_supported_version(&envelope.version) {
            return Err(EnvelopeDecodeError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }

    /// Resolve the effective timestamp: the device-reported `ts` if present, else `ingest_time`.
    #[must_use]
    pub fn effective_timestamp(&self, ingest_time: DateTime<Utc>) -> DateTime<Utc> {
        self.ts.unwrap_or(ingest_time)
    }
}
