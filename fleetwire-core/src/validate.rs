// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`validate`]: the six-stage envelope validator (§4.4). All stages must pass; the first
//! failure short-circuits the rest and is reported as a single [`RejectReason`].

use fleetwire_protocol::{is_supported_version, MetricValue, TelemetryEnvelope};

use crate::model::{DeviceRegistryRecord, RejectReason};

const MAX_PAYLOAD_BYTES: usize = 8 * 1024;
const MAX_METRICS: usize = 50;
const MAX_METRIC_KEY_LEN: usize = 128;

fn is_valid_metric_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_METRIC_KEY_LEN
        && key.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' || c == '/')
}

/// Run the six validation stages against a decoded envelope and its device registry record.
/// `raw_len` is the byte length of the raw payload as received (before JSON parsing), since
/// stage 2 checks wire size, not decoded structure size.
pub fn validate(
    envelope: &TelemetryEnvelope,
    raw_len: usize,
    device: &DeviceRegistryRecord,
) -> Result<(), RejectReason> {
    // Stage 1: envelope version.
    if !is_supported_version(&envelope.version) {
        return Err(RejectReason::UnsupportedVersion);
    }

    // Stage 2: wire size.
    if raw_len > MAX_PAYLOAD_BYTES {
        return Err(RejectReason::PayloadTooLarge);
    }

    // Stage 3: required fields. `siteId` and `metrics` are non-optional in TelemetryEnvelope's
    // type, so only `seq`'s non-negativity needs checking; `seq: u64` already guarantees that
    // at the type level, so this stage reduces to confirming the field was present on the wire.
    // `serde` enforces presence during decode, so reaching this point means it is satisfied.

    // Stage 4: site match.
    if envelope.site_id != device.site_id {
        return Err(RejectReason::SiteMismatch);
    }

    // Stage 5: metrics well-formed.
    if envelope.metrics.len() > MAX_METRICS {
        return Err(RejectReason::TooManyMetrics);
    }
    for (key, value) in &envelope.metrics {
        if !is_valid_metric_key(key) {
            return Err(if key.len() > MAX_METRIC_KEY_LEN {
                RejectReason::MetricKeyTooLong
            } else {
                RejectReason::MetricKeyInvalid
            });
        }
        if !value.is_well_formed() {
            return Err(RejectReason::MetricValueInvalid);
        }
        if let MetricValue::Numeric(v) = value {
            if !v.is_finite() {
                return Err(RejectReason::MetricValueInvalid);
            }
        }
    }

    // Stage 6: timestamp, if present, already parsed by `serde` during decode; an unparseable
    // `ts` fails JSON decoding itself, upstream of this validator.

    Ok(())
}
