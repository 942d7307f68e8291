// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Wire-level envelope types and codecs shared by the HTTP and MQTT ingest paths: the
//! telemetry envelope, its metric value union, and the HMAC-SHA256 webhook signing helper.

#![warn(missing_docs)]

pub mod envelope;
pub mod hmac_sign;

pub use envelope::{EnvelopeDecodeError, MetricValue, TelemetryEnvelope, SUPPORTED_ENVELOPE_VERSIONS};
