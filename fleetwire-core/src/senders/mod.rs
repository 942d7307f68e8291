// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Protocol senders: a normalized [`DeliveryRequest`] in, a normalized [`DeliveryOutcome`] out
//! (§4.11). Each sender hides its own protocol's quirks (HMAC signing, STARTTLS negotiation,
//! SNMP auth/priv parameters) behind that same shape, so [`crate::delivery`] never branches on
//! integration kind beyond choosing which sender to call.

pub mod mqtt_sender;
pub mod smtp_sender;
pub mod snmp_sender;
pub mod webhook_sender;

use async_trait::async_trait;

/// A normalized outbound delivery request, built from a [`crate::model::DeliveryJob`]'s
/// payload and its integration's configuration.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Event payload, serialized as the sender's wire format requires.
    pub payload: serde_json::Value,
    /// Destination-kind-specific configuration (URL, recipients, community string, topic...).
    pub destination_config: serde_json::Value,
}

/// Result of one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Whether a failure should be retried (§4.10's error classification).
    pub retryable: bool,
    /// Error detail, if `success` is `false`.
    pub error: Option<String>,
}

impl DeliveryOutcome {
    /// Build a success outcome.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            retryable: false,
            error: None,
        }
    }

    /// Build a retryable failure outcome.
    #[must_use]
    pub fn retryable(error: impl Into<String>) -> Self {
        Self {
            success: false,
            retryable: true,
            error: Some(error.into()),
        }
    }

    /// Build a terminal (non-retryable) failure outcome.
    #[must_use]
    pub fn terminal(error: impl Into<String>) -> Self {
        Self {
            success: false,
            retryable: false,
            error: Some(error.into()),
        }
    }
}

/// Protocol-specific delivery sender.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Attempt one delivery. Never retries internally; retry/backoff is the caller's job.
    async fn send(&self, request: &DeliveryRequest) -> DeliveryOutcome;
}
