// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! HTTP/webhook [`Sender`] (§4.11): POSTs the event JSON, HMAC-signs the body when the
//! destination config carries a secret, follows no redirects, and SSRF-guards the URL both
//! before and at send time, pinning the connection to the exact address validated at send
//! time so a DNS answer that changes between the two checks (rebinding) can't slip through.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::ssrf_guard::guard_and_resolve;

use super::{DeliveryOutcome, DeliveryRequest, Sender};

/// `destinationConfig` shape: `{ "url": "...", "secret": "..." }` (`secret` optional).
pub struct WebhookSender {
    timeout: Duration,
}

impl WebhookSender {
    /// Build a sender with the given per-request timeout. Redirects are disabled; callers
    /// relying on a redirecting endpoint should point the route at the final URL directly. No
    /// `Client` is built up front: each send resolves its destination fresh and builds a
    /// client pinned to that one address, so connection pooling isn't shared across
    /// destinations here.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Sender for WebhookSender {
    async fn send(&self, request: &DeliveryRequest) -> DeliveryOutcome {
        let Some(url) = request.destination_config.get("url").and_then(|v| v.as_str()) else {
            return DeliveryOutcome::terminal("webhook destination config missing 'url'");
        };
        if let Err(err) = guard_and_resolve(url) {
            return DeliveryOutcome::terminal(format!("SSRF guard rejected webhook URL: {err}"));
        }

        let body = match serde_json::to_vec(&request.payload) {
            Ok(body) => body,
            Err(err) => return DeliveryOutcome::terminal(format!("failed to serialize payload: {err}")),
        };

        // Re-resolve immediately before connecting (spec §4.12): a DNS answer that changed
        // since the check above would otherwise let a rebinding attack through. The client
        // built here is pinned to this exact address via `resolve`, so the request can't
        // independently re-resolve the hostname to something else.
        let destination = match guard_and_resolve(url) {
            Ok(destination) => destination,
            Err(err) => {
                return DeliveryOutcome::terminal(format!("SSRF guard rejected webhook URL at send time: {err}"))
            }
        };
        let client = match Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .resolve(&destination.host, destination.addr)
            .build()
        {
            Ok(client) => client,
            Err(err) => return DeliveryOutcome::terminal(format!("failed to build pinned client: {err}")),
        };

        let mut builder = client.post(url).header("Content-Type", "application/json");

        if let Some(secret) = request.destination_config.get("secret").and_then(|v| v.as_str()) {
            let signature = fleetwire_protocol::hmac_sign::sign(secret.as_bytes(), &body);
            builder = builder.header(fleetwire_protocol::hmac_sign::SIGNATURE_HEADER, signature);
        }

        match builder.body(body).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    DeliveryOutcome::ok()
                } else if status.as_u16() == 429 {
                    DeliveryOutcome::retryable("HTTP 429; honoring Retry-After upstream")
                } else if status.is_server_error() {
                    DeliveryOutcome::retryable(format!("HTTP {status}"))
                } else {
                    DeliveryOutcome::terminal(format!("HTTP {status}"))
                }
            }
            Err(err) if err.is_timeout() || err.is_connect() => {
                DeliveryOutcome::retryable(format!("network error: {err}"))
            }
            Err(err) => DeliveryOutcome::terminal(format!("request error: {err}")),
        }
    }
}
