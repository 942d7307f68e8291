// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! SMTP [`Sender`] (§4.11): STARTTLS-preferred, subject/body templated with
//! `{severity, alert_type, device_id, message, timestamp}` substitutions.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{DeliveryOutcome, DeliveryRequest, Sender};

fn substitute(template: &str, payload: &serde_json::Value) -> String {
    let get = |key: &str| payload.get(key).map(|v| v.to_string()).unwrap_or_default();
    template
        .replace("{severity}", &get("severity").trim_matches('"'))
        .replace("{alert_type}", &get("alertType").trim_matches('"'))
        .replace("{device_id}", &get("deviceId").trim_matches('"'))
        .replace("{message}", &get("summary").trim_matches('"'))
        .replace("{timestamp}", &chrono::Utc::now().to_rfc3339())
}

/// `destinationConfig` shape: `{ "host": "...", "port": 587, "username": "...",
/// "password": "...", "from": "...", "to": ["..."], "subjectTemplate": "...",
/// "bodyTemplate": "..." }`.
pub struct SmtpSender;

impl SmtpSender {
    /// Build an SMTP sender. Each send builds its own transport from the destination config,
    /// since recipients vary per-integration rather than being fixed at construction time.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for SmtpSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sender for SmtpSender {
    async fn send(&self, request: &DeliveryRequest) -> DeliveryOutcome {
        let config = &request.destination_config;
        let (Some(host), Some(from), Some(to)) = (
            config.get("host").and_then(|v| v.as_str()),
            config.get("from").and_then(|v| v.as_str()),
            config.get("to").and_then(|v| v.as_array()),
        ) else {
            return DeliveryOutcome::terminal("SMTP destination config missing host/from/to");
        };

        let subject_template = config.get("subjectTemplate").and_then(|v| v.as_str()).unwrap_or("FleetWire alert: {alert_type}");
        let body_template = config
            .get("bodyTemplate")
            .and_then(|v| v.as_str())
            .unwrap_or("{device_id} raised {alert_type} ({severity}): {message} at {timestamp}");
        let subject = substitute(subject_template, &request.payload);
        let body = substitute(body_template, &request.payload);

        let from_mailbox: Mailbox = match from.parse() {
            Ok(m) => m,
            Err(err) => return DeliveryOutcome::terminal(format!("invalid 'from' address: {err}")),
        };

        let mut builder = Message::builder().from(from_mailbox).subject(subject);
        for recipient in to {
            let Some(addr) = recipient.as_str() else {
                return DeliveryOutcome::terminal("SMTP 'to' entry is not a string");
            };
            let mailbox: Mailbox = match addr.parse() {
                Ok(m) => m,
                Err(err) => return DeliveryOutcome::terminal(format!("invalid recipient address '{addr}': {err}")),
            };
            builder = builder.to(mailbox);
        }

        let message = match builder.multipart(
            MultiPart::alternative()
                .singlepart(SinglePart::plain(body.clone()))
                .singlepart(SinglePart::html(format!("<p>{body}</p>"))),
        ) {
            Ok(message) => message,
            Err(err) => return DeliveryOutcome::terminal(format!("failed to build message: {err}")),
        };

        let mut transport_builder = match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host) {
            Ok(builder) => builder,
            Err(err) => return DeliveryOutcome::retryable(format!("SMTP relay setup failed: {err}")),
        };
        if let (Some(username), Some(password)) = (
            config.get("username").and_then(|v| v.as_str()),
            config.get("password").and_then(|v| v.as_str()),
        ) {
            transport_builder =
                transport_builder.credentials(Credentials::new(username.to_string(), password.to_string()));
        }
        let transport = transport_builder.build();

        match transport.send(message).await {
            Ok(_) => DeliveryOutcome::ok(),
            // lettre surfaces transport/IO failures and SMTP 4xx/5xx replies through the same
            // error type without a reliable permanent/transient split; treat all send failures
            // as retryable (network blip, relay overloaded, recipient greylisted) and let the
            // delivery worker's attempt cap bound the retries.
            Err(err) => DeliveryOutcome::retryable(format!("SMTP error: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_all_placeholders() {
        let payload = serde_json::json!({
            "severity": 3,
            "alertType": "THRESHOLD",
            "deviceId": "d1",
            "summary": "temp_c GT 80",
        });
        let result = substitute("{device_id}: {alert_type} sev={severity} - {message}", &payload);
        assert_eq!(result, "d1: THRESHOLD sev=3 - temp_c GT 80");
    }

    #[tokio::test]
    async fn missing_fields_are_terminal() {
        let sender = SmtpSender::new();
        let outcome = sender
            .send(&DeliveryRequest {
                payload: serde_json::json!({}),
                destination_config: serde_json::json!({}),
            })
            .await;
        assert!(!outcome.success);
        assert!(!outcome.retryable);
    }
}
