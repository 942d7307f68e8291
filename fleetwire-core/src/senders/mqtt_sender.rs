// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! MQTT-republish [`Sender`] (§4.11): publishes the event JSON to a templated topic at the
//! configured QoS, using the broker connection already held by the ingest side rather than
//! opening a second connection per delivery.

use async_trait::async_trait;

use fleetwire_mqtt::control_packet::QoS;
use fleetwire_mqtt::interface::MqttPubSub;

use super::{DeliveryOutcome, DeliveryRequest, Sender};

/// `destinationConfig` shape: `{ "topic": "tenant/{tenantId}/device/{deviceId}/out", "qos": 0|1,
/// "tenantId": "...", "deviceId": "..." }`.
pub struct MqttSender<PS: MqttPubSub + Clone + Send + Sync + 'static> {
    client: PS,
}

impl<PS: MqttPubSub + Clone + Send + Sync + 'static> MqttSender<PS> {
    /// Build a sender republishing over an already-connected client.
    #[must_use]
    pub fn new(client: PS) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<PS: MqttPubSub + Clone + Send + Sync + 'static> Sender for MqttSender<PS> {
    async fn send(&self, request: &DeliveryRequest) -> DeliveryOutcome {
        let config = &request.destination_config;
        let Some(topic_template) = config.get("topic").and_then(|v| v.as_str()) else {
            return DeliveryOutcome::terminal("MQTT destination config missing 'topic'");
        };
        let tenant_id = config.get("tenantId").and_then(|v| v.as_str()).unwrap_or("");
        let device_id = config.get("deviceId").and_then(|v| v.as_str()).unwrap_or("");
        let topic = fleetwire_mqtt::topic::TopicFilter::substitute_placeholders(topic_template, tenant_id, device_id);

        let qos = match config.get("qos").and_then(serde_json::Value::as_u64) {
            Some(1) => QoS::AtLeastOnce,
            _ => QoS::AtMostOnce,
        };

        let payload = match serde_json::to_vec(&request.payload) {
            Ok(payload) => payload,
            Err(err) => return DeliveryOutcome::terminal(format!("failed to serialize payload: {err}")),
        };

        match self.client.publish(topic, qos, false, payload).await {
            Ok(_) => DeliveryOutcome::ok(),
            Err(err) => DeliveryOutcome::retryable(format!("MQTT publish failed: {err}")),
        }
    }
}
