// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Forwards device-published telemetry/heartbeat publishes arriving on
//! `tenant/{tenantId}/device/{deviceId}/{telemetry,heartbeat}` into [`IngestPipeline`]. Device
//! authentication already happened at MQTT CONNECT time (username/password, spec §6.1), so no
//! `X-Provision-Token` equivalent is checked per-message here.

use std::sync::Arc;

use fleetwire_core::ingest::{IngestPipeline, IngestRequest};
use fleetwire_mqtt::control_packet::Publish;
use fleetwire_mqtt::interface::{MqttAck, PubReceiver};
use fleetwire_mqtt::session::SessionPubReceiver;
use fleetwire_mqtt::topic::TopicName;
use tokio_util::sync::CancellationToken;

/// Parse `tenant/{tenantId}/device/{deviceId}/{telemetry|heartbeat|shadow}` into
/// `(tenant_id, device_id)`, rejecting anything that doesn't fit the expected shape.
fn parse_device_topic(topic: &str) -> Option<(String, String)> {
    let name = TopicName::from_string(topic.to_string()).ok()?;
    let segments: Vec<&str> = name.segments().collect();
    match segments.as_slice() {
        ["tenant", tenant_id, "device", device_id, _kind] => {
            Some(((*tenant_id).to_string(), (*device_id).to_string()))
        }
        _ => None,
    }
}

/// Drain `receiver` until the session exits or `cancel` fires, submitting every publish that
/// parses as a device topic to `pipeline`. Malformed topics are logged and dropped rather than
/// submitted, since there's no `(tenant_id, device_id)` to quarantine them under.
pub async fn run<A: MqttAck + Send + Sync + 'static>(
    mut receiver: SessionPubReceiver<A>,
    pipeline: Arc<IngestPipeline>,
    cancel: CancellationToken,
) {
    loop {
        let publish: Publish = tokio::select! {
            () = cancel.cancelled() => {
                log::info!("mqtt ingest listener stopping");
                return;
            }
            publish = receiver.recv() => {
                match publish {
                    Some(publish) => publish,
                    None => {
                        log::warn!("mqtt ingest listener: session exited, no more publishes");
                        return;
                    }
                }
            }
        };

        let topic = match String::from_utf8(publish.topic.to_vec()) {
            Ok(topic) => topic,
            Err(err) => {
                log::warn!("dropping publish with non-utf8 topic: {err}");
                continue;
            }
        };

        let Some((tenant_id, device_id)) = parse_device_topic(&topic) else {
            log::warn!("dropping publish on unrecognized topic '{topic}'");
            continue;
        };

        let outcome = pipeline
            .submit(IngestRequest {
                tenant_id,
                device_id,
                source: topic,
                provisioning_token: None,
                raw: publish.payload.to_vec(),
            })
            .await;
        if outcome == fleetwire_core::ingest::IngestOutcome::Backpressured {
            log::warn!("ingest pipeline backpressured, dropping publish");
        }
    }
}
