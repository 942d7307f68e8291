// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Implements this crate's narrow client traits on top of the real `rumqttc` v5 client, so
//! the rest of the crate never needs to name `rumqttc` types directly.

use async_trait::async_trait;
use bytes::Bytes;

use crate::control_packet::{Publish, PublishProperties, QoS};
use crate::error::{ClientError, ClientErrorKind};
use crate::interface::{CompletionToken, MqttAck, MqttDisconnect, MqttPubSub};

/// Thin wrapper over `rumqttc::v5::AsyncClient` implementing [`MqttPubSub`], [`MqttAck`] and
/// [`MqttDisconnect`].
#[derive(Clone)]
pub struct RumqttcClient(pub rumqttc::v5::AsyncClient);

fn map_client_error(e: rumqttc::v5::ClientError) -> ClientError {
    ClientErrorKind::Client(e).into()
}

#[async_trait]
impl MqttPubSub for RumqttcClient {
    async fn publish(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
    ) -> Result<CompletionToken, ClientError> {
        self.0
            .publish(topic, qos, retain, payload)
            .await
            .map(CompletionToken)
            .map_err(map_client_error)
    }

    async fn publish_with_properties(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
        properties: PublishProperties,
    ) -> Result<CompletionToken, ClientError> {
        self.0
            .publish_with_properties(topic, qos, retain, payload, properties)
            .await
            .map(CompletionToken)
            .map_err(map_client_error)
    }

    async fn subscribe(
        &self,
        topic_filter: impl Into<String> + Send,
        qos: QoS,
    ) -> Result<CompletionToken, ClientError> {
        self.0
            .subscribe(topic_filter, qos)
            .await
            .map(CompletionToken)
            .map_err(map_client_error)
    }

    async fn unsubscribe(
        &self,
        topic_filter: impl Into<String> + Send,
    ) -> Result<CompletionToken, ClientError> {
        self.0
            .unsubscribe(topic_filter)
            .await
            .map(CompletionToken)
            .map_err(map_client_error)
    }
}

#[async_trait]
impl MqttAck for RumqttcClient {
    async fn ack(&self, publish: &Publish) -> Result<(), ClientError> {
        self.0.ack(publish).await.map_err(map_client_error)
    }
}

#[async_trait]
impl MqttDisconnect for RumqttcClient {
    async fn disconnect(&self) -> Result<(), ClientError> {
        self.0.disconnect().await.map_err(map_client_error)
    }
}
