// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! The client and receiver types handed out by a [`crate::session::Session`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::control_packet::{Publish, PublishProperties, QoS};
use crate::error::{ClientError, ClientErrorKind};
use crate::interface::{CompletionToken, MqttAck, MqttPubSub, PubReceiver};
use crate::session::ack_coordinator::AckCoordinator;

/// Send-only view of a `Session`'s underlying MQTT client. Cloned freely; all clones share
/// the same connection.
#[derive(Clone)]
pub struct SessionManagedClient<PS>
where
    PS: MqttPubSub + Clone + Send + Sync,
{
    client_id: String,
    pub_sub: PS,
}

impl<PS> SessionManagedClient<PS>
where
    PS: MqttPubSub + Clone + Send + Sync,
{
    pub fn new(client_id: String, pub_sub: PS) -> Self {
        Self { client_id, pub_sub }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl<PS> MqttPubSub for SessionManagedClient<PS>
where
    PS: MqttPubSub + Clone + Send + Sync,
{
    async fn publish(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
    ) -> Result<CompletionToken, ClientError> {
        self.pub_sub.publish(topic, qos, retain, payload).await
    }

    async fn publish_with_properties(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
        properties: PublishProperties,
    ) -> Result<CompletionToken, ClientError> {
        self.pub_sub
            .publish_with_properties(topic, qos, retain, payload, properties)
            .await
    }

    async fn subscribe(
        &self,
        topic_filter: impl Into<String> + Send,
        qos: QoS,
    ) -> Result<CompletionToken, ClientError> {
        self.pub_sub.subscribe(topic_filter, qos).await
    }

    async fn unsubscribe(
        &self,
        topic_filter: impl Into<String> + Send,
    ) -> Result<CompletionToken, ClientError> {
        self.pub_sub.unsubscribe(topic_filter).await
    }
}

/// Receives incoming publishes matching one registered topic filter, and acknowledges them
/// (directly, or automatically on drop) through a shared [`AckCoordinator`].
pub struct SessionPubReceiver<A: MqttAck> {
    pub_rx: UnboundedReceiver<Publish>,
    coordinator: Arc<AckCoordinator<A>>,
    auto_ack: bool,
}

impl<A: MqttAck> SessionPubReceiver<A> {
    pub fn new(
        pub_rx: UnboundedReceiver<Publish>,
        coordinator: Arc<AckCoordinator<A>>,
        auto_ack: bool,
    ) -> Self {
        Self {
            pub_rx,
            coordinator,
            auto_ack,
        }
    }
}

#[async_trait]
impl<A: MqttAck + Send + Sync + 'static> PubReceiver for SessionPubReceiver<A> {
    async fn recv(&mut self) -> Option<Publish> {
        let publish = self.pub_rx.recv().await?;
        if self.auto_ack {
            if let Err(e) = self.coordinator.local_ack(&publish).await {
                log::error!("auto-ack failed for pkid {}: {e}", publish.pkid);
            }
        }
        Some(publish)
    }
}

#[async_trait]
impl<A: MqttAck + Send + Sync> MqttAck for SessionPubReceiver<A> {
    async fn ack(&self, publish: &Publish) -> Result<(), ClientError> {
        self.coordinator
            .local_ack(publish)
            .await
            .map_err(|_| ClientError::from(ClientErrorKind::SessionExited))
    }
}

impl<A: MqttAck> Drop for SessionPubReceiver<A> {
    fn drop(&mut self) {
        self.pub_rx.close();
        while let Ok(publish) = self.pub_rx.try_recv() {
            log::warn!(
                "dropping receiver with unacked publish (pkid {}), auto-acking",
                publish.pkid
            );
            let coordinator = self.coordinator.clone();
            tokio::task::spawn(async move {
                if let Err(e) = coordinator.local_ack(&publish).await {
                    log::error!("failed to auto-ack on drop: {e}");
                }
            });
        }
    }
}
