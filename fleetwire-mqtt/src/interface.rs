// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Traits defining sets and subsets of MQTT client functionality, so that components that
//! only need to publish, or only need to receive, can depend on a narrow interface rather
//! than a concrete client.

use async_trait::async_trait;
use bytes::Bytes;

use crate::control_packet::{Publish, PublishProperties, QoS};
use crate::error::ClientError;
use crate::topic::TopicParseError;

/// Awaitable token indicating completion (broker acknowledgement) of an outgoing MQTT
/// operation.
pub struct CompletionToken(pub rumqttc::v5::NoticeFuture);

impl CompletionToken {
    /// Wait for the broker to acknowledge the operation.
    ///
    /// # Errors
    /// Returns a [`ClientError`] if the broker reports the operation failed.
    pub async fn wait(self) -> Result<(), ClientError> {
        self.0
            .wait_async()
            .await
            .map_err(|e| ClientError::from(crate::error::ClientErrorKind::Client(e.into())))
    }
}

/// MQTT publish, subscribe and unsubscribe functionality.
#[async_trait]
pub trait MqttPubSub: Send + Sync {
    /// Publish a message. Queued and delivered once the connection is (re-)established if
    /// currently disconnected.
    async fn publish(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
    ) -> Result<CompletionToken, ClientError>;

    /// Publish a message with MQTT 5 properties attached.
    async fn publish_with_properties(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
        properties: PublishProperties,
    ) -> Result<CompletionToken, ClientError>;

    /// Subscribe to a topic filter.
    async fn subscribe(
        &self,
        topic_filter: impl Into<String> + Send,
        qos: QoS,
    ) -> Result<CompletionToken, ClientError>;

    /// Unsubscribe from a topic filter.
    async fn unsubscribe(&self, topic_filter: impl Into<String> + Send)
        -> Result<CompletionToken, ClientError>;
}

/// Provides functionality for acknowledging a received Publish message (QoS 1).
#[async_trait]
pub trait MqttAck: Send + Sync {
    /// Acknowledge a received Publish.
    async fn ack(&self, publish: &Publish) -> Result<(), ClientError>;
}

/// MQTT disconnect functionality.
#[async_trait]
pub trait MqttDisconnect: Send + Sync {
    /// Disconnect from the MQTT broker.
    async fn disconnect(&self) -> Result<(), ClientError>;
}

/// An MQTT client whose connection state is externally managed (by a [`crate::session::Session`]).
/// Used to send messages and create receivers for incoming messages.
pub trait ManagedClient: MqttPubSub {
    /// Receiver type produced by this client.
    type PubReceiver: PubReceiver + MqttAck;

    /// The client id of the underlying MQTT connection.
    fn client_id(&self) -> &str;

    /// Create a new [`PubReceiver`] that receives messages matching `topic_filter`.
    ///
    /// # Errors
    /// Returns a [`TopicParseError`] if `topic_filter` is not a valid MQTT topic filter.
    fn create_filtered_pub_receiver(
        &self,
        topic_filter: &str,
        auto_ack: bool,
    ) -> Result<Self::PubReceiver, TopicParseError>;
}

/// Receiver for incoming MQTT messages matching a registered topic filter.
#[async_trait]
pub trait PubReceiver: Send {
    /// Receive the next incoming publish. Returns `None` once no more publishes will arrive
    /// (the [`crate::session::Session`] has exited).
    async fn recv(&mut self) -> Option<Publish>;
}
