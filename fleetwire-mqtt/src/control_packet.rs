// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Re-exports of MQTT control packet types from the underlying `rumqttc` backend, so that
//! callers of this crate do not need to take a direct dependency on it.

/// Quality of service level for a publish or subscription.
pub use rumqttc::v5::mqttbytes::QoS;

/// An incoming or outgoing MQTT PUBLISH packet.
pub use rumqttc::v5::mqttbytes::v5::Publish;
/// Properties attached to a PUBLISH packet.
pub use rumqttc::v5::mqttbytes::v5::PublishProperties;
/// Properties attached to a SUBSCRIBE packet.
pub use rumqttc::v5::mqttbytes::v5::SubscribeProperties;
/// Properties attached to an UNSUBSCRIBE packet.
pub use rumqttc::v5::mqttbytes::v5::UnsubscribeProperties;
/// Properties attached to a CONNECT packet.
pub use rumqttc::v5::mqttbytes::v5::ConnectProperties;
/// Properties attached to a DISCONNECT packet.
pub use rumqttc::v5::mqttbytes::v5::DisconnectProperties;
/// Reason a DISCONNECT packet was sent.
pub use rumqttc::v5::mqttbytes::v5::DisconnectReasonCode;
