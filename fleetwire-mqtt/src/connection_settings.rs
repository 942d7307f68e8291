// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Connection settings for the broker client (spec §6.1: TLS on 8883, username/password
//! device auth).

use derive_builder::Builder;

/// Settings used to establish the MQTT connection for a [`crate::session::Session`].
#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
pub struct MqttConnectionSettings {
    /// Client identifier presented in the MQTT CONNECT packet.
    pub client_id: String,
    /// Broker hostname.
    pub host_name: String,
    /// Broker port. Defaults to the TLS port per spec §6.1.
    #[builder(default = "8883")]
    pub tcp_port: u16,
    /// Whether to negotiate TLS. Disable only for a network-isolated internal listener.
    #[builder(default = "true")]
    pub use_tls: bool,
    /// PEM-encoded CA certificate bundle used to validate the broker's certificate.
    #[builder(default)]
    pub ca_file: Option<String>,
    /// Device username, presented in the MQTT CONNECT packet.
    #[builder(default)]
    pub username: Option<String>,
    /// Device provisioning secret, presented as the MQTT CONNECT password.
    #[builder(default)]
    pub password: Option<String>,
    /// Keep-alive interval, in seconds.
    #[builder(default = "60")]
    pub keep_alive_secs: u16,
    /// Whether to request a clean MQTT session on first connect.
    #[builder(default = "true")]
    pub clean_start: bool,
}
