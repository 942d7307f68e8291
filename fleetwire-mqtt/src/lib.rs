// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Managed MQTT v5 client abstraction used by the ingest pipeline and route dispatcher to
//! receive device telemetry and republish routed messages.

pub use crate::connection_settings::{
    MqttConnectionSettings, MqttConnectionSettingsBuilder, MqttConnectionSettingsBuilderError,
};

mod connection_settings;
pub mod control_packet;
pub mod error;
pub mod interface;
mod rumqttc_adapter;
pub mod session;
pub mod topic;

/// Event yielded by the event loop.
pub type Event = rumqttc::v5::Event;
/// Incoming packet kind yielded by the event loop.
pub type Incoming = rumqttc::v5::Incoming;
