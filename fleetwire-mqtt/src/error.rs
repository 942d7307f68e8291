// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Common error types for the broker client.

use thiserror::Error;

pub use crate::session::{SessionError, SessionErrorKind, SessionExitError, SessionExitErrorKind};
pub use crate::topic::TopicParseError;

/// Error executing an MQTT publish, subscribe, unsubscribe, or ack.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ClientError(#[from] ClientErrorKind);

/// Categories of [`ClientError`].
#[derive(Debug, Error)]
pub enum ClientErrorKind {
    /// The underlying client returned an error.
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::v5::ClientError),
    /// The session has already exited and can no longer be used.
    #[error("session has exited")]
    SessionExited,
}

/// Error encountered while driving the MQTT connection.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ConnectionError(#[from] ConnectionErrorKind);

/// Categories of [`ConnectionError`].
#[derive(Debug, Error)]
pub enum ConnectionErrorKind {
    /// The connection attempt failed.
    #[error("connection attempt failed: {0}")]
    ConnectFailure(#[from] rumqttc::v5::ConnectionError),
    /// The reconnect policy declined to retry further.
    #[error("reconnection halted by reconnect policy")]
    ReconnectHalted,
    /// The connection settings could not be translated into a connection attempt.
    #[error("invalid connection settings: {0}")]
    InvalidSettings(#[from] crate::session::connect_parameters::ConnectParametersError),
}
