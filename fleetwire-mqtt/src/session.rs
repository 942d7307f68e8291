// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Manages a single logical MQTT session: connection lifecycle, reconnection, and dispatch of
//! incoming publishes to registered receivers.

mod ack_coordinator;
pub mod connect_parameters;
mod dispatcher;
mod managed_client;
pub mod reconnect_policy;
#[allow(clippy::module_inception)]
mod session;
mod state;

use thiserror::Error;

pub use managed_client::{SessionManagedClient, SessionPubReceiver};
pub use reconnect_policy::{ConnectionLossReason, ExponentialBackoffWithJitter, ReconnectPolicy};
pub use session::{Session, SessionConnectionMonitor, SessionExitHandle};

/// Error returned by [`Session::run`].
#[derive(Debug, Error)]
#[error(transparent)]
pub struct SessionError(#[from] pub(crate) SessionErrorKind);

/// Categories of [`SessionError`].
#[derive(Debug, Error)]
pub enum SessionErrorKind {
    /// The broker reported that the MQTT session was not resumed after a reconnect.
    #[error("mqtt session state lost on broker after reconnect")]
    SessionLost,
    /// The connection failed in a way the reconnect policy declined to retry.
    #[error(transparent)]
    ConnectionError(#[from] crate::error::ConnectionError),
    /// The reconnect policy halted further reconnect attempts.
    #[error("reconnect attempts halted by reconnect policy")]
    ReconnectHalted,
    /// [`SessionExitHandle::exit_force`] was used to end the session.
    #[error("session was force-exited")]
    ForceExit,
    /// The connection settings could not be used to open a connection.
    #[error(transparent)]
    InvalidSettings(#[from] connect_parameters::ConnectParametersError),
}

/// Error returned by [`SessionExitHandle::try_exit`] / [`SessionExitHandle::try_exit_timeout`].
#[derive(Debug, Error)]
#[error(transparent)]
pub struct SessionExitError(#[from] pub(crate) SessionExitErrorKind);

/// Categories of [`SessionExitError`].
#[derive(Debug, Error)]
pub enum SessionExitErrorKind {
    /// The broker connection was not available to negotiate a graceful exit.
    #[error("broker unavailable for graceful exit (disconnect attempted: {attempted})")]
    BrokerUnavailable {
        /// Whether a disconnect was sent to the broker before this error was returned.
        attempted: bool,
    },
    /// The underlying disconnect attempt failed.
    #[error(transparent)]
    ClientError(#[from] crate::error::ClientError),
    /// The graceful exit did not complete within the requested timeout.
    #[error("graceful exit timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
}
