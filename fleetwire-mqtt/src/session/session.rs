// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! The [`Session`] run loop: connects, reconnects with backoff, and dispatches incoming
//! publishes to the receivers registered through a [`SessionManagedClient`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::v5::{Event, Incoming};
use tokio::sync::Notify;

use crate::connection_settings::MqttConnectionSettings;
use crate::control_packet::Publish;
use crate::interface::{MqttAck, MqttDisconnect};
use crate::rumqttc_adapter::RumqttcClient;
use crate::session::ack_coordinator::AckCoordinator;
use crate::session::connect_parameters::mqtt_options;
use crate::session::dispatcher::IncomingPublishDispatcher;
use crate::session::managed_client::{SessionManagedClient, SessionPubReceiver};
use crate::session::reconnect_policy::{ConnectionLossReason, ReconnectPolicy};
use crate::session::state::SessionState;
use crate::session::{SessionError, SessionErrorKind, SessionExitError, SessionExitErrorKind};
use crate::topic::{TopicFilter, TopicParseError};

/// Owns the connection to an MQTT broker, driving reconnection and dispatching incoming
/// publishes for as long as [`Session::run`] executes.
///
/// Use [`Session::create_managed_client`] to obtain a handle for publishing and registering
/// receivers, and [`Session::create_exit_handle`] to end the session from elsewhere.
pub struct Session {
    client: RumqttcClient,
    event_loop: rumqttc::v5::EventLoop,
    client_id: String,
    dispatcher: Arc<Mutex<IncomingPublishDispatcher>>,
    ack_coordinator: Arc<AckCoordinator<RumqttcClient>>,
    reconnect_policy: Box<dyn ReconnectPolicy>,
    state: Arc<SessionState>,
    notify_force_exit: Arc<Notify>,
}

impl Session {
    /// Create a new `Session` that will connect using `settings`.
    ///
    /// # Errors
    /// Returns a [`SessionError`] if `settings` cannot be translated into a connection attempt
    /// (e.g. an unreadable CA file).
    pub fn new(
        settings: &MqttConnectionSettings,
        reconnect_policy: Box<dyn ReconnectPolicy>,
    ) -> Result<Self, SessionError> {
        let options = mqtt_options(settings).map_err(SessionErrorKind::InvalidSettings)?;
        let (client, event_loop) = rumqttc::v5::AsyncClient::new(options, 256);
        let client = RumqttcClient(client);
        Ok(Self {
            client_id: settings.client_id.clone(),
            event_loop,
            ack_coordinator: Arc::new(AckCoordinator::new(client.clone())),
            client,
            dispatcher: Arc::new(Mutex::new(IncomingPublishDispatcher::default())),
            reconnect_policy,
            state: Arc::new(SessionState::default()),
            notify_force_exit: Arc::new(Notify::new()),
        })
    }

    /// Return a new [`SessionExitHandle`] that can be used to end this `Session`.
    #[must_use]
    pub fn create_exit_handle(&self) -> SessionExitHandle {
        SessionExitHandle {
            disconnector: self.client.clone(),
            state: self.state.clone(),
            force_exit: self.notify_force_exit.clone(),
        }
    }

    /// Return a new [`SessionConnectionMonitor`] that can be used to observe connection state.
    #[must_use]
    pub fn create_connection_monitor(&self) -> SessionConnectionMonitor {
        SessionConnectionMonitor {
            state: self.state.clone(),
        }
    }

    /// Return a new [`SessionManagedClient`] that can be used to publish and to register
    /// receivers for incoming publishes.
    #[must_use]
    pub fn create_managed_client(&self) -> SessionManagedClient<RumqttcClient> {
        SessionManagedClient::new(self.client_id.clone(), self.client.clone())
    }

    /// Register a new receiver for publishes matching `topic_filter`.
    ///
    /// # Errors
    /// Returns a [`TopicParseError`] if `topic_filter` is not a valid MQTT topic filter.
    pub fn create_filtered_pub_receiver(
        &self,
        topic_filter: &str,
        auto_ack: bool,
    ) -> Result<SessionPubReceiver<RumqttcClient>, TopicParseError> {
        let filter = TopicFilter::parse(topic_filter)?;
        let rx = self.dispatcher.lock().unwrap().create_filtered_receiver(filter);
        Ok(SessionPubReceiver::new(rx, self.ack_coordinator.clone(), auto_ack))
    }

    /// Run the session: connect, dispatch incoming publishes, and reconnect with backoff on
    /// failure, until a graceful or forced exit is requested or the reconnect policy gives up.
    ///
    /// # Errors
    /// Returns a [`SessionError`] describing why the session ended.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let mut prev_connected = false;
        let mut prev_reconnect_attempts = 0u32;
        let mut result = Ok(());

        loop {
            let next = tokio::select! {
                biased;
                () = self.notify_force_exit.notified() => break,
                next = self.event_loop.poll() => next,
            };

            match next {
                Ok(Event::Incoming(Incoming::ConnAck(connack))) => {
                    self.state.transition_connected();
                    prev_reconnect_attempts = 0;
                    log::debug!("incoming CONNACK: {connack:?}");

                    if prev_connected && !connack.session_present {
                        log::error!("mqtt session state not present on broker after reconnect");
                        result = Err(SessionErrorKind::SessionLost);
                        break;
                    }
                    prev_connected = true;
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    self.dispatch_incoming(publish).await;
                }
                Ok(_) => {}
                Err(e) if self.state.desire_exit() => {
                    log::debug!("connection ended during requested exit: {e}");
                    self.state.transition_disconnected();
                    break;
                }
                Err(e) => {
                    self.state.transition_disconnected();
                    log::error!("mqtt connection error: {e}");

                    let reason = ConnectionLossReason::IoError(std::io::Error::other(e.to_string()));
                    if let Some(delay) = self
                        .reconnect_policy
                        .connection_loss_reconnect_delay(&reason)
                        .filter(|_| self.reconnect_policy_allows(prev_reconnect_attempts))
                    {
                        log::info!("reconnecting in {delay:?}");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = self.notify_force_exit.notified() => {
                                result = Err(SessionErrorKind::ForceExit);
                                break;
                            }
                        }
                    } else {
                        result = Err(SessionErrorKind::ReconnectHalted);
                        break;
                    }
                    prev_reconnect_attempts += 1;
                }
            }
        }

        self.state.transition_exited();
        result.map_err(Into::into)
    }

    fn reconnect_policy_allows(&self, prev_attempts: u32) -> bool {
        self.reconnect_policy
            .connect_failure_reconnect_delay(prev_attempts)
            .is_some()
    }

    async fn dispatch_incoming(&self, publish: Publish) {
        log::debug!("incoming PUB on '{:?}' (pkid {})", publish.topic, publish.pkid);
        let num_dispatches = self.dispatcher.lock().unwrap().dispatch_publish(&publish);

        if num_dispatches == 0 {
            log::warn!("no receiver registered for publish, auto-acking (pkid {})", publish.pkid);
            let client = self.client.clone();
            tokio::spawn(async move {
                if let Err(e) = client.ack(&publish).await {
                    log::error!("auto-ack of unroutable publish failed: {e}");
                }
            });
            return;
        }

        if let Err(e) = self.ack_coordinator.register(&publish, num_dispatches).await {
            log::error!("failed to register publish for ack tracking: {e}");
        }
    }
}

/// Handle used to end a running [`Session`].
#[derive(Clone)]
pub struct SessionExitHandle {
    disconnector: RumqttcClient,
    state: Arc<SessionState>,
    force_exit: Arc<Notify>,
}

impl SessionExitHandle {
    /// Attempt to gracefully end the session. Requires the session to currently be connected.
    ///
    /// # Errors
    /// Returns [`SessionExitErrorKind::BrokerUnavailable`] if not currently connected.
    pub async fn try_exit(&self) -> Result<(), SessionExitError> {
        if !self.state.is_connected() {
            return Err(SessionExitErrorKind::BrokerUnavailable { attempted: false }.into());
        }
        self.state.transition_desire_exit();
        self.disconnector
            .disconnect()
            .await
            .map_err(SessionExitErrorKind::ClientError)?;

        tokio::select! {
            () = self.state.condition_exited() => Ok(()),
            () = self.state.condition_disconnected() => {
                Err(SessionExitErrorKind::BrokerUnavailable { attempted: true }.into())
            }
        }
    }

    /// As [`Self::try_exit`], but returns [`SessionExitErrorKind::Timeout`] if the graceful
    /// exit does not complete within `timeout`.
    ///
    /// # Errors
    /// Returns a [`SessionExitError`] if the exit is refused or does not complete in time.
    pub async fn try_exit_timeout(&self, timeout: Duration) -> Result<(), SessionExitError> {
        tokio::time::timeout(timeout, self.try_exit())
            .await
            .map_err(SessionExitErrorKind::Timeout)?
    }

    /// Forcefully end the session, granting a 1 second grace period for a graceful exit first.
    /// Returns true if the exit completed gracefully within the grace period.
    pub async fn exit_force(&self) -> bool {
        self.state.transition_desire_exit();
        let _ = self.disconnector.disconnect().await;

        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(1)) => {
                self.force_exit.notify_one();
                false
            }
            () = self.state.condition_exited() => true,
        }
    }
}

/// Read-only observer of a [`Session`]'s connection state.
#[derive(Clone)]
pub struct SessionConnectionMonitor {
    state: Arc<SessionState>,
}

impl SessionConnectionMonitor {
    /// Returns true if the session is currently connected, to the best of its knowledge.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Wait until the session is connected. Returns immediately if already connected.
    pub async fn connected(&self) {
        self.state.condition_connected().await;
    }

    /// Wait until the session is disconnected. Returns immediately if already disconnected.
    pub async fn disconnected(&self) {
        self.state.condition_disconnected().await;
    }
}
