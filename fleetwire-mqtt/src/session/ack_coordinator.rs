// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Tracks acknowledgement of incoming publishes that have been fanned out to more than one
//! [`crate::interface::PubReceiver`], and sends the real acknowledgement to the broker only
//! once every receiver has processed its copy, in PKID order.
//!
//! A single incoming publish may be dispatched to several receivers (overlapping topic
//! filters). The broker must see exactly one ack per PKID, and acks must be sent in the order
//! the publishes were received, or the broker may redeliver everything behind a gap.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use crate::control_packet::Publish;
use crate::error::{ClientError, ClientErrorKind};
use crate::interface::MqttAck;

/// Error registering or acknowledging a tracked publish.
#[derive(Debug, Error)]
pub enum AckCoordinatorError {
    /// A publish with this PKID is already being tracked.
    #[error("publish already registered for pkid {0}")]
    AlreadyRegistered(u16),
    /// A local ack was received for a PKID that isn't tracked, or that has already reached
    /// zero remaining acks.
    #[error("no pending local ack expected for pkid {0}")]
    UnexpectedAck(u16),
}

struct PendingAck {
    remaining: usize,
}

/// Counts down local (in-process) acks owed for each dispatched publish, and forwards the
/// real broker ack, in receive order, once a publish's count reaches zero.
pub struct AckCoordinator<A: MqttAck> {
    acker: A,
    pending: Mutex<HashMap<u16, PendingAck>>,
    order: Mutex<VecDeque<u16>>,
    order_changed: Notify,
}

impl<A: MqttAck> AckCoordinator<A> {
    /// Create a coordinator that forwards completed acks to `acker`.
    pub fn new(acker: A) -> Self {
        Self {
            acker,
            pending: Mutex::new(HashMap::new()),
            order: Mutex::new(VecDeque::new()),
            order_changed: Notify::new(),
        }
    }

    /// Register a freshly-received publish that has been fanned out to `fanout` receivers.
    /// QoS 0 publishes (PKID 0) are not tracked; callers need not register them.
    pub async fn register(
        &self,
        publish: &Publish,
        fanout: usize,
    ) -> Result<(), AckCoordinatorError> {
        if publish.pkid == 0 || fanout == 0 {
            return Ok(());
        }
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&publish.pkid) {
            return Err(AckCoordinatorError::AlreadyRegistered(publish.pkid));
        }
        pending.insert(
            publish.pkid,
            PendingAck {
                remaining: fanout,
            },
        );
        self.order.lock().await.push_back(publish.pkid);
        Ok(())
    }

    /// Record that one receiver has finished with `publish`. Once every receiver has done so,
    /// sends the broker ack once prior PKIDs in receive order have also been acked.
    pub async fn local_ack(&self, publish: &Publish) -> Result<(), AckCoordinatorError> {
        if publish.pkid == 0 {
            return self
                .acker
                .ack(publish)
                .await
                .map_err(|_| AckCoordinatorError::UnexpectedAck(0));
        }

        {
            let mut pending = self.pending.lock().await;
            let entry = pending
                .get_mut(&publish.pkid)
                .ok_or(AckCoordinatorError::UnexpectedAck(publish.pkid))?;
            if entry.remaining == 0 {
                return Err(AckCoordinatorError::UnexpectedAck(publish.pkid));
            }
            entry.remaining -= 1;
            if entry.remaining > 0 {
                return Ok(());
            }
            pending.remove(&publish.pkid);
        }

        self.ack_in_order(publish).await
    }

    async fn ack_in_order(&self, publish: &Publish) -> Result<(), AckCoordinatorError> {
        loop {
            {
                let mut order = self.order.lock().await;
                match order.front() {
                    Some(&pkid) if pkid == publish.pkid => {
                        order.pop_front();
                        drop(order);
                        let _: Result<(), ClientError> = self.acker.ack(publish).await.map_err(|e| {
                            log::error!("broker ack failed for pkid {}: {e}", publish.pkid);
                            e
                        });
                        self.order_changed.notify_waiters();
                        return Ok(());
                    }
                    Some(_) => {}
                    None => return Err(AckCoordinatorError::UnexpectedAck(publish.pkid)),
                }
            }
            self.order_changed.notified().await;
        }
    }
}

impl From<ClientErrorKind> for AckCoordinatorError {
    fn from(_: ClientErrorKind) -> Self {
        AckCoordinatorError::UnexpectedAck(0)
    }
}
