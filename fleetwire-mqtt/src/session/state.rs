// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Types for tracking the connection state of a [`crate::session::Session`].

use std::sync::RwLock;

use tokio::sync::Notify;

/// Tracks whether the [`Session`](crate::session::Session) is currently connected, whether an
/// exit has been requested, and whether the run loop has exited, allowing waiters to block on
/// any of these state transitions.
pub struct SessionState {
    connected: RwLock<bool>,
    desire_exit: RwLock<bool>,
    exited: RwLock<bool>,
    state_change: Notify,
}

impl SessionState {
    /// Return true if the Session is currently connected (to the best of knowledge).
    pub fn is_connected(&self) -> bool {
        *self.connected.read().unwrap()
    }

    /// Return true if a graceful exit has been requested.
    pub fn desire_exit(&self) -> bool {
        *self.desire_exit.read().unwrap()
    }

    /// Return true if the Session's run loop has exited.
    pub fn is_exited(&self) -> bool {
        *self.exited.read().unwrap()
    }

    /// Wait until the Session is connected. Returns immediately if already connected.
    pub async fn condition_connected(&self) {
        loop {
            if self.is_connected() {
                break;
            }
            self.state_change.notified().await;
        }
    }

    /// Wait until the Session is disconnected. Returns immediately if already disconnected.
    pub async fn condition_disconnected(&self) {
        loop {
            if !self.is_connected() {
                break;
            }
            self.state_change.notified().await;
        }
    }

    /// Wait until the Session's run loop has exited. Returns immediately if already exited.
    pub async fn condition_exited(&self) {
        loop {
            if self.is_exited() {
                break;
            }
            self.state_change.notified().await;
        }
    }

    /// Update the state to reflect a connection.
    pub fn transition_connected(&self) {
        let mut connected = self.connected.write().unwrap();
        if *connected {
            log::warn!("duplicate connection transition");
        } else {
            *connected = true;
            log::info!("mqtt session connected");
            self.state_change.notify_waiters();
        }
    }

    /// Update the state to reflect a disconnection.
    pub fn transition_disconnected(&self) {
        let mut connected = self.connected.write().unwrap();
        if *connected {
            *connected = false;
            log::info!("mqtt session disconnected");
            self.state_change.notify_waiters();
        }
    }

    /// Record that a graceful exit has been requested.
    pub fn transition_desire_exit(&self) {
        *self.desire_exit.write().unwrap() = true;
        self.state_change.notify_waiters();
    }

    /// Record that the Session's run loop has exited.
    pub fn transition_exited(&self) {
        *self.exited.write().unwrap() = true;
        self.state_change.notify_waiters();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            connected: RwLock::new(false),
            desire_exit: RwLock::new(false),
            exited: RwLock::new(false),
            state_change: Notify::new(),
        }
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("connected", &self.is_connected())
            .field("desire_exit", &self.desire_exit())
            .field("exited", &self.is_exited())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn condition_connected_returns_once_transitioned() {
        let state = std::sync::Arc::new(SessionState::default());
        assert!(!state.is_connected());

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move {
                state.condition_connected().await;
            })
        };

        tokio::task::yield_now().await;
        state.transition_connected();
        waiter.await.unwrap();
        assert!(state.is_connected());
    }
}
