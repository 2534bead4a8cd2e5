use std::time::Duration;

use crate::config::BrokerSettings;

/// Lifecycle of the session agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Connecting,
    Connected,
    /// Failing outstanding commands after the session ended.
    Draining,
}

/// One logical connection to the broker. Rebuilt on every connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub client_id: String,
    pub keep_alive: Duration,
    pub clean_session: bool,
}

impl Session {
    pub fn new(broker: &BrokerSettings, clean_session: bool) -> Self {
        Self {
            client_id: broker.client_id.clone(),
            keep_alive: broker.keep_alive(),
            clean_session,
        }
    }

    /// Keep-alive as carried in the connect packet, in whole seconds.
    pub fn keep_alive_secs(&self) -> u16 {
        u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX)
    }
}

/// Why a session agent stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The transport failed or the broker went silent.
    Lost(String),
    /// Every command sender is gone.
    Closed,
}
