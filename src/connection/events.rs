/// Session lifecycle notifications broadcast to every listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected {
        session_present: bool,
        /// `false` only for the first session.
        reconnect: bool,
    },
    Disconnected {
        reason: String,
    },
}

/// Where the resilience manager currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    ConnectingTransport,
    ConnectingProtocol,
    Connected,
}
