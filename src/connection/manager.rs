use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use super::backoff::Backoff;
use super::events::{ConnectionEvent, ConnectionState};
use crate::config::{BrokerSettings, Settings};
use crate::registry::TopicRegistry;
use crate::session::{CommandReceiver, Session, SessionAgent, SessionEnd};
use crate::transport::{CredentialStore, Endpoint, Transport};

const EVENT_CAPACITY: usize = 16;

/// Establishes the broker session and re-establishes it after every loss.
///
/// The manager owns the transport and the command receiver between
/// sessions and lends both to a [`SessionAgent`] task while a session is
/// up.
pub struct ResilienceManager<T: Transport + 'static> {
    transport: T,
    credentials: Arc<dyn CredentialStore>,
    endpoint: Endpoint,
    broker: BrokerSettings,
    backoff: Backoff,
    registry: TopicRegistry,
    commands: CommandReceiver,
    events: broadcast::Sender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    sessions: u64,
}

impl<T: Transport + 'static> ResilienceManager<T> {
    pub fn new(
        transport: T,
        credentials: Arc<dyn CredentialStore>,
        settings: &Settings,
        registry: TopicRegistry,
        commands: CommandReceiver,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            credentials,
            endpoint: Endpoint::new(
                settings.broker.host.clone(),
                settings.broker.port,
                settings.broker.path.clone(),
            ),
            broker: settings.broker.clone(),
            backoff: Backoff::new(&settings.backoff),
            registry,
            commands,
            events,
            state,
            sessions: 0,
        }
    }

    /// Receive every lifecycle event emitted after this call.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Keep a session up until the command channel closes.
    pub async fn run(self) {
        let Self {
            mut transport,
            credentials,
            endpoint,
            broker,
            mut backoff,
            registry,
            mut commands,
            events,
            state,
            mut sessions,
        } = self;

        loop {
            let reconnect = sessions > 0;
            let (agent, session_present) = loop {
                match connect_once(
                    transport,
                    credentials.as_ref(),
                    &endpoint,
                    &broker,
                    &registry,
                    &state,
                    reconnect,
                )
                .await
                {
                    Ok(connected) => break connected,
                    Err(returned) => {
                        transport = returned;
                        state.send_replace(ConnectionState::Disconnected);
                        if commands.is_closed() {
                            info!("No command clients left, giving up on the broker");
                            return;
                        }
                        let delay = backoff.next_delay();
                        warn!(
                            "Connection attempt {} failed, retrying in {delay:?}",
                            backoff.attempts()
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            };

            backoff.reset();
            sessions += 1;
            state.send_replace(ConnectionState::Connected);
            let _ = events.send(ConnectionEvent::Connected {
                session_present,
                reconnect,
            });

            let (returned, receiver, end) = match tokio::spawn(agent.run(commands)).await {
                Ok(finished) => finished,
                Err(e) => {
                    error!("Session agent task failed: {e}");
                    state.send_replace(ConnectionState::Disconnected);
                    return;
                }
            };
            transport = returned;
            commands = receiver;
            state.send_replace(ConnectionState::Disconnected);

            match end {
                SessionEnd::Lost(reason) => {
                    let _ = events.send(ConnectionEvent::Disconnected { reason });
                }
                SessionEnd::Closed => {
                    let _ = events.send(ConnectionEvent::Disconnected {
                        reason: "shutdown".to_string(),
                    });
                    info!("Resilience manager stopped after {sessions} sessions");
                    return;
                }
            }
        }
    }
}

/// One transport + protocol attempt. On failure the transport is handed
/// back, disconnected.
async fn connect_once<T: Transport>(
    mut transport: T,
    credentials: &dyn CredentialStore,
    endpoint: &Endpoint,
    broker: &BrokerSettings,
    registry: &TopicRegistry,
    state: &watch::Sender<ConnectionState>,
    reconnect: bool,
) -> Result<(SessionAgent<T>, bool), T> {
    state.send_replace(ConnectionState::ConnectingTransport);
    let credentials = match credentials.credentials() {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!("Credentials unavailable: {e}");
            return Err(transport);
        }
    };
    if let Err(e) = transport.connect(endpoint, &credentials).await {
        warn!("Transport connect to {endpoint} failed: {e}");
        return Err(transport);
    }

    state.send_replace(ConnectionState::ConnectingProtocol);
    let session = Session::new(broker, !reconnect);
    let mut agent = SessionAgent::new(transport, session, registry.clone(), broker.connack_timeout());

    let session_present = match agent.handshake().await {
        Ok(present) => present,
        Err(e) => {
            warn!("Handshake with {endpoint} failed: {e}");
            return Err(release(agent).await);
        }
    };

    if reconnect && !session_present {
        if let Err(e) = agent.resubscribe().await {
            warn!("Resubscribe failed: {e}");
            return Err(release(agent).await);
        }
    }
    Ok((agent, session_present))
}

async fn release<T: Transport>(agent: SessionAgent<T>) -> T {
    let mut transport = agent.into_transport();
    transport.disconnect().await;
    transport
}
