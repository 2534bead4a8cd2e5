//! Session agent
//!
//! Owns the transport for the lifetime of one session and is the only code
//! that writes to it. Commands from the channel and frames from the broker
//! are served from a single loop, so wire operations never interleave.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::channel::CommandReceiver;
use super::command::{Ack, Command, Operation, Reply, Subscription};
use super::state::{AgentState, Session, SessionEnd};
use crate::registry::{TopicRegistry, filter};
use crate::transport::{Packet, QoS, SubscribeFilter, Transport};
use crate::utils::error::{CommandError, TransportError};

/// Keep-alive of zero disables pings; the loop still wakes this often.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// An operation written to the wire and waiting for its acknowledgement.
enum Pending {
    Publish(Reply),
    Subscribe(Reply, Vec<Subscription>),
    Unsubscribe(Reply, Vec<String>),
}

impl Pending {
    fn into_reply(self) -> Reply {
        match self {
            Pending::Publish(reply)
            | Pending::Subscribe(reply, _)
            | Pending::Unsubscribe(reply, _) => reply,
        }
    }
}

pub struct SessionAgent<T: Transport> {
    transport: T,
    session: Session,
    registry: TopicRegistry,
    connack_timeout: Duration,
    state: AgentState,
    next_packet_id: u16,
    pending: HashMap<u16, Pending>,
}

impl<T: Transport> SessionAgent<T> {
    /// Wrap an already connected transport.
    pub fn new(
        transport: T,
        session: Session,
        registry: TopicRegistry,
        connack_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            session,
            registry,
            connack_timeout,
            state: AgentState::Idle,
            next_packet_id: 0,
            pending: HashMap::new(),
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Give the transport back without running the loop.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Perform the protocol handshake. Returns whether the broker resumed a
    /// previous session.
    pub async fn handshake(&mut self) -> Result<bool, CommandError> {
        self.state = AgentState::Connecting;
        let connect = Packet::Connect {
            client_id: self.session.client_id.clone(),
            keep_alive_secs: self.session.keep_alive_secs(),
            clean_session: self.session.clean_session,
        };
        if let Err(e) = self.write(&connect).await {
            self.state = AgentState::Idle;
            return Err(CommandError::Send(e.to_string()));
        }

        let result = self
            .wait_for(self.connack_timeout, |p| matches!(p, Packet::ConnAck { .. }))
            .await;
        match result {
            Ok(Packet::ConnAck {
                accepted: true,
                session_present,
            }) => {
                self.state = AgentState::Connected;
                info!(
                    "Session {} established (session_present={session_present})",
                    self.session.client_id
                );
                Ok(session_present)
            }
            Ok(_) => {
                self.state = AgentState::Idle;
                warn!("Broker refused session {}", self.session.client_id);
                Err(CommandError::Refused)
            }
            Err(e) => {
                self.state = AgentState::Idle;
                Err(e)
            }
        }
    }

    /// Replay every registered filter, at its stored QoS, as one subscribe
    /// request.
    ///
    /// Filters the broker rejects are removed from the registry and
    /// returned.
    pub async fn resubscribe(&mut self) -> Result<Vec<String>, CommandError> {
        let subscriptions = self.registry.subscriptions();
        if subscriptions.is_empty() {
            return Ok(Vec::new());
        }

        let packet_id = self.allocate_packet_id();
        let request = Packet::Subscribe {
            packet_id,
            filters: subscriptions
                .iter()
                .map(|(filter, qos)| SubscribeFilter {
                    filter: filter.clone(),
                    qos: *qos,
                })
                .collect(),
        };
        self.write(&request)
            .await
            .map_err(|e| CommandError::Send(e.to_string()))?;

        let ack = self
            .wait_for(self.connack_timeout, |p| {
                matches!(p, Packet::SubAck { packet_id: id, .. } if *id == packet_id)
            })
            .await?;
        let Packet::SubAck { granted, .. } = ack else {
            return Err(CommandError::Rejected);
        };

        let mut rejected = Vec::new();
        for (i, (filter, _)) in subscriptions.into_iter().enumerate() {
            if !granted.get(i).copied().unwrap_or(false) {
                warn!("Resubscribe to {filter} rejected, removing it");
                self.registry.unregister(&filter);
                rejected.push(filter);
            }
        }
        info!(
            "Resubscribed {} filters ({} rejected)",
            granted.len(),
            rejected.len()
        );
        Ok(rejected)
    }

    /// Serve commands and inbound frames until the session ends.
    ///
    /// Returns the transport and the receiver so the caller can start the
    /// next session with them.
    pub async fn run(mut self, mut commands: CommandReceiver) -> (T, CommandReceiver, SessionEnd) {
        self.state = AgentState::Connected;
        let keep_alive = self.session.keep_alive;
        let mut last_heard = Instant::now();
        let mut ping_outstanding = false;

        let end = loop {
            let wait = if keep_alive.is_zero() {
                IDLE_WAIT
            } else {
                keep_alive.saturating_sub(last_heard.elapsed())
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Err(e) = self.execute(command).await {
                            break SessionEnd::Lost(e.to_string());
                        }
                    }
                    None => break SessionEnd::Closed,
                },
                frame = self.transport.recv(wait) => match frame {
                    Ok(Some(frame)) => {
                        last_heard = Instant::now();
                        ping_outstanding = false;
                        if let Err(e) = self.on_frame(&frame).await {
                            break SessionEnd::Lost(e.to_string());
                        }
                    }
                    Ok(None) if keep_alive.is_zero() => {}
                    Ok(None) if ping_outstanding => {
                        break SessionEnd::Lost("keep-alive timeout".to_string());
                    }
                    Ok(None) => {
                        debug!("Idle for {keep_alive:?}, sending ping");
                        if let Err(e) = self.write(&Packet::PingReq).await {
                            break SessionEnd::Lost(e.to_string());
                        }
                        last_heard = Instant::now();
                        ping_outstanding = true;
                    }
                    Err(e) => break SessionEnd::Lost(e.to_string()),
                },
            }
        };

        self.drain(&end).await;
        (self.transport, commands, end)
    }

    async fn drain(&mut self, end: &SessionEnd) {
        self.state = AgentState::Draining;
        match end {
            SessionEnd::Lost(reason) => error!("Session lost: {reason}"),
            SessionEnd::Closed => {
                info!("Command channel closed, ending session");
                if let Err(e) = self.write(&Packet::Disconnect).await {
                    debug!("Disconnect not sent: {e}");
                }
            }
        }

        if !self.pending.is_empty() {
            warn!("Failing {} in-flight commands", self.pending.len());
        }
        for (_, pending) in self.pending.drain() {
            pending.into_reply().send(Err(CommandError::Disconnected));
        }
        self.transport.disconnect().await;
        self.state = AgentState::Idle;
    }

    /// Write one command to the wire. An error means the transport failed.
    async fn execute(&mut self, command: Command) -> Result<(), TransportError> {
        let Command {
            operation, reply, ..
        } = command;

        match operation {
            Operation::Connect { .. } => {
                reply.send(Err(CommandError::AlreadyConnected));
                Ok(())
            }
            Operation::Publish {
                topic,
                payload,
                qos,
            } => {
                let packet_id = match qos {
                    QoS::AtMostOnce => None,
                    QoS::AtLeastOnce => Some(self.allocate_packet_id()),
                };
                let packet = Packet::Publish {
                    topic,
                    payload,
                    qos,
                    packet_id,
                };
                match packet_id {
                    Some(id) => self.send_tracked(&packet, id, Pending::Publish(reply)).await,
                    None => match self.write(&packet).await {
                        Ok(()) => {
                            reply.send(Ok(Ack::Published));
                            Ok(())
                        }
                        Err(TransportError::Codec(e)) => {
                            reply.send(Err(CommandError::Send(e.to_string())));
                            Ok(())
                        }
                        Err(e) => {
                            reply.send(Err(CommandError::Disconnected));
                            Err(e)
                        }
                    },
                }
            }
            Operation::Subscribe(subscriptions) => {
                if let Some(bad) = subscriptions
                    .iter()
                    .find(|s| filter::validate(&s.filter).is_err())
                {
                    warn!("Refusing to subscribe to invalid filter {}", bad.filter);
                    reply.send(Err(CommandError::Rejected));
                    return Ok(());
                }
                let packet_id = self.allocate_packet_id();
                let packet = Packet::Subscribe {
                    packet_id,
                    filters: subscriptions
                        .iter()
                        .map(|s| SubscribeFilter {
                            filter: s.filter.clone(),
                            qos: s.qos,
                        })
                        .collect(),
                };
                self.send_tracked(&packet, packet_id, Pending::Subscribe(reply, subscriptions))
                    .await
            }
            Operation::Unsubscribe(filters) => {
                let packet_id = self.allocate_packet_id();
                let packet = Packet::Unsubscribe {
                    packet_id,
                    filters: filters.clone(),
                };
                self.send_tracked(&packet, packet_id, Pending::Unsubscribe(reply, filters))
                    .await
            }
        }
    }

    async fn send_tracked(
        &mut self,
        packet: &Packet,
        packet_id: u16,
        pending: Pending,
    ) -> Result<(), TransportError> {
        match self.write(packet).await {
            Ok(()) => {
                self.pending.insert(packet_id, pending);
                Ok(())
            }
            Err(TransportError::Codec(e)) => {
                pending.into_reply().send(Err(CommandError::Send(e.to_string())));
                Ok(())
            }
            Err(e) => {
                pending.into_reply().send(Err(CommandError::Disconnected));
                Err(e)
            }
        }
    }

    async fn on_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Discarding malformed frame ({} bytes): {e}", frame.len());
                return Ok(());
            }
        };

        match packet {
            Packet::Publish {
                topic,
                payload,
                qos,
                packet_id,
            } => {
                self.registry.dispatch(&topic, &payload);
                if let (QoS::AtLeastOnce, Some(packet_id)) = (qos, packet_id) {
                    self.write(&Packet::PubAck {
                        packet_id,
                        accepted: true,
                    })
                    .await?;
                }
            }
            Packet::PubAck {
                packet_id,
                accepted,
            } => match self.pending.remove(&packet_id) {
                Some(Pending::Publish(reply)) => {
                    if accepted {
                        reply.send(Ok(Ack::Published));
                    } else {
                        warn!("Publish {packet_id} rejected by broker");
                        reply.send(Err(CommandError::Rejected));
                    }
                }
                other => self.unexpected_ack("puback", packet_id, other),
            },
            Packet::SubAck { packet_id, granted } => match self.pending.remove(&packet_id) {
                Some(Pending::Subscribe(reply, subscriptions)) => {
                    let granted = self.apply_suback(subscriptions, &granted);
                    if granted.iter().any(|g| *g) {
                        reply.send(Ok(Ack::Subscribed { granted }));
                    } else {
                        reply.send(Err(CommandError::Rejected));
                    }
                }
                other => self.unexpected_ack("suback", packet_id, other),
            },
            Packet::UnsubAck { packet_id } => match self.pending.remove(&packet_id) {
                Some(Pending::Unsubscribe(reply, filters)) => {
                    for filter in &filters {
                        self.registry.unregister(filter);
                    }
                    reply.send(Ok(Ack::Unsubscribed));
                }
                other => self.unexpected_ack("unsuback", packet_id, other),
            },
            Packet::PingResp => debug!("Ping answered"),
            Packet::Disconnect => return Err(TransportError::Closed),
            other => warn!("Ignoring unexpected {} from broker", other.kind()),
        }
        Ok(())
    }

    /// Register granted filters and drop rejected ones. Returns the final
    /// grant flags, with registry overflow counted as a rejection.
    fn apply_suback(&self, subscriptions: Vec<Subscription>, granted: &[bool]) -> Vec<bool> {
        subscriptions
            .into_iter()
            .enumerate()
            .map(|(i, sub)| {
                if !granted.get(i).copied().unwrap_or(false) {
                    warn!("Subscribe to {} rejected by broker", sub.filter);
                    self.registry.unregister(&sub.filter);
                    return false;
                }
                match self.registry.register(&sub.filter, sub.qos, sub.callback) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Subscribed to {} but could not register it: {e}", sub.filter);
                        false
                    }
                }
            })
            .collect()
    }

    fn unexpected_ack(&mut self, kind: &str, packet_id: u16, pending: Option<Pending>) {
        match pending {
            Some(pending) => {
                warn!("{kind} {packet_id} does not match the pending operation");
                self.pending.insert(packet_id, pending);
            }
            None => debug!("Stale {kind} {packet_id}"),
        }
    }

    /// Read frames until `pick` accepts one or `timeout` passes. Publishes
    /// seen meanwhile are dispatched; anything else is dropped.
    async fn wait_for<F>(&mut self, timeout: Duration, mut pick: F) -> Result<Packet, CommandError>
    where
        F: FnMut(&Packet) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CommandError::Timeout);
            }
            let frame = match self.transport.recv(remaining).await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Err(CommandError::Timeout),
                Err(e) => {
                    warn!("Transport failed during setup: {e}");
                    return Err(CommandError::Disconnected);
                }
            };
            match Packet::decode(&frame) {
                Ok(packet) if pick(&packet) => return Ok(packet),
                Ok(Packet::Publish { topic, payload, .. }) => {
                    self.registry.dispatch(&topic, &payload);
                }
                Ok(other) => debug!("Ignoring {} during setup", other.kind()),
                Err(e) => warn!("Discarding malformed frame: {e}"),
            }
        }
    }

    async fn write(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let frame = packet.encode()?;
        self.transport.send(&frame).await?;
        Ok(())
    }

    /// Next free packet id; ids wrap and skip zero and ids still in use.
    fn allocate_packet_id(&mut self) -> u16 {
        loop {
            self.next_packet_id = self.next_packet_id.wrapping_add(1);
            if self.next_packet_id != 0 && !self.pending.contains_key(&self.next_packet_id) {
                return self.next_packet_id;
            }
        }
    }
}
