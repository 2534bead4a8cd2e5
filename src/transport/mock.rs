//! In-memory broker and transport used by the session, connection and OTA
//! tests. The broker answers packets synchronously from inside
//! `MockTransport::send`, so no extra task is needed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Credentials, Endpoint, Packet, QoS, Transport};
use crate::registry::filter;
use crate::utils::error::TransportError;

/// Produces packets for the device in reply to one of its publishes.
pub(crate) type Responder = Box<dyn FnMut(&str, &[u8]) -> Vec<Packet> + Send>;

#[derive(Default)]
struct BrokerState {
    failing_connects: u32,
    connect_attempts: u32,
    refuse_connect: bool,
    session_present: bool,
    ack_publishes: bool,
    reject_publishes: bool,
    reject_filters: HashSet<String>,
    subscriptions: Vec<String>,
    subscribe_requests: Vec<Vec<String>>,
    subscribe_qos: Vec<Vec<QoS>>,
    connects: Vec<bool>,
    published: Vec<(String, Vec<u8>, QoS)>,
    to_device: Option<mpsc::UnboundedSender<Vec<u8>>>,
    responder: Option<Responder>,
}

/// Handle to the fake broker shared by the test and its transports.
#[derive(Clone)]
pub(crate) struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub(crate) fn new() -> Self {
        let state = BrokerState {
            ack_publishes: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn transport(&self) -> MockTransport {
        MockTransport {
            broker: self.clone(),
            inbox: None,
        }
    }

    pub(crate) fn fail_next_connects(&self, count: u32) {
        self.lock().failing_connects = count;
    }

    pub(crate) fn refuse_connect(&self, refuse: bool) {
        self.lock().refuse_connect = refuse;
    }

    /// Whether a resumed session finds its previous state.
    pub(crate) fn keep_sessions(&self, keep: bool) {
        self.lock().session_present = keep;
    }

    pub(crate) fn ack_publishes(&self, ack: bool) {
        self.lock().ack_publishes = ack;
    }

    pub(crate) fn reject_publishes(&self, reject: bool) {
        self.lock().reject_publishes = reject;
    }

    pub(crate) fn reject_filter(&self, filter: &str) {
        self.lock().reject_filters.insert(filter.to_string());
    }

    pub(crate) fn allow_filter(&self, filter: &str) {
        self.lock().reject_filters.remove(filter);
    }

    pub(crate) fn set_responder(&self, responder: Responder) {
        self.lock().responder = Some(responder);
    }

    pub(crate) fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// `clean_session` flag of every accepted connect, in order.
    pub(crate) fn connects(&self) -> Vec<bool> {
        self.lock().connects.clone()
    }

    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    pub(crate) fn subscribe_requests(&self) -> Vec<Vec<String>> {
        self.lock().subscribe_requests.clone()
    }

    /// Requested QoS per filter, one list per subscribe request.
    pub(crate) fn subscribe_qos(&self) -> Vec<Vec<QoS>> {
        self.lock().subscribe_qos.clone()
    }

    pub(crate) fn published(&self) -> Vec<(String, Vec<u8>, QoS)> {
        self.lock().published.clone()
    }

    pub(crate) fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .published
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, p, _)| p.clone())
            .collect()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.lock().to_device.is_some()
    }

    /// Sever the current connection; the device sees the stream close.
    pub(crate) fn drop_connection(&self) {
        self.lock().to_device = None;
    }

    /// Deliver a publish to the device if one of its subscriptions matches.
    pub(crate) fn inject(&self, topic: &str, payload: &[u8]) -> bool {
        let state = self.lock();
        Self::deliver(
            &state,
            Packet::Publish {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos: QoS::AtMostOnce,
                packet_id: None,
            },
        )
    }

    /// Push any packet to the device, bypassing subscription checks.
    pub(crate) fn send_raw(&self, packet: Packet) {
        let state = self.lock();
        if let Some(tx) = &state.to_device {
            let _ = tx.send(packet.encode().unwrap());
        }
    }

    fn deliver(state: &BrokerState, packet: Packet) -> bool {
        if let Packet::Publish { topic, .. } = &packet {
            if !state.subscriptions.iter().any(|f| filter::matches(f, topic)) {
                return false;
            }
        }
        match &state.to_device {
            Some(tx) => tx.send(packet.encode().unwrap()).is_ok(),
            None => false,
        }
    }

    fn reply(state: &BrokerState, packet: Packet) {
        if let Some(tx) = &state.to_device {
            let _ = tx.send(packet.encode().unwrap());
        }
    }

    fn handle(&self, packet: Packet) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.to_device.is_none() {
            return Err(TransportError::Closed);
        }

        match packet {
            Packet::Connect { clean_session, .. } => {
                if state.refuse_connect {
                    Self::reply(
                        &state,
                        Packet::ConnAck {
                            accepted: false,
                            session_present: false,
                        },
                    );
                    return Ok(());
                }
                let session_present = !clean_session && state.session_present;
                if !session_present {
                    state.subscriptions.clear();
                }
                state.connects.push(clean_session);
                Self::reply(
                    &state,
                    Packet::ConnAck {
                        accepted: true,
                        session_present,
                    },
                );
            }
            Packet::Subscribe { packet_id, filters } => {
                let mut granted = Vec::with_capacity(filters.len());
                let mut requested = Vec::with_capacity(filters.len());
                let mut qos = Vec::with_capacity(filters.len());
                for sub in filters {
                    requested.push(sub.filter.clone());
                    qos.push(sub.qos);
                    let ok = !state.reject_filters.contains(&sub.filter);
                    if ok && !state.subscriptions.contains(&sub.filter) {
                        state.subscriptions.push(sub.filter);
                    }
                    granted.push(ok);
                }
                state.subscribe_requests.push(requested);
                state.subscribe_qos.push(qos);
                Self::reply(&state, Packet::SubAck { packet_id, granted });
            }
            Packet::Unsubscribe { packet_id, filters } => {
                state.subscriptions.retain(|f| !filters.contains(f));
                Self::reply(&state, Packet::UnsubAck { packet_id });
            }
            Packet::Publish {
                topic,
                payload,
                qos,
                packet_id,
            } => {
                state.published.push((topic.clone(), payload.clone(), qos));
                if let (QoS::AtLeastOnce, Some(packet_id)) = (qos, packet_id) {
                    if state.ack_publishes {
                        let accepted = !state.reject_publishes;
                        Self::reply(&state, Packet::PubAck { packet_id, accepted });
                    }
                }
                let replies = match state.responder.as_mut() {
                    Some(responder) => responder(&topic, &payload),
                    None => Vec::new(),
                };
                for reply in replies {
                    Self::deliver(&state, reply);
                }
            }
            Packet::PingReq => Self::reply(&state, Packet::PingResp),
            Packet::Disconnect => state.to_device = None,
            Packet::ConnAck { .. }
            | Packet::PubAck { .. }
            | Packet::SubAck { .. }
            | Packet::UnsubAck { .. }
            | Packet::PingResp => {}
        }
        Ok(())
    }
}

/// Device side of the in-memory link.
pub(crate) struct MockTransport {
    broker: MockBroker,
    inbox: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &mut self,
        _endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        state.connect_attempts += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::Connect("mock refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.to_device = Some(tx);
        self.inbox = Some(rx);
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<usize, TransportError> {
        if self.inbox.is_none() {
            return Err(TransportError::NotConnected);
        }
        let packet = Packet::decode(frame)?;
        self.broker.handle(packet)?;
        Ok(frame.len())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let inbox = self.inbox.as_mut().ok_or(TransportError::NotConnected)?;
        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn disconnect(&mut self) {
        self.inbox = None;
    }
}
