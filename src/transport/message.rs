//! Wire packets exchanged with the broker.
//!
//! Each transport frame carries one JSON-encoded `Packet`. Binary payloads
//! are base64 strings so frames stay valid JSON.

use serde::{Deserialize, Serialize};

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> u8 {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            other => Err(format!("unsupported qos {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeFilter {
    pub filter: String,
    pub qos: QoS,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Packet {
    #[serde(rename = "connect")]
    Connect {
        client_id: String,
        keep_alive_secs: u16,
        clean_session: bool,
    },
    #[serde(rename = "connack")]
    ConnAck {
        accepted: bool,
        session_present: bool,
    },
    #[serde(rename = "publish")]
    Publish {
        topic: String,
        #[serde(with = "base64_payload")]
        payload: Vec<u8>,
        qos: QoS,
        packet_id: Option<u16>,
    },
    #[serde(rename = "puback")]
    PubAck { packet_id: u16, accepted: bool },
    #[serde(rename = "subscribe")]
    Subscribe {
        packet_id: u16,
        filters: Vec<SubscribeFilter>,
    },
    /// One entry per requested filter, `true` when granted.
    #[serde(rename = "suback")]
    SubAck { packet_id: u16, granted: Vec<bool> },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { packet_id: u16, filters: Vec<String> },
    #[serde(rename = "unsuback")]
    UnsubAck { packet_id: u16 },
    #[serde(rename = "pingreq")]
    PingReq,
    #[serde(rename = "pingresp")]
    PingResp,
    #[serde(rename = "disconnect")]
    Disconnect,
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Connect { .. } => "connect",
            Packet::ConnAck { .. } => "connack",
            Packet::Publish { .. } => "publish",
            Packet::PubAck { .. } => "puback",
            Packet::Subscribe { .. } => "subscribe",
            Packet::SubAck { .. } => "suback",
            Packet::Unsubscribe { .. } => "unsubscribe",
            Packet::UnsubAck { .. } => "unsuback",
            Packet::PingReq => "pingreq",
            Packet::PingResp => "pingresp",
            Packet::Disconnect => "disconnect",
        }
    }
}

mod base64_payload {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
