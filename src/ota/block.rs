use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::utils::error::BlockError;

#[derive(Deserialize)]
struct Envelope {
    f: u32,
    i: u32,
    l: usize,
    p: String,
}

/// One chunk of the image as delivered on the stream data topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub file_id: u32,
    pub block_id: u32,
    pub payload: Vec<u8>,
}

impl Block {
    pub fn decode(raw: &[u8]) -> Result<Self, BlockError> {
        let envelope: Envelope = serde_json::from_slice(raw)?;
        let payload = STANDARD.decode(envelope.p)?;
        if payload.len() != envelope.l {
            return Err(BlockError::LengthMismatch {
                declared: envelope.l,
                actual: payload.len(),
            });
        }
        Ok(Self {
            file_id: envelope.f,
            block_id: envelope.i,
            payload,
        })
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Request for `count` blocks starting at `offset`, published to the
/// stream's get topic.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockRequest {
    #[serde(rename = "c")]
    pub client_token: String,
    #[serde(rename = "f")]
    pub file_id: u32,
    #[serde(rename = "l")]
    pub block_size: usize,
    #[serde(rename = "o")]
    pub offset: u32,
    #[serde(rename = "n")]
    pub count: u32,
}

impl BlockRequest {
    pub fn new(file_id: u32, block_size: usize, offset: u32, count: u32) -> Self {
        Self {
            client_token: uuid::Uuid::new_v4().to_string(),
            file_id,
            block_size,
            offset,
            count,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
