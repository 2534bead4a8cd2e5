use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::Db;
use tracing::debug;

use crate::ota::ImageState;
use crate::utils::error::ImageError;

const STATE_KEY: &[u8] = b"image_state";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredImageState {
    pub state: ImageState,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct ImageStateStore {
    db: Db,
}

impl ImageStateStore {
    pub fn open(path: &str) -> Result<Self, ImageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// A store that is removed when dropped.
    pub fn temporary() -> Result<Self, ImageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// The last stored state, `Unknown` when nothing was ever stored.
    pub fn load(&self) -> Result<ImageState, ImageError> {
        Ok(self
            .record()?
            .map(|record| record.state)
            .unwrap_or(ImageState::Unknown))
    }

    pub fn record(&self) -> Result<Option<StoredImageState>, ImageError> {
        match self.db.get(STATE_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Persist `state` and flush it to disk before returning.
    pub fn store(&self, state: ImageState) -> Result<(), ImageError> {
        let record = StoredImageState {
            state,
            updated_at: Utc::now().timestamp(),
        };
        let serialized = serde_json::to_vec(&record)?;
        self.db.insert(STATE_KEY, serialized)?;
        self.db.flush()?;
        debug!("Image state stored: {state:?}");
        Ok(())
    }
}

impl std::fmt::Debug for ImageStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStateStore")
            .field("db", &"sled::Db")
            .finish()
    }
}
