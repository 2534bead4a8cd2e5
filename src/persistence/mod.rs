//! The `persistence` module keeps the boot image state across restarts.
//!
//! The state of the last activated image (testing, accepted, rejected) must
//! outlive the reset that activation triggers, so it is stored in an
//! embedded `sled` database next to the image. The handled job id is not
//! persisted.

pub mod sled_store;

pub use sled_store::{ImageStateStore, StoredImageState};
