//! The `ota` module discovers pending firmware jobs, streams the image as
//! blocks over the shared session and hands the verified result to the
//! platform image writer.
//!
//! Everything runs on the [`OtaAgent`] task. The agent talks to the broker
//! only through a [`crate::session::CommandClient`] and learns about
//! connectivity from [`spawn_connectivity_listener`].

pub mod agent;
pub mod block;
pub mod file_writer;
pub mod image;
pub mod job;
pub mod progress;
pub mod status;
pub mod topics;

pub use agent::{OtaAgent, OtaEvent, OtaHandle, OtaState, OtaStatistics, spawn_connectivity_listener};
pub use block::{Block, BlockRequest};
pub use file_writer::{FileImageWriter, ResetHook};
pub use image::{CreateOutcome, Ed25519Verifier, ImageState, ImageWriter, SignatureVerifier};
pub use job::JobDocument;
pub use progress::{BlockCheck, TransferProgress};
pub use status::{JobStatus, StatusReport};
pub use topics::OtaTopics;
