//! Platform seam for storing and committing firmware images.

use serde::{Deserialize, Serialize};

use super::job::JobDocument;
use crate::utils::error::ImageError;

/// Boot state of the most recently activated image.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageState {
    #[default]
    Unknown,
    /// Activated and booted, waiting for the self-test verdict.
    Testing,
    Accepted,
    Rejected,
    Aborted,
}

/// Result of opening the destination for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The job's image is already booted and awaiting acceptance.
    PendingSelfTest,
    Failed(String),
}

/// Persists image bytes and manages which image boots.
pub trait ImageWriter: Send {
    fn create_file(&mut self, job: &JobDocument) -> CreateOutcome;

    /// Write `data` at byte `offset`. Returns the bytes written.
    fn write_block(&mut self, offset: u64, data: &[u8]) -> Result<usize, ImageError>;

    /// Finish the file, hash it and verify the job signature.
    fn close_file(&mut self, job: &JobDocument) -> Result<(), ImageError>;

    /// Erase whatever was written for `job`.
    fn abort(&mut self, job: &JobDocument) -> Result<(), ImageError>;

    /// Make the verified image the boot target and request a reset.
    fn activate(&mut self, job: &JobDocument) -> Result<(), ImageError>;

    fn image_state(&self) -> ImageState;

    fn set_image_state(&mut self, state: ImageState) -> Result<(), ImageError>;
}

/// `verify(hash, signature, key)` capability.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, digest: &[u8], signature: &[u8], public_key: &[u8]) -> Result<(), ImageError>;
}

/// Ed25519 over the SHA-256 digest of the image.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, digest: &[u8], signature: &[u8], public_key: &[u8]) -> Result<(), ImageError> {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        let key_bytes: &[u8; 32] = public_key
            .try_into()
            .map_err(|_| ImageError::InvalidKey(format!("expected 32 key bytes, got {}", public_key.len())))?;
        let key = VerifyingKey::from_bytes(key_bytes).map_err(|e| ImageError::InvalidKey(e.to_string()))?;
        let sig = Signature::from_slice(signature).map_err(|_| ImageError::SignatureFailed)?;
        key.verify(digest, &sig).map_err(|_| ImageError::SignatureFailed)
    }
}
