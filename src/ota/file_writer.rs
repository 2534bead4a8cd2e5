use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::image::{CreateOutcome, ImageState, ImageWriter, SignatureVerifier};
use super::job::JobDocument;
use crate::config::OtaSettings;
use crate::persistence::ImageStateStore;
use crate::utils::error::ImageError;

/// Called once activation has committed the new boot image.
pub type ResetHook = Box<dyn FnMut() + Send>;

/// Image writer backed by plain files.
///
/// Blocks land in a staging file; activation renames it over the boot
/// image. The boot image state lives in a sled store so it survives the
/// reset.
pub struct FileImageWriter {
    staging_path: PathBuf,
    image_path: PathBuf,
    key_path: PathBuf,
    verifier: Box<dyn SignatureVerifier>,
    store: ImageStateStore,
    reset: ResetHook,
    file: Option<File>,
    verifications: u32,
}

impl FileImageWriter {
    pub fn new(
        settings: &OtaSettings,
        verifier: Box<dyn SignatureVerifier>,
        store: ImageStateStore,
        reset: ResetHook,
    ) -> Self {
        Self {
            staging_path: PathBuf::from(&settings.staging_path),
            image_path: PathBuf::from(&settings.image_path),
            key_path: PathBuf::from(&settings.code_signing_key_path),
            verifier,
            store,
            reset,
            file: None,
            verifications: 0,
        }
    }

    /// Signature checks performed so far.
    pub fn verifications(&self) -> u32 {
        self.verifications
    }

    fn open_staging(&mut self, size: u64) -> Result<(), ImageError> {
        ensure_parent(&self.staging_path)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&self.staging_path)?;
        file.set_len(size)?;
        self.file = Some(file);
        Ok(())
    }

    fn digest_staging(&self, size: u64) -> Result<Vec<u8>, ImageError> {
        let mut file = File::open(&self.staging_path)?.take(size);
        let mut hasher = Sha256::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = file.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            hasher.update(&chunk[..read]);
        }
        Ok(hasher.finalize().to_vec())
    }

    fn signing_key(&self) -> Result<Vec<u8>, ImageError> {
        let raw = fs::read(&self.key_path)
            .map_err(|e| ImageError::InvalidKey(format!("{}: {e}", self.key_path.display())))?;
        if raw.len() == 32 {
            return Ok(raw);
        }
        let text = String::from_utf8_lossy(&raw);
        STANDARD
            .decode(text.trim())
            .map_err(|e| ImageError::InvalidKey(format!("{}: {e}", self.key_path.display())))
    }
}

impl ImageWriter for FileImageWriter {
    fn create_file(&mut self, job: &JobDocument) -> CreateOutcome {
        if job.self_test && self.image_state() == ImageState::Testing {
            info!("Image for job {} is booted and awaiting self-test", job.job_id);
            return CreateOutcome::PendingSelfTest;
        }

        match self.open_staging(job.file_size) {
            Ok(()) => {
                debug!(
                    "Staging {} bytes for job {} at {}",
                    job.file_size,
                    job.job_id,
                    self.staging_path.display()
                );
                CreateOutcome::Created
            }
            Err(e) => CreateOutcome::Failed(e.to_string()),
        }
    }

    fn write_block(&mut self, offset: u64, data: &[u8]) -> Result<usize, ImageError> {
        let file = self.file.as_mut().ok_or(ImageError::NotCreated)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    fn close_file(&mut self, job: &JobDocument) -> Result<(), ImageError> {
        let file = self.file.take().ok_or(ImageError::NotCreated)?;
        file.sync_all()?;
        drop(file);

        let digest = self.digest_staging(job.file_size)?;
        self.verifications += 1;
        let key = self.signing_key()?;
        self.verifier.verify(&digest, &job.signature, &key)?;
        info!("Image for job {} verified", job.job_id);
        Ok(())
    }

    fn abort(&mut self, job: &JobDocument) -> Result<(), ImageError> {
        self.file = None;
        match fs::remove_file(&self.staging_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        warn!("Erased staged image for job {}", job.job_id);
        self.store.store(ImageState::Aborted)
    }

    fn activate(&mut self, job: &JobDocument) -> Result<(), ImageError> {
        ensure_parent(&self.image_path)?;
        fs::rename(&self.staging_path, &self.image_path)?;
        self.store.store(ImageState::Testing)?;
        info!(
            "Activated image for job {} at {}",
            job.job_id,
            self.image_path.display()
        );
        (self.reset)();
        Ok(())
    }

    fn image_state(&self) -> ImageState {
        self.store.load().unwrap_or_else(|e| {
            warn!("Image state unreadable: {e}");
            ImageState::Unknown
        })
    }

    fn set_image_state(&mut self, state: ImageState) -> Result<(), ImageError> {
        self.store.store(state)
    }
}

fn ensure_parent(path: &Path) -> Result<(), ImageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
