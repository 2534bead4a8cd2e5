use std::fs;

use tracing::debug;

use crate::config::CredentialSettings;
use crate::utils::error::CredentialError;

/// Private key material: raw bytes, or a handle to a key that never leaves
/// a secure element.
#[derive(Clone, PartialEq, Eq)]
pub enum PrivateKey {
    Bytes(Vec<u8>),
    Handle(String),
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivateKey::Bytes(bytes) => write!(f, "PrivateKey::Bytes({} bytes)", bytes.len()),
            PrivateKey::Handle(name) => write!(f, "PrivateKey::Handle({name})"),
        }
    }
}

/// Key material presented when the transport is established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub device_cert: Vec<u8>,
    pub private_key: PrivateKey,
    pub root_ca: Vec<u8>,
}

impl Credentials {
    pub fn empty() -> Self {
        Self {
            device_cert: Vec::new(),
            private_key: PrivateKey::Bytes(Vec::new()),
            root_ca: Vec::new(),
        }
    }

    /// Whether the credentials carry a client identity.
    pub fn has_client_identity(&self) -> bool {
        let has_key = match &self.private_key {
            PrivateKey::Bytes(bytes) => !bytes.is_empty(),
            PrivateKey::Handle(_) => true,
        };
        !self.device_cert.is_empty() && has_key
    }
}

/// Source of the device certificate, private key and trusted root.
pub trait CredentialStore: Send + Sync {
    fn credentials(&self) -> Result<Credentials, CredentialError>;
}

/// Reads credentials from the paths in [`CredentialSettings`] on every call,
/// so rotated files are picked up at the next reconnect.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    settings: CredentialSettings,
}

impl FileCredentialStore {
    pub fn new(settings: CredentialSettings) -> Self {
        Self { settings }
    }

    fn read(path: &str) -> Result<Vec<u8>, CredentialError> {
        if path.is_empty() {
            return Ok(Vec::new());
        }
        fs::read(path).map_err(|source| CredentialError::Read {
            path: path.to_string(),
            source,
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn credentials(&self) -> Result<Credentials, CredentialError> {
        let private_key = match &self.settings.key_handle {
            Some(handle) => PrivateKey::Handle(handle.clone()),
            None => PrivateKey::Bytes(Self::read(&self.settings.key_path)?),
        };
        let credentials = Credentials {
            device_cert: Self::read(&self.settings.cert_path)?,
            private_key,
            root_ca: Self::read(&self.settings.root_ca_path)?,
        };
        debug!(
            "Loaded credentials: cert {} bytes, root {} bytes",
            credentials.device_cert.len(),
            credentials.root_ca.len()
        );
        Ok(credentials)
    }
}

/// Fixed credentials, for tests and for devices without a client identity.
#[derive(Debug, Clone)]
pub struct StaticCredentialStore(pub Credentials);

impl CredentialStore for StaticCredentialStore {
    fn credentials(&self) -> Result<Credentials, CredentialError> {
        Ok(self.0.clone())
    }
}
