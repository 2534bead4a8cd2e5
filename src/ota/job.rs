//! Job document parsing.
//!
//! Both the `$next/get/accepted` response and `notify-next` carry the same
//! `execution` object. A message without one means no job is pending.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::utils::error::JobError;

const SELF_TEST_READY: &str = "ready";

#[derive(Deserialize)]
struct JobMessage {
    execution: Option<Execution>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Execution {
    job_id: String,
    #[serde(default)]
    status_details: Option<StatusDetails>,
    job_document: Option<JobBody>,
}

#[derive(Deserialize)]
struct StatusDetails {
    self_test: Option<String>,
}

#[derive(Deserialize)]
struct JobBody {
    afr_ota: OtaBody,
}

#[derive(Deserialize)]
struct OtaBody {
    streamname: String,
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct FileEntry {
    #[serde(default)]
    filepath: String,
    filesize: u64,
    fileid: u32,
    #[serde(default)]
    certfile: String,
    #[serde(rename = "sig-sha256-ed25519")]
    signature: String,
}

/// One pending update, immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDocument {
    pub job_id: String,
    pub file_id: u32,
    pub file_size: u64,
    pub signature: Vec<u8>,
    pub stream_name: String,
    pub file_path: String,
    pub cert_file: String,
    /// The previous run activated this job's image and is waiting for
    /// the self-test verdict.
    pub self_test: bool,
}

impl JobDocument {
    /// Parse a job message. `Ok(None)` when no job is pending.
    pub fn parse(raw: &[u8]) -> Result<Option<Self>, JobError> {
        let message: JobMessage = serde_json::from_slice(raw)?;
        let Some(execution) = message.execution else {
            return Ok(None);
        };
        if execution.job_id.is_empty() {
            return Err(JobError::InvalidField("jobId"));
        }

        let body = execution
            .job_document
            .ok_or(JobError::InvalidField("jobDocument"))?
            .afr_ota;
        if body.streamname.is_empty() {
            return Err(JobError::InvalidField("streamname"));
        }
        let file = body.files.into_iter().next().ok_or(JobError::NoFiles)?;
        if file.filesize == 0 {
            return Err(JobError::InvalidField("filesize"));
        }

        let self_test = execution
            .status_details
            .and_then(|details| details.self_test)
            .is_some_and(|value| value == SELF_TEST_READY);

        Ok(Some(Self {
            job_id: execution.job_id,
            file_id: file.fileid,
            file_size: file.filesize,
            signature: decode_signature(&file.signature),
            stream_name: body.streamname,
            file_path: file.filepath,
            cert_file: file.certfile,
            self_test,
        }))
    }
}

/// Signatures normally arrive base64 encoded; anything else is taken as is.
fn decode_signature(raw: &str) -> Vec<u8> {
    STANDARD
        .decode(raw.trim())
        .unwrap_or_else(|_| raw.as_bytes().to_vec())
}
