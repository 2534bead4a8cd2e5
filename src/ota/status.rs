use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;

/// Job execution status reported to the job service.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InProgress,
    Succeeded,
    Failed,
    Rejected,
}

/// Body published to a job's update topic.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: JobStatus,
    #[serde(rename = "statusDetails")]
    pub details: BTreeMap<String, String>,
}

impl StatusReport {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            details: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Serialize, stamping the report time into the details.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut stamped = self.clone();
        stamped
            .details
            .insert("updated_at".to_string(), Utc::now().to_rfc3339());
        serde_json::to_vec(&stamped)
    }
}
