/// Job and stream topics for one thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaTopics {
    prefix: String,
}

impl OtaTopics {
    pub fn new(thing_name: &str) -> Self {
        Self {
            prefix: format!("$aws/things/{thing_name}"),
        }
    }

    /// Request the next pending job execution.
    pub fn job_get(&self) -> String {
        format!("{}/jobs/$next/get", self.prefix)
    }

    pub fn job_get_accepted(&self) -> String {
        format!("{}/jobs/$next/get/accepted", self.prefix)
    }

    pub fn job_notify_next(&self) -> String {
        format!("{}/jobs/notify-next", self.prefix)
    }

    pub fn job_update(&self, job_id: &str) -> String {
        format!("{}/jobs/{job_id}/update", self.prefix)
    }

    pub fn stream_get(&self, stream_name: &str) -> String {
        format!("{}/streams/{stream_name}/get/json", self.prefix)
    }

    /// Matches the data topic of every stream.
    pub fn stream_data_filter(&self) -> String {
        format!("{}/streams/+/data/json", self.prefix)
    }

    pub fn stream_data(&self, stream_name: &str) -> String {
        format!("{}/streams/{stream_name}/data/json", self.prefix)
    }
}
