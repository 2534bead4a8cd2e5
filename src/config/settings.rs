use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration settings for the agent.
///
/// Every section has defaults, so a missing file or a partial one still
/// yields a complete `Settings`.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub credentials: CredentialSettings,
    pub backoff: BackoffSettings,
    pub session: SessionSettings,
    pub buffers: BufferSettings,
    pub ota: OtaSettings,
    pub logging: LoggingSettings,
}

/// Where the broker lives and how the session identifies itself.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    /// HTTP path of the WebSocket endpoint.
    pub path: String,
    /// Session identity. Empty means "generate one at startup".
    pub client_id: String,
    pub keep_alive_secs: u16,
    pub connack_timeout_ms: u64,
}

/// Paths handed to the credential store. Empty paths yield empty buffers.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CredentialSettings {
    pub cert_path: String,
    pub key_path: String,
    pub root_ca_path: String,
    /// Name of a hardware-held key; takes precedence over `key_path`.
    pub key_handle: Option<String>,
}

/// Reconnect backoff bounds.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackoffSettings {
    pub base_ms: u64,
    pub max_ms: u64,
}

/// Command channel and session agent tuning.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionSettings {
    pub command_queue_len: usize,
    /// Upper bound on commands queued or in flight at once.
    pub command_pool_size: usize,
    pub enqueue_budget_ms: u64,
    pub busy_retry_delay_ms: u64,
    pub busy_retry_limit: u32,
    pub completion_timeout_ms: u64,
    pub max_subscriptions: usize,
}

/// Inbound buffer pool sizing.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BufferSettings {
    pub count: usize,
    pub capacity: usize,
}

/// What the update agent does when a subscription is refused.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeFailurePolicy {
    /// Stop the update agent.
    Abort,
    /// Log the failure and keep going.
    Drop,
}

/// Update state machine settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OtaSettings {
    pub thing_name: String,
    pub block_size: usize,
    pub max_block_size: usize,
    pub blocks_per_request: u32,
    pub request_timeout_ms: u64,
    pub max_request_momentum: u32,
    pub selftest_cooldown_secs: u64,
    pub event_queue_len: usize,
    /// Accepted blocks between two `IN_PROGRESS` reports; 0 disables them.
    pub status_report_interval: u32,
    pub subscribe_failure_policy: SubscribeFailurePolicy,
    pub code_signing_key_path: String,
    pub staging_path: String,
    pub image_path: String,
    pub state_db_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            path: "/mqtt".to_string(),
            client_id: String::new(),
            keep_alive_secs: 60,
            connack_timeout_ms: 5_000,
        }
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 60_000,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            command_queue_len: 16,
            command_pool_size: 16,
            enqueue_budget_ms: 100,
            busy_retry_delay_ms: 200,
            busy_retry_limit: 10,
            completion_timeout_ms: 10_000,
            max_subscriptions: 16,
        }
    }
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            count: 4,
            capacity: 6 * 1024,
        }
    }
}

impl Default for OtaSettings {
    fn default() -> Self {
        Self {
            thing_name: "device".to_string(),
            block_size: 1024,
            max_block_size: 4096,
            blocks_per_request: 1,
            request_timeout_ms: 10_000,
            max_request_momentum: 32,
            selftest_cooldown_secs: 5,
            event_queue_len: 20,
            status_report_interval: 64,
            subscribe_failure_policy: SubscribeFailurePolicy::Drop,
            code_signing_key_path: "certs/code_signing.pub".to_string(),
            staging_path: "image/staging.bin".to_string(),
            image_path: "image/firmware.bin".to_string(),
            state_db_path: "image/state_db".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl BrokerSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }

    pub fn connack_timeout(&self) -> Duration {
        Duration::from_millis(self.connack_timeout_ms)
    }
}

impl SessionSettings {
    pub fn enqueue_budget(&self) -> Duration {
        Duration::from_millis(self.enqueue_budget_ms)
    }

    pub fn busy_retry_delay(&self) -> Duration {
        Duration::from_millis(self.busy_retry_delay_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}

/// Bytes a block envelope carries besides its base64 payload.
const ENVELOPE_OVERHEAD: usize = 128;

impl OtaSettings {
    /// Size of the envelope carrying a `max_block_size` block; inbound
    /// buffers must hold at least this much.
    pub fn max_envelope_len(&self) -> usize {
        self.max_block_size.div_ceil(3) * 4 + ENVELOPE_OVERHEAD
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn selftest_cooldown(&self) -> Duration {
        Duration::from_secs(self.selftest_cooldown_secs)
    }
}
