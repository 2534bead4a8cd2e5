//! # ota_agent
//!
//! `ota_agent` keeps an IoT device attached to an MQTT-style broker over a
//! WebSocket and installs firmware updates delivered through a job and
//! stream service.
//!
//! ## Core Modules
//!
//! - `transport`: The byte stream under the session, its packet format and the credential store.
//! - `session`: The command channel, the client facade and the agent task that owns the session.
//! - `connection`: Reconnect loop with jittered exponential backoff and lifecycle events.
//! - `registry`: Topic filters and the callbacks that consume matching publishes.
//! - `buffers`: Fixed pool of buffers that carry inbound payloads to the update agent.
//! - `ota`: Job discovery, block transfer, verification and activation.
//! - `persistence`: Boot image state that survives a reset.
//! - `config`: Layered settings loading.
//! - `utils`: Error types and logging setup.

pub mod buffers;
pub mod config;
pub mod connection;
pub mod ota;
pub mod persistence;
pub mod registry;
pub mod session;
pub mod transport;
pub mod utils;
