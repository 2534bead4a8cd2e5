//! Topic registry
//!
//! The registry maps topic filters (including `+`/`#` wildcards) to the
//! callbacks that consume them, and routes every inbound publish the session
//! agent receives. It is also the source of truth for resubscribing after a
//! session is recreated without broker-side state.
//!
//! Concurrency note: the registry is shared between the session agent (which
//! mutates it on subscribe/unsubscribe acknowledgements) and producers; the
//! internal lock is never held across I/O or while a callback runs.

pub mod filter;
#[allow(clippy::module_inception)]
pub mod registry;

pub use registry::{Incoming, IncomingCallback, SubscriptionEntry, TopicRegistry};

#[cfg(test)]
mod tests;
