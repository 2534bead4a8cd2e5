//! The `buffers` module provides the fixed-count pool of byte buffers that
//! carries inbound publishes from the session agent's dispatch path to the
//! update agent's event queue.
//!
//! The pool bounds memory under burst traffic: when it is empty, the producer
//! drops the message instead of blocking the shared session.

pub mod pool;

pub use pool::{BufferPool, PooledBuffer};

#[cfg(test)]
mod tests;
