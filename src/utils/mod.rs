//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `ota_agent` crate.
//!
//! This module centralizes reusable components, such as the error types
//! shared by every layer and the tracing initialisation used by the binary.

pub mod error;
pub mod logging;
