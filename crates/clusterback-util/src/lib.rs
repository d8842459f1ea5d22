//! Shared utilities for clusterback.
//!
//! This crate provides common utilities used across the clusterback workspace:
//! - Monotonic ULID-based identifier generation
//! - Logging setup with tracing
//! - Standard directories for state and configuration
//! - RAII-based timing for operation measurement

pub mod id;
pub mod log;
pub mod path;
pub mod timing;

pub use id::{IdPrefix, Identifier};
pub use log::{LogConfig, LogLevel};
pub use timing::TimingGuard;
