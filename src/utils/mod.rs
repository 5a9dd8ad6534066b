//! # Utility Modules
//!
//! Supporting utilities for buffering, logging, metrics, and timing.
//!
//! This module provides reusable utilities used throughout the gateway core.
//!
//! ## Components
//! - **Buffer Pool**: Reusable send regions with return-on-drop semantics
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Async timeout wrappers and shared deadline constants

pub mod buffer_pool;
pub mod logging;
pub mod metrics;
pub mod timeout;

// Re-export public types for advanced users
pub use buffer_pool::{BufferPool, PooledBuffer};
pub use metrics::{Metrics, MetricsSnapshot};
