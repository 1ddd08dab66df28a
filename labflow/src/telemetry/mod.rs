//! Execution telemetry and logging setup.
//!
//! This module provides:
//! - The `execution_time` map carried in every execution state
//! - The superset merge rule for concurrently produced timing views
//! - Span timing helpers
//! - `tracing-subscriber` initialization

mod execution_time;
mod logging;
mod timer;

pub use execution_time::{merge, ExecutionTime};
pub use logging::{init_tracing, LogFormat};
pub use timer::SpanTimer;
