//! Retry and backoff policy for remote calls.
//!
//! This module provides:
//! - Classification of failures into retryable and fatal
//! - Server backoff hints (`Retry-After`, structured `RetryInfo` payloads)
//! - Capped exponential backoff with optional jitter
//! - A retry loop that returns the last error unchanged on exhaustion

mod classify;
mod policy;

pub use classify::{
    retry_after_hint, retry_info_hint, Classification, ClassifyError, DEFAULT_MESSAGE_TOKENS,
    DEFAULT_RETRY_STATUSES,
};
pub use policy::{BackoffDecision, BackoffPolicy, JitterStrategy};
