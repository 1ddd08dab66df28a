//! Testing utilities for labflow workflows.
//!
//! This module provides:
//! - An in-memory [`VcsClient`](crate::remote::VcsClient) with scripted runs
//! - A zip builder for artifact fixtures
//! - Shorthand constructors for workflow runs

mod fixtures;
mod mocks;

pub use fixtures::{run_at, ZipFixture};
pub use mocks::{DispatchRecord, MockVcsClient, RunPlan};
