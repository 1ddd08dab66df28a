//! # Labflow
//!
//! Orchestration core for automated research experiments.
//!
//! Labflow drives experiments that run somewhere else (CI workflow runs on a
//! VCS host) from a local step graph:
//!
//! - **Step graphs**: named steps with typed inputs and outputs, validated at
//!   compile time and run with sibling concurrency
//! - **Branch fan-out**: one child branch per experiment variation
//! - **Job dispatch**: trigger a remote run, identify it and poll it to a
//!   terminal status under a timeout
//! - **Artifact retrieval**: fetch and decode the outputs of a finished run
//! - **Backoff**: transient/fatal classification with server-supplied hints
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use labflow::prelude::*;
//!
//! let client = Arc::new(GitHubClient::new(token, &config.github, config.backoff.vcs_policy())?);
//! let graph = StepGraphBuilder::new("experiment")
//!     .input_keys(&["base_branch", "variation_ids"])
//!     .output_keys(&["variations"])
//!     .step(Typed(FanoutStep::new(BranchFanout::new(client, config.fanout))))
//!     .chain(&["fan_out"])
//!     .compile()?;
//!
//! let output = graph.invoke(&input).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifacts;
pub mod backoff;
pub mod cancellation;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod fanout;
pub mod graph;
pub mod remote;
pub mod steps;
pub mod telemetry;
pub mod testing;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifacts::ArtifactRetriever;
    pub use crate::backoff::{BackoffPolicy, JitterStrategy};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{
        BackoffConfig, DispatchConfig, FanoutConfig, GitHubConfig, LabflowConfig,
    };
    pub use crate::dispatch::{JobDispatcher, JobTarget};
    pub use crate::errors::{LabflowError, RemoteError};
    pub use crate::fanout::{BranchFanout, FanoutOutcome};
    pub use crate::graph::{
        ExecutionState, FnStep, GraphOutput, StateUpdate, Step, StepGraph, StepGraphBuilder,
        StepMode, Typed, TypedStep, END, START,
    };
    pub use crate::remote::{
        BranchContext, DispatchInputs, GitHubClient, RepoRef, VcsClient, WorkflowRun,
    };
    pub use crate::steps::{DispatchStep, FanoutStep, RetrieveJsonStep};
    pub use crate::telemetry::{init_tracing, ExecutionTime, LogFormat};
}
