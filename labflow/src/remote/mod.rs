//! Remote VCS-hosting surface.
//!
//! [`VcsClient`] is the seam between the orchestration core and the hosting
//! service. [`GitHubClient`] implements it over the GitHub REST API; tests use
//! the in-memory mock from [`crate::testing`].

mod client;
mod github;
mod inputs;
mod types;

pub use client::VcsClient;
pub use github::GitHubClient;
pub use inputs::DispatchInputs;
pub use types::{
    Artifact, ArtifactRunRef, BranchContext, BranchCreation, FileChange, Job, JobStep, RepoRef,
    RunStatus, WorkflowRun, WorkflowRunList,
};
