//! The VCS client trait.

use super::inputs::DispatchInputs;
use super::types::{Artifact, BranchCreation, FileChange, Job, RepoRef, WorkflowRun, WorkflowRunList};
use crate::errors::LabflowError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Operations the orchestration core needs from a VCS-hosting service.
///
/// Implementations apply their own retry policy; errors returned here have
/// already been classified as transient (budget exhausted) or fatal.
#[async_trait]
pub trait VcsClient: Send + Sync + Debug {
    /// Returns the commit SHA at the head of `branch`.
    async fn branch_head_sha(&self, repo: &RepoRef, branch: &str) -> Result<String, LabflowError>;

    /// Creates `branch` at `sha`. An existing branch is not an error.
    async fn create_branch(
        &self,
        repo: &RepoRef,
        branch: &str,
        sha: &str,
    ) -> Result<BranchCreation, LabflowError>;

    /// Commits `files` on top of `branch` and returns the new commit SHA.
    async fn commit_files(
        &self,
        repo: &RepoRef,
        branch: &str,
        message: &str,
        files: &[FileChange],
    ) -> Result<String, LabflowError>;

    /// Triggers a workflow run. The remote API returns no run handle.
    async fn dispatch_workflow(
        &self,
        repo: &RepoRef,
        workflow: &str,
        git_ref: &str,
        inputs: &DispatchInputs,
    ) -> Result<(), LabflowError>;

    /// Lists runs of `workflow` on `branch`, newest first.
    async fn list_workflow_runs(
        &self,
        repo: &RepoRef,
        workflow: &str,
        branch: &str,
    ) -> Result<WorkflowRunList, LabflowError>;

    /// Fetches one run.
    async fn get_workflow_run(&self, repo: &RepoRef, run_id: u64) -> Result<WorkflowRun, LabflowError>;

    /// Requests cancellation of a run.
    async fn cancel_workflow_run(&self, repo: &RepoRef, run_id: u64) -> Result<(), LabflowError>;

    /// Lists the jobs (with their steps) of a run.
    async fn list_run_jobs(&self, repo: &RepoRef, run_id: u64) -> Result<Vec<Job>, LabflowError>;

    /// Lists artifacts of the repository.
    async fn list_artifacts(&self, repo: &RepoRef) -> Result<Vec<Artifact>, LabflowError>;

    /// Downloads an artifact as zip bytes.
    async fn download_artifact(&self, repo: &RepoRef, artifact_id: u64) -> Result<Vec<u8>, LabflowError>;
}
