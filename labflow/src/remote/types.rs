//! Wire and domain types for the VCS-hosting API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Owner/repository coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    /// Account or organization.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepoRef {
    /// Creates new coordinates.
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(owner, name))
            }
            _ => Err(format!("expected 'owner/name', got '{s}'")),
        }
    }
}

/// A branch of a repository and the commit it was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchContext {
    /// Repository coordinates.
    pub repo: RepoRef,
    /// Branch name.
    pub branch: String,
    /// Commit SHA, once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

impl BranchContext {
    /// Creates a context with an unresolved SHA.
    #[must_use]
    pub fn new(repo: RepoRef, branch: impl Into<String>) -> Self {
        Self {
            repo,
            branch: branch.into(),
            sha: None,
        }
    }

    /// Sets the commit SHA.
    #[must_use]
    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    /// Name of the child branch for `variation`: `{branch}-{variation}`.
    #[must_use]
    pub fn child_branch_name(&self, variation: &str) -> String {
        format!("{}-{variation}", self.branch)
    }
}

/// Outcome of a branch creation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCreation {
    /// The branch was created.
    Created,
    /// The branch already existed.
    AlreadyExists,
}

/// A file to include in a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Repository-relative path.
    pub path: String,
    /// File contents.
    pub content: Vec<u8>,
}

impl FileChange {
    /// Creates a file change.
    #[must_use]
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Status of a workflow run or job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting for a runner.
    Queued,
    /// Running.
    InProgress,
    /// Finished; see the conclusion.
    Completed,
    /// Any other non-terminal status (`waiting`, `requested`, `pending`, ...).
    #[serde(other)]
    Pending,
}

impl RunStatus {
    /// Returns true for the terminal status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Completed
    }
}

/// One workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Remote run identifier.
    pub id: u64,
    /// Workflow display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Branch the run executed against.
    #[serde(default)]
    pub head_branch: Option<String>,
    /// Current status.
    pub status: RunStatus,
    /// Conclusion once completed (`success`, `failure`, `cancelled`, `timed_out`, ...).
    #[serde(default)]
    pub conclusion: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Web URL of the run.
    #[serde(default)]
    pub html_url: Option<String>,
}

impl WorkflowRun {
    /// Returns true once the run reached a terminal status.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if the run completed successfully.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.is_completed() && self.conclusion.as_deref() == Some("success")
    }
}

/// One page of workflow runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunList {
    /// Total number of runs matching the filter.
    #[serde(default)]
    pub total_count: u64,
    /// Runs on this page, newest first.
    #[serde(default)]
    pub workflow_runs: Vec<WorkflowRun>,
}

impl WorkflowRunList {
    /// Builds a list whose total is the number of runs given.
    #[must_use]
    pub fn from_runs(workflow_runs: Vec<WorkflowRun>) -> Self {
        Self {
            total_count: workflow_runs.len() as u64,
            workflow_runs,
        }
    }

    /// Number of runs, never less than the runs actually listed.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.total_count.max(self.workflow_runs.len() as u64)
    }

    /// The run with the most recent creation timestamp.
    #[must_use]
    pub fn freshest(&self) -> Option<&WorkflowRun> {
        self.workflow_runs.iter().max_by_key(|run| (run.created_at, run.id))
    }
}

/// A sub-job of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub id: u64,
    /// Job name.
    pub name: String,
    /// Current status.
    pub status: RunStatus,
    /// Conclusion once completed.
    #[serde(default)]
    pub conclusion: Option<String>,
    /// Steps of the job.
    #[serde(default)]
    pub steps: Vec<JobStep>,
}

/// A step within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStep {
    /// Step name.
    pub name: String,
    /// One-based position in the job.
    #[serde(default)]
    pub number: u32,
    /// Current status.
    pub status: RunStatus,
    /// Conclusion once completed.
    #[serde(default)]
    pub conclusion: Option<String>,
}

/// Reference from an artifact to the run that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRunRef {
    /// Run identifier.
    pub id: u64,
    /// Branch of the run.
    #[serde(default)]
    pub head_branch: Option<String>,
}

/// A named artifact produced by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact identifier.
    pub id: u64,
    /// Artifact name.
    pub name: String,
    /// Size of the zip in bytes.
    #[serde(default)]
    pub size_in_bytes: u64,
    /// Whether the artifact has expired.
    #[serde(default)]
    pub expired: bool,
    /// Producing run.
    #[serde(default)]
    pub workflow_run: Option<ArtifactRunRef>,
}

impl Artifact {
    /// Identifier of the producing run.
    #[must_use]
    pub fn run_id(&self) -> Option<u64> {
        self.workflow_run.as_ref().map(|r| r.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repo_ref_parse_and_display() {
        let repo: RepoRef = "acme/lab".parse().unwrap();
        assert_eq!(repo, RepoRef::new("acme", "lab"));
        assert_eq!(repo.to_string(), "acme/lab");

        assert!("acme".parse::<RepoRef>().is_err());
        assert!("acme/lab/extra".parse::<RepoRef>().is_err());
        assert!("/lab".parse::<RepoRef>().is_err());
    }

    #[test]
    fn test_child_branch_name() {
        let base = BranchContext::new(RepoRef::new("acme", "lab"), "exp-main");
        assert_eq!(base.child_branch_name("lr-3e4"), "exp-main-lr-3e4");
    }

    #[test]
    fn test_workflow_run_from_api_json() {
        let run: WorkflowRun = serde_json::from_value(json!({
            "id": 30433642,
            "name": "Run experiment",
            "head_branch": "exp-main-v1",
            "status": "completed",
            "conclusion": "timed_out",
            "created_at": "2024-05-01T12:00:00Z",
            "html_url": "https://github.com/acme/lab/actions/runs/30433642",
            "run_attempt": 1
        }))
        .unwrap();

        assert!(run.is_completed());
        assert!(!run.succeeded());
        assert_eq!(run.conclusion.as_deref(), Some("timed_out"));
    }

    #[test]
    fn test_unknown_status_is_pending() {
        let status: RunStatus = serde_json::from_value(json!("waiting")).unwrap();
        assert_eq!(status, RunStatus::Pending);
        assert!(!status.is_terminal());
    }

    #[test]
    fn test_freshest_run() {
        let list: WorkflowRunList = serde_json::from_value(json!({
            "total_count": 3,
            "workflow_runs": [
                {"id": 1, "status": "completed", "conclusion": "success", "created_at": "2024-05-01T10:00:00Z"},
                {"id": 3, "status": "queued", "created_at": "2024-05-01T12:00:00Z"},
                {"id": 2, "status": "completed", "conclusion": "failure", "created_at": "2024-05-01T11:00:00Z"}
            ]
        }))
        .unwrap();

        assert_eq!(list.count(), 3);
        assert_eq!(list.freshest().map(|r| r.id), Some(3));
    }

    #[test]
    fn test_artifact_run_id() {
        let artifact: Artifact = serde_json::from_value(json!({
            "id": 11,
            "name": "results",
            "size_in_bytes": 1024,
            "expired": false,
            "workflow_run": {"id": 77, "head_branch": "exp-main-v1"}
        }))
        .unwrap();

        assert_eq!(artifact.run_id(), Some(77));
    }
}
