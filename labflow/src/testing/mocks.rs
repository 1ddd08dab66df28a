//! In-memory VCS client for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::errors::{LabflowError, RemoteError};
use crate::remote::{
    Artifact, ArtifactRunRef, BranchCreation, DispatchInputs, FileChange, Job, RepoRef, RunStatus,
    VcsClient, WorkflowRun, WorkflowRunList,
};

/// A dispatch recorded by [`MockVcsClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    /// Workflow identifier.
    pub workflow: String,
    /// Branch or tag the run was dispatched against.
    pub git_ref: String,
    /// Inputs sent with the dispatch.
    pub inputs: DispatchInputs,
}

/// What happens when the mock receives a dispatch.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// The run that appears, in its initial state.
    pub run: WorkflowRun,
    /// Number of list calls after the dispatch before the run is listed.
    pub visible_after_lists: usize,
    /// States reported by successive `get_workflow_run` calls; the last one repeats.
    pub progression: Vec<(RunStatus, Option<String>)>,
}

impl RunPlan {
    /// A run that is listed immediately and walks through `progression`.
    #[must_use]
    pub fn new(run: WorkflowRun) -> Self {
        Self {
            run,
            visible_after_lists: 0,
            progression: Vec::new(),
        }
    }

    /// Delays the run's appearance by `lists` list calls.
    #[must_use]
    pub fn visible_after(mut self, lists: usize) -> Self {
        self.visible_after_lists = lists;
        self
    }

    /// Appends a state to the progression.
    #[must_use]
    pub fn then(mut self, status: RunStatus, conclusion: Option<&str>) -> Self {
        self.progression.push((status, conclusion.map(str::to_string)));
        self
    }
}

#[derive(Debug)]
struct MockRun {
    workflow: String,
    run: WorkflowRun,
    visible_from: usize,
    progression: VecDeque<(RunStatus, Option<String>)>,
}

#[derive(Debug, Default)]
struct MockState {
    branches: BTreeMap<String, String>,
    create_failures: HashMap<String, RemoteError>,
    created: Vec<String>,
    commits: Vec<(String, String, Vec<FileChange>)>,
    runs: Vec<MockRun>,
    plans: VecDeque<RunPlan>,
    dispatches: Vec<DispatchRecord>,
    cancelled: Vec<u64>,
    jobs: HashMap<u64, Vec<Job>>,
    artifacts: Vec<Artifact>,
    blobs: HashMap<u64, Vec<u8>>,
    list_calls: usize,
    get_calls: HashMap<u64, usize>,
    active_creates: usize,
    max_active_creates: usize,
}

/// A [`VcsClient`] backed by in-memory state.
///
/// Branches, runs and artifacts are seeded by the test; dispatches consume
/// queued [`RunPlan`]s. All calls are recorded for assertions.
#[derive(Debug, Default)]
pub struct MockVcsClient {
    state: Mutex<MockState>,
    create_delay: Mutex<Duration>,
}

impl MockVcsClient {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a branch at `sha`.
    #[must_use]
    pub fn with_branch(self, branch: impl Into<String>, sha: impl Into<String>) -> Self {
        self.state.lock().branches.insert(branch.into(), sha.into());
        self
    }

    /// Makes creation of `branch` fail with `err`.
    #[must_use]
    pub fn with_create_failure(self, branch: impl Into<String>, err: RemoteError) -> Self {
        self.state.lock().create_failures.insert(branch.into(), err);
        self
    }

    /// Delays every branch creation, to observe concurrency.
    #[must_use]
    pub fn with_create_delay(self, delay: Duration) -> Self {
        *self.create_delay.lock() = delay;
        self
    }

    /// Seeds an existing run of `workflow`.
    #[must_use]
    pub fn with_run(self, workflow: impl Into<String>, run: WorkflowRun) -> Self {
        self.state.lock().runs.push(MockRun {
            workflow: workflow.into(),
            run,
            visible_from: 0,
            progression: VecDeque::new(),
        });
        self
    }

    /// Seeds a run of `workflow` that is only listed once more than `lists` list calls happened.
    #[must_use]
    pub fn with_late_run(self, workflow: impl Into<String>, run: WorkflowRun, lists: usize) -> Self {
        self.state.lock().runs.push(MockRun {
            workflow: workflow.into(),
            run,
            visible_from: lists,
            progression: VecDeque::new(),
        });
        self
    }

    /// Queues the run produced by the next dispatch.
    #[must_use]
    pub fn with_plan(self, plan: RunPlan) -> Self {
        self.state.lock().plans.push_back(plan);
        self
    }

    /// Seeds the jobs of a run.
    #[must_use]
    pub fn with_jobs(self, run_id: u64, jobs: Vec<Job>) -> Self {
        self.state.lock().jobs.insert(run_id, jobs);
        self
    }

    /// Seeds an artifact of `run_id` with zip `bytes`.
    #[must_use]
    pub fn with_artifact(self, id: u64, name: impl Into<String>, run_id: u64, bytes: Vec<u8>) -> Self {
        let mut state = self.state.lock();
        state.artifacts.push(Artifact {
            id,
            name: name.into(),
            size_in_bytes: bytes.len() as u64,
            expired: false,
            workflow_run: Some(ArtifactRunRef {
                id: run_id,
                head_branch: None,
            }),
        });
        state.blobs.insert(id, bytes);
        drop(state);
        self
    }

    /// Branch names created so far, in call order.
    #[must_use]
    pub fn created_branches(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }

    /// Returns true if `branch` exists.
    #[must_use]
    pub fn has_branch(&self, branch: &str) -> bool {
        self.state.lock().branches.contains_key(branch)
    }

    /// Dispatches received so far.
    #[must_use]
    pub fn dispatches(&self) -> Vec<DispatchRecord> {
        self.state.lock().dispatches.clone()
    }

    /// Commits received so far as `(branch, message, files)`.
    #[must_use]
    pub fn commits(&self) -> Vec<(String, String, Vec<FileChange>)> {
        self.state.lock().commits.clone()
    }

    /// Run ids passed to `cancel_workflow_run`.
    #[must_use]
    pub fn cancelled_runs(&self) -> Vec<u64> {
        self.state.lock().cancelled.clone()
    }

    /// Number of `get_workflow_run` calls for `run_id`.
    #[must_use]
    pub fn get_calls(&self, run_id: u64) -> usize {
        self.state.lock().get_calls.get(&run_id).copied().unwrap_or(0)
    }

    /// Run ids that were fetched individually.
    #[must_use]
    pub fn fetched_runs(&self) -> HashSet<u64> {
        self.state.lock().get_calls.keys().copied().collect()
    }

    /// Number of list calls so far.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    /// Highest number of branch creations observed in flight at once.
    #[must_use]
    pub fn max_concurrent_creates(&self) -> usize {
        self.state.lock().max_active_creates
    }
}

fn not_found(what: &str) -> LabflowError {
    LabflowError::FatalRemote(RemoteError::status(404, format!("{what} not found")))
}

#[async_trait]
impl VcsClient for MockVcsClient {
    async fn branch_head_sha(&self, _repo: &RepoRef, branch: &str) -> Result<String, LabflowError> {
        self.state
            .lock()
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| not_found(&format!("branch '{branch}'")))
    }

    async fn create_branch(
        &self,
        _repo: &RepoRef,
        branch: &str,
        sha: &str,
    ) -> Result<BranchCreation, LabflowError> {
        {
            let mut state = self.state.lock();
            state.active_creates += 1;
            state.max_active_creates = state.max_active_creates.max(state.active_creates);
        }

        let delay = *self.create_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.active_creates -= 1;
        state.created.push(branch.to_string());

        if let Some(err) = state.create_failures.get(branch) {
            return Err(LabflowError::FatalRemote(err.clone()));
        }
        if state.branches.contains_key(branch) {
            return Ok(BranchCreation::AlreadyExists);
        }
        state.branches.insert(branch.to_string(), sha.to_string());
        Ok(BranchCreation::Created)
    }

    async fn commit_files(
        &self,
        _repo: &RepoRef,
        branch: &str,
        message: &str,
        files: &[FileChange],
    ) -> Result<String, LabflowError> {
        let mut state = self.state.lock();
        if !state.branches.contains_key(branch) {
            return Err(not_found(&format!("branch '{branch}'")));
        }
        let sha = format!("commit-{}", state.commits.len() + 1);
        state
            .commits
            .push((branch.to_string(), message.to_string(), files.to_vec()));
        state.branches.insert(branch.to_string(), sha.clone());
        Ok(sha)
    }

    async fn dispatch_workflow(
        &self,
        _repo: &RepoRef,
        workflow: &str,
        git_ref: &str,
        inputs: &DispatchInputs,
    ) -> Result<(), LabflowError> {
        let mut state = self.state.lock();
        state.dispatches.push(DispatchRecord {
            workflow: workflow.to_string(),
            git_ref: git_ref.to_string(),
            inputs: inputs.clone(),
        });

        if let Some(plan) = state.plans.pop_front() {
            let visible_from = state.list_calls + plan.visible_after_lists;
            state.runs.push(MockRun {
                workflow: workflow.to_string(),
                run: plan.run,
                visible_from,
                progression: plan.progression.into(),
            });
        }
        Ok(())
    }

    async fn list_workflow_runs(
        &self,
        _repo: &RepoRef,
        workflow: &str,
        branch: &str,
    ) -> Result<WorkflowRunList, LabflowError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        let calls = state.list_calls;

        let mut runs: Vec<WorkflowRun> = state
            .runs
            .iter()
            .filter(|r| r.workflow == workflow && r.run.head_branch.as_deref() == Some(branch))
            .filter(|r| calls > r.visible_from)
            .map(|r| r.run.clone())
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(WorkflowRunList::from_runs(runs))
    }

    async fn get_workflow_run(&self, _repo: &RepoRef, run_id: u64) -> Result<WorkflowRun, LabflowError> {
        let mut state = self.state.lock();
        *state.get_calls.entry(run_id).or_default() += 1;

        let entry = state
            .runs
            .iter_mut()
            .find(|r| r.run.id == run_id)
            .ok_or_else(|| not_found(&format!("run {run_id}")))?;

        if let Some((status, conclusion)) = entry.progression.front().cloned() {
            if entry.progression.len() > 1 {
                entry.progression.pop_front();
            }
            entry.run.status = status;
            entry.run.conclusion = conclusion;
        }
        Ok(entry.run.clone())
    }

    async fn cancel_workflow_run(&self, _repo: &RepoRef, run_id: u64) -> Result<(), LabflowError> {
        self.state.lock().cancelled.push(run_id);
        Ok(())
    }

    async fn list_run_jobs(&self, _repo: &RepoRef, run_id: u64) -> Result<Vec<Job>, LabflowError> {
        Ok(self.state.lock().jobs.get(&run_id).cloned().unwrap_or_default())
    }

    async fn list_artifacts(&self, _repo: &RepoRef) -> Result<Vec<Artifact>, LabflowError> {
        Ok(self.state.lock().artifacts.clone())
    }

    async fn download_artifact(&self, _repo: &RepoRef, artifact_id: u64) -> Result<Vec<u8>, LabflowError> {
        self.state
            .lock()
            .blobs
            .get(&artifact_id)
            .cloned()
            .ok_or_else(|| not_found(&format!("artifact {artifact_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run_at;

    fn repo() -> RepoRef {
        RepoRef::new("acme", "lab")
    }

    #[tokio::test]
    async fn test_create_branch_is_idempotent() {
        let mock = MockVcsClient::new().with_branch("main", "abc");

        let first = mock.create_branch(&repo(), "main-v1", "abc").await.unwrap();
        let second = mock.create_branch(&repo(), "main-v1", "abc").await.unwrap();

        assert_eq!(first, BranchCreation::Created);
        assert_eq!(second, BranchCreation::AlreadyExists);
        assert_eq!(mock.created_branches(), vec!["main-v1", "main-v1"]);
    }

    #[tokio::test]
    async fn test_commit_files_records_and_advances_head() {
        let mock = MockVcsClient::new().with_branch("exp-v1", "abc");
        let files = vec![
            FileChange::new("config/variation.json", r#"{"lr": 0.01}"#),
            FileChange::new("README.md", "v1"),
        ];

        let sha = mock
            .commit_files(&repo(), "exp-v1", "Configure v1", &files)
            .await
            .unwrap();

        assert_eq!(sha, "commit-1");
        assert_eq!(mock.branch_head_sha(&repo(), "exp-v1").await.unwrap(), "commit-1");
        assert_eq!(
            mock.commits(),
            vec![("exp-v1".to_string(), "Configure v1".to_string(), files)]
        );
    }

    #[tokio::test]
    async fn test_commit_files_on_missing_branch() {
        let mock = MockVcsClient::new();

        let err = mock
            .commit_files(&repo(), "ghost", "nope", &[FileChange::new("a.txt", "x")])
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(404));
        assert!(mock.commits().is_empty());
    }

    #[tokio::test]
    async fn test_planned_run_appears_after_delay_and_progresses() {
        let plan = RunPlan::new(run_at(5, "main", 1, RunStatus::Queued, None))
            .visible_after(1)
            .then(RunStatus::InProgress, None)
            .then(RunStatus::Completed, Some("success"));
        let mock = MockVcsClient::new().with_plan(plan);

        mock.dispatch_workflow(&repo(), "exp.yml", "main", &DispatchInputs::new())
            .await
            .unwrap();

        assert_eq!(mock.list_workflow_runs(&repo(), "exp.yml", "main").await.unwrap().count(), 0);
        assert_eq!(mock.list_workflow_runs(&repo(), "exp.yml", "main").await.unwrap().count(), 1);

        let first = mock.get_workflow_run(&repo(), 5).await.unwrap();
        let second = mock.get_workflow_run(&repo(), 5).await.unwrap();
        let third = mock.get_workflow_run(&repo(), 5).await.unwrap();
        assert_eq!(first.status, RunStatus::InProgress);
        assert!(second.succeeded());
        assert!(third.succeeded());
        assert_eq!(mock.get_calls(5), 3);
    }
}
