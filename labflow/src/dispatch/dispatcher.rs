//! Dispatch-and-poll driver.

use super::diagnostics::{failing_jobs, JobDiagnostic};
use super::state::DispatchState;
use crate::cancellation::CancellationToken;
use crate::config::DispatchConfig;
use crate::errors::LabflowError;
use crate::remote::{DispatchInputs, RepoRef, VcsClient, WorkflowRun};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Where a job is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTarget {
    /// Repository coordinates.
    pub repo: RepoRef,
    /// Workflow identifier (file name or numeric id).
    pub workflow: String,
    /// Branch the run executes against.
    pub branch: String,
}

impl JobTarget {
    /// Creates a target.
    #[must_use]
    pub fn new(repo: RepoRef, workflow: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo,
            workflow: workflow.into(),
            branch: branch.into(),
        }
    }
}

/// Triggers remote jobs and waits for their completion.
///
/// Dispatches against the same workflow and branch must be serialized by the
/// caller: if two dispatches race, the freshest-run heuristic may pin the
/// other caller's run.
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    client: Arc<dyn VcsClient>,
    config: DispatchConfig,
}

impl JobDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(client: Arc<dyn VcsClient>, config: DispatchConfig) -> Self {
        Self { client, config }
    }

    /// Returns the dispatch configuration.
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatches a run of `target` and polls it to completion.
    ///
    /// # Errors
    ///
    /// - [`LabflowError::JobFailed`] when the run concludes with anything but `success`
    /// - [`LabflowError::JobTimeout`] when no terminal status is seen within the budget
    /// - [`LabflowError::Cancelled`] when `token` is cancelled
    pub async fn run(
        &self,
        target: &JobTarget,
        inputs: &DispatchInputs,
        token: &CancellationToken,
    ) -> Result<WorkflowRun, LabflowError> {
        log_transition(target, &DispatchState::NotStarted);

        let baseline = guarded(
            token,
            self.client
                .list_workflow_runs(&target.repo, &target.workflow, &target.branch),
        )
        .await?
        .count();

        guarded(
            token,
            self.client
                .dispatch_workflow(&target.repo, &target.workflow, &target.branch, inputs),
        )
        .await?;
        log_transition(target, &DispatchState::Dispatched { baseline });

        let started = Instant::now();
        let deadline = started.checked_add(self.config.timeout()).ok_or_else(|| {
            LabflowError::InvalidConfig(format!("poll timeout {:?} is too large", self.config.timeout()))
        })?;
        let mut pinned: Option<u64> = None;

        loop {
            let observed = match pinned {
                None => {
                    let list = guarded(
                        token,
                        self.client
                            .list_workflow_runs(&target.repo, &target.workflow, &target.branch),
                    )
                    .await?;
                    let fresh = if list.count() > baseline {
                        list.freshest().cloned()
                    } else {
                        None
                    };
                    if let Some(run) = &fresh {
                        pinned = Some(run.id);
                        log_transition(target, &DispatchState::Pinned { run_id: run.id });
                    } else {
                        tracing::debug!(
                            workflow = %target.workflow,
                            branch = %target.branch,
                            listed = list.count(),
                            baseline,
                            "Run not listed yet"
                        );
                    }
                    fresh
                }
                Some(run_id) => {
                    Some(guarded(token, self.client.get_workflow_run(&target.repo, run_id)).await?)
                }
            };

            if let Some(run) = observed {
                tracing::debug!(run_id = run.id, status = ?run.status, "Polled run");
                if run.is_completed() {
                    return self.conclude(target, run).await;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let waited = started.elapsed();
                log_transition(target, &DispatchState::PollTimeout { run_id: pinned, waited });
                return Err(LabflowError::JobTimeout {
                    run_id: pinned,
                    waited,
                });
            }

            if !token.sleep(self.config.poll_interval().min(remaining)).await {
                return Err(cancelled(token));
            }
        }
    }

    async fn conclude(&self, target: &JobTarget, run: WorkflowRun) -> Result<WorkflowRun, LabflowError> {
        let conclusion = run.conclusion.clone().unwrap_or_else(|| "unknown".to_string());
        log_transition(
            target,
            &DispatchState::Completed {
                run_id: run.id,
                conclusion: conclusion.clone(),
            },
        );

        if run.succeeded() {
            return Ok(run);
        }

        if self.config.diagnose_on_failure {
            if let Err(e) = self.diagnose(&target.repo, run.id).await {
                tracing::warn!(run_id = run.id, error = %e, "Could not diagnose failed run");
            }
        }
        Err(LabflowError::JobFailed {
            run_id: run.id,
            conclusion,
        })
    }

    /// Requests cancellation of a run.
    ///
    /// This does not stop a poll loop watching the run; that loop observes
    /// the resulting `cancelled` conclusion like any other.
    pub async fn cancel(&self, repo: &RepoRef, run_id: u64) -> Result<(), LabflowError> {
        tracing::info!(repo = %repo, run_id, "Cancelling run");
        self.client.cancel_workflow_run(repo, run_id).await
    }

    /// Logs and returns the sub-jobs and steps of a run that did not succeed.
    pub async fn diagnose(&self, repo: &RepoRef, run_id: u64) -> Result<Vec<JobDiagnostic>, LabflowError> {
        let diagnostics = failing_jobs(self.client.list_run_jobs(repo, run_id).await?);

        for job in &diagnostics {
            tracing::warn!(
                run_id,
                job = %job.job_name,
                conclusion = job.conclusion.as_deref().unwrap_or("unknown"),
                "Job did not succeed"
            );
            for step in &job.failed_steps {
                tracing::warn!(
                    run_id,
                    job = %job.job_name,
                    step = %step.name,
                    number = step.number,
                    conclusion = step.conclusion.as_deref().unwrap_or("unknown"),
                    "Step did not succeed"
                );
            }
        }
        Ok(diagnostics)
    }
}

async fn guarded<T>(
    token: &CancellationToken,
    call: impl Future<Output = Result<T, LabflowError>>,
) -> Result<T, LabflowError> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(cancelled(token)),
        result = call => result,
    }
}

fn log_transition(target: &JobTarget, state: &DispatchState) {
    if state.is_terminal() {
        tracing::info!(
            repo = %target.repo,
            workflow = %target.workflow,
            branch = %target.branch,
            state = %state,
            "Dispatch finished"
        );
    } else {
        tracing::info!(
            repo = %target.repo,
            workflow = %target.workflow,
            branch = %target.branch,
            state = %state,
            "Dispatch state changed"
        );
    }
}

fn cancelled(token: &CancellationToken) -> LabflowError {
    LabflowError::Cancelled(token.reason().unwrap_or_else(|| "dispatch poll cancelled".to_string()))
}
