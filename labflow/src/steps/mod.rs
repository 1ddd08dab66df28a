//! Ready-made graph steps.
//!
//! Each step wraps one of the remote-facing components so it can be wired
//! into a [`StepGraph`](crate::graph::StepGraph):
//!
//! | Step | Reads | Writes |
//! |---|---|---|
//! | [`FanoutStep`] | `base_branch`, `variation_ids` | `variations` |
//! | [`DispatchStep`] | `branch`, `dispatch_inputs` | `run` |
//! | [`RetrieveJsonStep`] | `run` | `results` |
//!
//! All of them are [`TypedStep`]s; wrap them in [`Typed`](crate::graph::Typed)
//! before adding them to a builder.

use crate::artifacts::ArtifactRetriever;
use crate::cancellation::CancellationToken;
use crate::dispatch::{JobDispatcher, JobTarget};
use crate::errors::LabflowError;
use crate::fanout::{BranchFanout, FanoutOutcome};
use crate::graph::TypedStep;
use crate::remote::{BranchContext, DispatchInputs, RepoRef, WorkflowRun};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|k| (*k).to_string()).collect()
}

/// Input of [`FanoutStep`].
#[derive(Debug, Clone, Deserialize)]
pub struct FanoutInput {
    /// Base branch to fan out from.
    pub base_branch: BranchContext,
    /// One child branch is created per identifier.
    pub variation_ids: Vec<String>,
}

/// Output of [`FanoutStep`].
#[derive(Debug, Clone, Serialize)]
pub struct FanoutOutput {
    /// Per-variation outcomes, in input order.
    pub variations: Vec<FanoutOutcome>,
}

/// Creates one child branch per variation.
#[derive(Debug, Clone)]
pub struct FanoutStep {
    name: String,
    fanout: BranchFanout,
}

impl FanoutStep {
    /// Creates the step.
    #[must_use]
    pub fn new(fanout: BranchFanout) -> Self {
        Self {
            name: "fan_out".to_string(),
            fanout,
        }
    }

    /// Overrides the step name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl TypedStep for FanoutStep {
    type Input = FanoutInput;
    type Output = FanoutOutput;

    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> Vec<String> {
        keys(&["base_branch", "variation_ids"])
    }

    fn writes(&self) -> Vec<String> {
        keys(&["variations"])
    }

    async fn run(&self, input: FanoutInput) -> Result<FanoutOutput, LabflowError> {
        let variations = self
            .fanout
            .fan_out(&input.base_branch, &input.variation_ids)
            .await?;
        Ok(FanoutOutput { variations })
    }
}

/// Input of [`DispatchStep`].
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchInput {
    /// Branch the run executes against.
    pub branch: String,
    /// Workflow inputs; empty when absent.
    #[serde(default)]
    pub dispatch_inputs: DispatchInputs,
}

/// Output of [`DispatchStep`].
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutput {
    /// The completed, successful run.
    pub run: WorkflowRun,
}

/// Dispatches a workflow on a branch and waits for it to succeed.
#[derive(Debug, Clone)]
pub struct DispatchStep {
    name: String,
    dispatcher: JobDispatcher,
    repo: RepoRef,
    workflow: String,
    token: CancellationToken,
}

impl DispatchStep {
    /// Creates the step for `workflow` in `repo`.
    #[must_use]
    pub fn new(dispatcher: JobDispatcher, repo: RepoRef, workflow: impl Into<String>) -> Self {
        Self {
            name: "dispatch".to_string(),
            dispatcher,
            repo,
            workflow: workflow.into(),
            token: CancellationToken::new(),
        }
    }

    /// Overrides the step name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stops the poll loop when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

#[async_trait]
impl TypedStep for DispatchStep {
    type Input = DispatchInput;
    type Output = DispatchOutput;

    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> Vec<String> {
        keys(&["branch", "dispatch_inputs"])
    }

    fn writes(&self) -> Vec<String> {
        keys(&["run"])
    }

    async fn run(&self, input: DispatchInput) -> Result<DispatchOutput, LabflowError> {
        let target = JobTarget::new(self.repo.clone(), self.workflow.clone(), input.branch);
        let run = self
            .dispatcher
            .run(&target, &input.dispatch_inputs, &self.token)
            .await?;
        Ok(DispatchOutput { run })
    }
}

/// Input of [`RetrieveJsonStep`].
#[derive(Debug, Clone, Deserialize)]
pub struct RetrieveInput {
    /// The completed run.
    pub run: WorkflowRun,
}

/// Output of [`RetrieveJsonStep`].
#[derive(Debug, Clone, Serialize)]
pub struct RetrieveOutput {
    /// Decoded JSON payload.
    pub results: Value,
}

/// Decodes the JSON payload of a run's artifacts.
#[derive(Debug, Clone)]
pub struct RetrieveJsonStep {
    name: String,
    retriever: ArtifactRetriever,
    repo: RepoRef,
    artifact_names: Vec<String>,
}

impl RetrieveJsonStep {
    /// Creates the step; artifacts are tried in `artifact_names` order.
    #[must_use]
    pub fn new(retriever: ArtifactRetriever, repo: RepoRef, artifact_names: &[&str]) -> Self {
        Self {
            name: "retrieve_results".to_string(),
            retriever,
            repo,
            artifact_names: keys(artifact_names),
        }
    }

    /// Overrides the step name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl TypedStep for RetrieveJsonStep {
    type Input = RetrieveInput;
    type Output = RetrieveOutput;

    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> Vec<String> {
        keys(&["run"])
    }

    fn writes(&self) -> Vec<String> {
        keys(&["results"])
    }

    async fn run(&self, input: RetrieveInput) -> Result<RetrieveOutput, LabflowError> {
        let names: Vec<&str> = self.artifact_names.iter().map(String::as_str).collect();
        let results = self
            .retriever
            .retrieve_json(&self.repo, &input.run, &names)
            .await?;
        Ok(RetrieveOutput { results })
    }
}
