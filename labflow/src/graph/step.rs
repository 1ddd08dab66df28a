//! Step traits and adapters.

use super::state::{ExecutionState, StateUpdate};
use crate::errors::LabflowError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// How the engine schedules a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMode {
    /// Runs inline on the scheduler; must not block.
    Sync,
    /// Spawned as its own task; may suspend on network I/O.
    #[default]
    Suspending,
}

/// A unit of work in a step graph.
///
/// Steps are stateless between invocations: they read a subset of the
/// state and return a partial update.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Returns the name of the step.
    fn name(&self) -> &str;

    /// Returns the scheduling mode.
    fn mode(&self) -> StepMode {
        StepMode::Suspending
    }

    /// State keys this step reads.
    fn reads(&self) -> Vec<String> {
        Vec::new()
    }

    /// State keys this step writes.
    fn writes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Runs the step against the current state.
    async fn run(&self, state: &ExecutionState) -> Result<StateUpdate, LabflowError>;
}

/// A step with typed input and output.
///
/// The input is deserialized from the declared read keys and the output's
/// fields are written back as state keys. Wrap in [`Typed`] to add it to a
/// graph.
#[async_trait]
pub trait TypedStep: Send + Sync + Debug {
    /// Input view of the state.
    type Input: DeserializeOwned + Send;
    /// Partial update produced by the step.
    type Output: Serialize + Send;

    /// Returns the name of the step.
    fn name(&self) -> &str;

    /// Returns the scheduling mode.
    fn mode(&self) -> StepMode {
        StepMode::Suspending
    }

    /// State keys deserialized into [`Self::Input`].
    fn reads(&self) -> Vec<String>;

    /// State keys produced by [`Self::Output`].
    fn writes(&self) -> Vec<String>;

    /// Runs the step.
    async fn run(&self, input: Self::Input) -> Result<Self::Output, LabflowError>;
}

/// Adapter turning a [`TypedStep`] into a [`Step`].
#[derive(Debug, Clone)]
pub struct Typed<S>(pub S);

#[async_trait]
impl<S: TypedStep> Step for Typed<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn mode(&self) -> StepMode {
        self.0.mode()
    }

    fn reads(&self) -> Vec<String> {
        self.0.reads()
    }

    fn writes(&self) -> Vec<String> {
        self.0.writes()
    }

    async fn run(&self, state: &ExecutionState) -> Result<StateUpdate, LabflowError> {
        let object = state.project(&self.0.reads())?;
        let input: S::Input = serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| LabflowError::step_failed(self.0.name(), format!("invalid input: {e}")))?;

        let output = self.0.run(input).await?;
        StateUpdate::from_serializable(&output)
            .map_err(|e| LabflowError::step_failed(self.0.name(), e.to_string()))
    }
}

/// A synchronous closure step.
pub struct FnStep<F>
where
    F: Fn(&ExecutionState) -> Result<StateUpdate, LabflowError> + Send + Sync,
{
    name: String,
    reads: Vec<String>,
    writes: Vec<String>,
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn(&ExecutionState) -> Result<StateUpdate, LabflowError> + Send + Sync,
{
    /// Creates a new function-based step.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            reads: Vec::new(),
            writes: Vec::new(),
            func,
        }
    }

    /// Declares read keys.
    #[must_use]
    pub fn reading(mut self, keys: &[&str]) -> Self {
        self.reads = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    /// Declares write keys.
    #[must_use]
    pub fn writing(mut self, keys: &[&str]) -> Self {
        self.writes = keys.iter().map(|k| (*k).to_string()).collect();
        self
    }
}

impl<F> Debug for FnStep<F>
where
    F: Fn(&ExecutionState) -> Result<StateUpdate, LabflowError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep")
            .field("name", &self.name)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .finish()
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(&ExecutionState) -> Result<StateUpdate, LabflowError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> StepMode {
        StepMode::Sync
    }

    fn reads(&self) -> Vec<String> {
        self.reads.clone()
    }

    fn writes(&self) -> Vec<String> {
        self.writes.clone()
    }

    async fn run(&self, state: &ExecutionState) -> Result<StateUpdate, LabflowError> {
        (self.func)(state)
    }
}
