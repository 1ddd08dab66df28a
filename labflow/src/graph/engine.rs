//! Compiled step graph and its ready-set scheduler.

use super::state::{ExecutionState, StateSchema, StateUpdate};
use super::step::{Step, StepMode};
use crate::cancellation::CancellationToken;
use crate::errors::LabflowError;
use crate::telemetry::{ExecutionTime, SpanTimer};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::task::JoinHandle;

type StepTask = JoinHandle<(usize, Result<StateUpdate, LabflowError>, f64)>;

/// Result of a graph invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphOutput {
    /// Declared output keys that hold a value.
    pub values: BTreeMap<String, Value>,
    /// Timing map for the whole invocation.
    pub execution_time: ExecutionTime,
}

impl GraphOutput {
    /// Returns the raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Deserializes the value for `key`, if present.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, LabflowError> {
        self.values
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(LabflowError::from)
    }
}

/// A compiled, immutable step graph.
#[derive(Debug)]
pub struct StepGraph {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    successors: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
    entry: Vec<usize>,
    order: Vec<usize>,
    schema: Arc<StateSchema>,
}

impl StepGraph {
    pub(crate) fn new(
        name: String,
        steps: Vec<Arc<dyn Step>>,
        successors: Vec<Vec<usize>>,
        in_degree: Vec<usize>,
        entry: Vec<usize>,
        order: Vec<usize>,
        schema: Arc<StateSchema>,
    ) -> Self {
        Self {
            name,
            steps,
            successors,
            in_degree,
            entry,
            order,
            schema,
        }
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Returns one topological order of the steps.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.steps[i].name()).collect()
    }

    /// Invokes the graph with the given input.
    ///
    /// `input` must serialize to a JSON object.
    pub async fn invoke<I: Serialize>(&self, input: &I) -> Result<GraphOutput, LabflowError> {
        self.invoke_with_cancel(input, &CancellationToken::new()).await
    }

    /// Invokes the graph, stopping with [`LabflowError::Cancelled`] when `token` fires.
    pub async fn invoke_with_cancel<I: Serialize>(
        &self,
        input: &I,
        token: &CancellationToken,
    ) -> Result<GraphOutput, LabflowError> {
        let input = match serde_json::to_value(input)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(LabflowError::Internal(format!(
                    "graph input must serialize to an object, got {other}"
                )))
            }
        };

        let timer = SpanTimer::start(&self.name);
        let mut state = ExecutionState::new(self.schema.clone(), input)?;
        tracing::debug!(graph = %self.name, steps = self.steps.len(), "Graph invocation started");

        let result = self.schedule(&mut state, token).await;
        match &result {
            Ok(()) => tracing::info!(
                graph = %self.name,
                duration_ms = timer.elapsed_ms(),
                "Graph invocation completed"
            ),
            Err(e) => tracing::warn!(graph = %self.name, error = %e, "Graph invocation failed"),
        }
        result?;

        let hidden: Vec<&str> = state.hidden_keys().collect();
        if !hidden.is_empty() {
            tracing::debug!(graph = %self.name, ?hidden, "Dropping hidden state");
        }

        let (values, execution_time, schema) = state.into_parts();
        let values = values
            .into_iter()
            .filter(|(k, _)| schema.output_keys.contains(k))
            .collect();
        Ok(GraphOutput {
            values,
            execution_time,
        })
    }

    async fn schedule(&self, state: &mut ExecutionState, token: &CancellationToken) -> Result<(), LabflowError> {
        let mut in_degree = self.in_degree.clone();
        let mut ready: VecDeque<usize> = self.entry.iter().copied().collect();
        ready.retain(|&i| in_degree[i] == 0);
        let mut started = vec![false; self.steps.len()];
        let mut in_flight: FuturesUnordered<StepTask> = FuturesUnordered::new();
        let mut completed = 0;

        while completed < self.steps.len() {
            while let Some(i) = ready.pop_front() {
                if std::mem::replace(&mut started[i], true) {
                    continue;
                }
                if token.is_cancelled() {
                    abort_all(&in_flight);
                    return Err(cancelled(token));
                }

                let step = self.steps[i].clone();
                tracing::debug!(graph = %self.name, step = step.name(), "Step started");

                match step.mode() {
                    StepMode::Sync => {
                        let timer = SpanTimer::start(step.name());
                        let result = step.run(state).await;
                        let elapsed = timer.finish();
                        if let Err(e) = self.complete(state, i, result, elapsed, &mut in_degree, &mut ready) {
                            abort_all(&in_flight);
                            return Err(e);
                        }
                        completed += 1;
                    }
                    StepMode::Suspending => {
                        let snapshot = state.clone();
                        in_flight.push(tokio::spawn(async move {
                            let timer = SpanTimer::start(step.name());
                            let result = step.run(&snapshot).await;
                            (i, result, timer.finish())
                        }));
                    }
                }
            }

            if completed == self.steps.len() {
                break;
            }

            if in_flight.is_empty() {
                let pending: Vec<&str> = (0..self.steps.len())
                    .filter(|&i| !started[i])
                    .map(|i| self.steps[i].name())
                    .collect();
                return Err(LabflowError::Internal(format!(
                    "Deadlocked step graph; remaining steps: {pending:?}"
                )));
            }

            let joined = tokio::select! {
                biased;
                () = token.cancelled() => {
                    abort_all(&in_flight);
                    return Err(cancelled(token));
                }
                next = in_flight.next() => next,
            };

            let Some(joined) = joined else { continue };
            let (i, result, elapsed) = match joined {
                Ok(done) => done,
                Err(e) => {
                    abort_all(&in_flight);
                    return Err(LabflowError::Internal(format!("Task join error: {e}")));
                }
            };
            if let Err(e) = self.complete(state, i, result, elapsed, &mut in_degree, &mut ready) {
                abort_all(&in_flight);
                return Err(e);
            }
            completed += 1;
        }

        Ok(())
    }

    fn complete(
        &self,
        state: &mut ExecutionState,
        i: usize,
        result: Result<StateUpdate, LabflowError>,
        elapsed: f64,
        in_degree: &mut [usize],
        ready: &mut VecDeque<usize>,
    ) -> Result<(), LabflowError> {
        let name = self.steps[i].name();
        let update = match result {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(graph = %self.name, step = name, error = %e, "Step failed");
                return Err(e);
            }
        };

        state.apply(name, update)?;
        state.record_time(name, elapsed);
        tracing::debug!(
            graph = %self.name,
            step = name,
            duration_ms = elapsed * 1000.0,
            "Step completed"
        );

        for &next in &self.successors[i] {
            in_degree[next] = in_degree[next].saturating_sub(1);
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
        Ok(())
    }
}

fn abort_all(in_flight: &FuturesUnordered<StepTask>) {
    for task in in_flight {
        task.abort();
    }
}

fn cancelled(token: &CancellationToken) -> LabflowError {
    LabflowError::Cancelled(token.reason().unwrap_or_else(|| "graph invocation cancelled".to_string()))
}
