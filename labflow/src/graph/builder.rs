//! Step graph builder with compile-time validation.

use super::engine::StepGraph;
use super::state::{StateSchema, EXECUTION_TIME_KEY};
use super::step::Step;
use super::{END, START};
use crate::errors::{CycleDetectedError, GraphValidationError, LabflowError, ValidationInfo};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Builder for creating validated step graphs.
#[derive(Debug, Clone)]
pub struct StepGraphBuilder {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    edges: Vec<(String, String)>,
    input_keys: BTreeSet<String>,
    output_keys: BTreeSet<String>,
}

impl StepGraphBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            edges: Vec::new(),
            input_keys: BTreeSet::new(),
            output_keys: BTreeSet::new(),
        }
    }

    /// Declares the caller-supplied keys.
    #[must_use]
    pub fn input_keys(mut self, keys: &[&str]) -> Self {
        self.input_keys.extend(keys.iter().map(|k| (*k).to_string()));
        self
    }

    /// Declares the keys returned to the caller.
    #[must_use]
    pub fn output_keys(mut self, keys: &[&str]) -> Self {
        self.output_keys.extend(keys.iter().map(|k| (*k).to_string()));
        self
    }

    /// Adds a step.
    #[must_use]
    pub fn step(self, step: impl Step + 'static) -> Self {
        self.step_arc(Arc::new(step))
    }

    /// Adds a shared step.
    #[must_use]
    pub fn step_arc(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// Adds a directed edge. Use [`START`] and [`END`] for the virtual nodes.
    #[must_use]
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Adds edges `START -> a -> b -> ... -> END`.
    #[must_use]
    pub fn chain(mut self, names: &[&str]) -> Self {
        let mut previous = START.to_string();
        for name in names {
            self.edges.push((previous, (*name).to_string()));
            previous = (*name).to_string();
        }
        self.edges.push((previous, END.to_string()));
        self
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

    /// Validates the graph and compiles it.
    ///
    /// # Errors
    ///
    /// Returns [`LabflowError::Validation`] or [`LabflowError::CycleDetected`].
    pub fn compile(self) -> Result<StepGraph, LabflowError> {
        if self.steps.is_empty() {
            return Err(invalid(
                "Step graph has no steps",
                Vec::new(),
                "GRAPH-EMPTY",
                "Add at least one step before compiling.",
            ));
        }

        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            let name = step.name().to_string();
            if name == START || name == END {
                return Err(invalid(
                    format!("Step name '{name}' is reserved"),
                    vec![name],
                    "GRAPH-RESERVED-NAME",
                    "Rename the step.",
                ));
            }
            if index.insert(name.clone(), i).is_some() {
                return Err(invalid(
                    format!("Step '{name}' is defined more than once"),
                    vec![name],
                    "GRAPH-DUPLICATE-STEP",
                    "Give every step a unique name.",
                ));
            }
        }

        let n = self.steps.len();
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut entry: Vec<usize> = Vec::new();
        let mut exits: HashSet<usize> = HashSet::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for (from, to) in &self.edges {
            if !seen.insert((from.clone(), to.clone())) {
                continue;
            }
            if from == END || to == START || (from == START && to == END) {
                return Err(invalid(
                    format!("Edge '{from}' -> '{to}' is not allowed"),
                    vec![from.clone(), to.clone()],
                    "GRAPH-INVALID-EDGE",
                    "START may only point at steps and only steps may point at END.",
                ));
            }
            let lookup = |name: &String| {
                index.get(name).copied().ok_or_else(|| {
                    invalid(
                        format!("Edge '{from}' -> '{to}' references unknown step '{name}'"),
                        vec![name.clone()],
                        "GRAPH-UNKNOWN-STEP",
                        "Add the step before wiring edges to it.",
                    )
                })
            };
            match (from.as_str(), to.as_str()) {
                (START, _) => entry.push(lookup(to)?),
                (_, END) => {
                    exits.insert(lookup(from)?);
                }
                _ => {
                    let (f, t) = (lookup(from)?, lookup(to)?);
                    successors[f].push(t);
                    predecessors[t].push(f);
                }
            }
        }

        detect_cycles(&self.steps, &successors)?;

        let entries: HashSet<usize> = entry.iter().copied().collect();
        for i in 0..n {
            let name = self.steps[i].name();
            if predecessors[i].is_empty() && !entries.contains(&i) {
                return Err(invalid(
                    format!("Step '{name}' has no incoming edge"),
                    vec![name.to_string()],
                    "GRAPH-UNREACHABLE",
                    "Connect it from START or from another step.",
                ));
            }
            if successors[i].is_empty() && !exits.contains(&i) {
                return Err(invalid(
                    format!("Step '{name}' has no outgoing edge"),
                    vec![name.to_string()],
                    "GRAPH-DEAD-END",
                    "Connect it to END or to another step.",
                ));
            }
        }
        if entry.is_empty() || exits.is_empty() {
            return Err(invalid(
                "START and END must both be connected",
                Vec::new(),
                "GRAPH-UNREACHABLE",
                "Add an edge from START and an edge into END.",
            ));
        }

        let order = topological_order(n, &predecessors, &successors);
        self.check_keys(&order, &predecessors)?;

        let schema = Arc::new(StateSchema {
            input_keys: self.input_keys,
            output_keys: self.output_keys,
        });

        Ok(StepGraph::new(
            self.name,
            self.steps,
            successors,
            predecessors.iter().map(Vec::len).collect(),
            entry,
            order,
            schema,
        ))
    }

    fn check_keys(&self, order: &[usize], predecessors: &[Vec<usize>]) -> Result<(), LabflowError> {
        let mut ancestors: Vec<HashSet<usize>> = vec![HashSet::new(); self.steps.len()];
        for &i in order {
            let mut set = HashSet::new();
            for &p in &predecessors[i] {
                set.insert(p);
                set.extend(ancestors[p].iter().copied());
            }
            ancestors[i] = set;
        }

        for &i in order {
            let step = &self.steps[i];
            for key in step.writes() {
                if self.input_keys.contains(&key) {
                    return Err(invalid(
                        format!("Step '{}' writes input key '{key}'", step.name()),
                        vec![step.name().to_string()],
                        "GRAPH-INPUT-WRITE",
                        "Input keys are immutable; write to a new key instead.",
                    ));
                }
            }
            for key in step.reads() {
                let satisfied = key == EXECUTION_TIME_KEY
                    || self.input_keys.contains(&key)
                    || ancestors[i].iter().any(|&a| self.steps[a].writes().contains(&key));
                if !satisfied {
                    return Err(invalid(
                        format!(
                            "Step '{}' reads '{key}', which is neither an input nor written upstream",
                            step.name()
                        ),
                        vec![step.name().to_string()],
                        "GRAPH-UNDECLARED-READ",
                        "Declare the key as an input or add an edge from the step that writes it.",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>, steps: Vec<String>, code: &str, hint: &str) -> LabflowError {
    let message = message.into();
    GraphValidationError::new(message.clone())
        .with_steps(steps)
        .with_info(ValidationInfo::new(code, message).with_fix_hint(hint))
        .into()
}

fn detect_cycles(steps: &[Arc<dyn Step>], successors: &[Vec<usize>]) -> Result<(), CycleDetectedError> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for i in 0..steps.len() {
        if !visited.contains(&i) {
            if let Some(cycle) = dfs_cycle(i, successors, &mut visited, &mut rec_stack, &mut path) {
                return Err(CycleDetectedError::new(
                    cycle.into_iter().map(|j| steps[j].name().to_string()).collect(),
                ));
            }
        }
    }
    Ok(())
}

fn dfs_cycle(
    node: usize,
    successors: &[Vec<usize>],
    visited: &mut HashSet<usize>,
    rec_stack: &mut HashSet<usize>,
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    for &next in &successors[node] {
        if !visited.contains(&next) {
            if let Some(cycle) = dfs_cycle(next, successors, visited, rec_stack, path) {
                return Some(cycle);
            }
        } else if rec_stack.contains(&next) {
            let start = path.iter().position(|&n| n == next).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(next);
            return Some(cycle);
        }
    }

    path.pop();
    rec_stack.remove(&node);
    None
}

/// Kahn's algorithm with insertion order as the tie-break.
fn topological_order(n: usize, predecessors: &[Vec<usize>], successors: &[Vec<usize>]) -> Vec<usize> {
    let mut remaining: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &s in &successors[i] {
            remaining[s] -= 1;
            if remaining[s] == 0 {
                ready.insert(s);
            }
        }
    }
    order
}
