//! Typed step graph engine.
//!
//! Steps are named units of work connected by directed edges between a
//! virtual [`START`] and [`END`] node. A graph is compiled once, validated,
//! and then invoked many times with fresh input state. Steps whose
//! predecessors have all finished run concurrently.

mod builder;
mod engine;
mod state;
mod step;

pub use builder::StepGraphBuilder;
pub use engine::{GraphOutput, StepGraph};
pub use state::{ExecutionState, Partition, StateUpdate, EXECUTION_TIME_KEY};
pub use step::{FnStep, Step, StepMode, Typed, TypedStep};

/// Virtual entry node.
pub const START: &str = "__start__";

/// Virtual exit node.
pub const END: &str = "__end__";
