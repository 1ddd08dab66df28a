//! Benchmarks for telemetry merging and graph invocation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use labflow::graph::{ExecutionState, FnStep, StateUpdate, StepGraphBuilder};
use labflow::telemetry::{merge, ExecutionTime};
use serde_json::json;

fn timing(steps: usize, entries: usize) -> ExecutionTime {
    (0..steps)
        .map(|s| (format!("step_{s}"), vec![0.5; entries + s % 3]))
        .collect()
}

fn merge_benchmark(c: &mut Criterion) {
    let existing = timing(64, 4);
    let incoming = timing(64, 5);

    c.bench_function("execution_time_merge", |b| {
        b.iter(|| black_box(merge(black_box(&existing), black_box(&incoming))));
    });
}

fn invoke_benchmark(c: &mut Criterion) {
    let names: Vec<String> = (0..16).map(|i| format!("s{i}")).collect();
    let mut builder = StepGraphBuilder::new("bench").input_keys(&["n"]).output_keys(&["s15"]);
    let mut previous = "n".to_string();
    for name in &names {
        let read = previous.clone();
        let write = name.clone();
        builder = builder.step(
            FnStep::new(name.clone(), move |s: &ExecutionState| {
                let n: i64 = s.get_as(&read)?.unwrap_or(0);
                Ok(StateUpdate::new().with(write.clone(), json!(n + 1)))
            })
            .reading(&[previous.as_str()])
            .writing(&[name.as_str()]),
        );
        previous = name.clone();
    }
    let chain: Vec<&str> = names.iter().map(String::as_str).collect();
    let Ok(graph) = builder.chain(&chain).compile() else {
        return;
    };

    let Ok(runtime) = tokio::runtime::Runtime::new() else {
        return;
    };
    c.bench_function("graph_invoke_16_sync_steps", |b| {
        b.iter(|| runtime.block_on(graph.invoke(&json!({"n": 0}))));
    });
}

criterion_group!(benches, merge_benchmark, invoke_benchmark);
criterion_main!(benches);
