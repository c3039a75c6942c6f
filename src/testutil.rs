//! Helpers for exercising single tasks outside a runner.
//!
//! Tests (and embedders writing tests) run one task against seeded
//! dependency values instead of resolving and running a whole graph.

use crate::context::{InspectionRequest, RunMode, TaskContext, TaskContextBuilder};
use crate::results::TaskResults;
use crate::task::{Task, TaskValue};
use crate::taskid::TaskRef;

/// A dependency value registered into a test context's result map.
pub struct DependencyValue {
    write: Box<dyn Fn(&TaskResults) + Send + Sync>,
}

impl DependencyValue {
    pub fn register(&self, results: &TaskResults) {
        (self.write)(results)
    }
}

/// Pairs `reference` with the value its provider would have produced.
pub fn dependency_value<T: TaskValue>(reference: &TaskRef<T>, value: T) -> DependencyValue {
    let reference_id = reference.id().to_string();
    DependencyValue {
        write: Box::new(move |results| results.insert(&reference_id, value.clone())),
    }
}

pub fn context_builder() -> TaskContextBuilder {
    TaskContextBuilder::new()
}

/// Runs `task` once in a fresh context with the given dependency values.
pub async fn run_task<T: TaskValue>(
    task: &Task<T>,
    mode: RunMode,
    request: InspectionRequest,
    dependencies: &[DependencyValue],
) -> anyhow::Result<T> {
    let ctx = context_builder().mode(mode).request(request).build();
    for dependency in dependencies {
        dependency.register(ctx.results());
    }
    run_task_in(task, &ctx).await
}

/// Runs `task` in a caller-built context, e.g. to share state across runs.
pub async fn run_task_in<T: TaskValue>(task: &Task<T>, ctx: &TaskContext) -> anyhow::Result<T> {
    let task_ctx = ctx.for_task(task.id().untyped(), None);
    task.run(task_ctx).await
}
