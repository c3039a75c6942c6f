use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::context::TaskContext;
use crate::digest::ContentDigest;
use crate::labels::{LabelOpt, LabelSet};
use crate::taskid::{TaskId, UntypedTaskId, UntypedTaskRef};

/// The bound on values a task may produce: digestible for the result cache,
/// cloneable out of the shared result map, and sendable across workers.
pub trait TaskValue: ContentDigest + Clone + Send + Sync + 'static {}

impl<T: ContentDigest + Clone + Send + Sync + 'static> TaskValue for T {}

type TaskFn<T> =
    Arc<dyn Fn(TaskContext) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// An immutable task descriptor: implementation id, dependency references,
/// labels and the run closure.
///
/// Tasks are constructed once at program start and shared freely; cloning is
/// shallow. The run closure must take its inputs from the result map through
/// the context and communicate only through its return value.
pub struct Task<T: TaskValue> {
    inner: Arc<TaskInner<T>>,
}

struct TaskInner<T: TaskValue> {
    id: TaskId<T>,
    untyped_id: UntypedTaskId,
    deps: Vec<UntypedTaskRef>,
    labels: LabelSet,
    run: TaskFn<T>,
}

impl<T: TaskValue> Task<T> {
    pub fn new<F, Fut>(id: TaskId<T>, deps: Vec<UntypedTaskRef>, runnable: F) -> Task<T>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Task::with_labels(id, deps, vec![], runnable)
    }

    pub fn with_labels<F, Fut>(
        id: TaskId<T>,
        deps: Vec<UntypedTaskRef>,
        label_opts: Vec<LabelOpt>,
        runnable: F,
    ) -> Task<T>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Task::from_parts(
            id,
            deps,
            LabelSet::from_opts(label_opts),
            Arc::new(move |ctx| runnable(ctx).boxed()),
        )
    }

    pub(crate) fn from_parts(
        id: TaskId<T>,
        deps: Vec<UntypedTaskRef>,
        labels: LabelSet,
        run: TaskFn<T>,
    ) -> Task<T> {
        let untyped_id = id.untyped();
        let mut unique = Vec::with_capacity(deps.len());
        for dep in deps {
            if !unique.contains(&dep) {
                unique.push(dep);
            }
        }
        Task {
            inner: Arc::new(TaskInner {
                id,
                untyped_id,
                deps: unique,
                labels,
                run,
            }),
        }
    }

    pub fn id(&self) -> &TaskId<T> {
        &self.inner.id
    }

    pub fn dependencies(&self) -> &[UntypedTaskRef] {
        &self.inner.deps
    }

    pub fn labels(&self) -> &LabelSet {
        &self.inner.labels
    }

    /// Invokes the run closure with the given context.
    pub async fn run(&self, ctx: TaskContext) -> anyhow::Result<T> {
        (self.inner.run)(ctx).await
    }
}

impl<T: TaskValue> Clone for Task<T> {
    fn clone(&self) -> Self {
        Task {
            inner: self.inner.clone(),
        }
    }
}

impl<T: TaskValue> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.untyped_id)
            .field("deps", &self.inner.deps)
            .finish()
    }
}

/// The type-erased view of a task the resolver and runner work with.
///
/// `run_erased` invokes the typed run closure and writes the produced value
/// into the result map under the task's reference identifier.
pub trait UntypedTask: Send + Sync {
    fn untyped_id(&self) -> &UntypedTaskId;

    fn dependencies(&self) -> &[UntypedTaskRef];

    fn labels(&self) -> &LabelSet;

    /// The `TypeId` and type name of the value this task produces.
    fn result_type(&self) -> (TypeId, &'static str);

    fn run_erased(&self, ctx: TaskContext) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<T: TaskValue> UntypedTask for Task<T> {
    fn untyped_id(&self) -> &UntypedTaskId {
        &self.inner.untyped_id
    }

    fn dependencies(&self) -> &[UntypedTaskRef] {
        &self.inner.deps
    }

    fn labels(&self) -> &LabelSet {
        &self.inner.labels
    }

    fn result_type(&self) -> (TypeId, &'static str) {
        (TypeId::of::<T>(), std::any::type_name::<T>())
    }

    fn run_erased(&self, ctx: TaskContext) -> BoxFuture<'static, anyhow::Result<()>> {
        let run = self.inner.run.clone();
        let reference_id = self.inner.untyped_id.reference_id().to_string();
        async move {
            let value = run(ctx.clone()).await?;
            ctx.results().insert(&reference_id, value);
            Ok(())
        }
        .boxed()
    }
}
