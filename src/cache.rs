use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::context::TaskContext;
use crate::labels;
use crate::runner::TaskError;
use crate::task::{Task, TaskValue};
use crate::taskid::UntypedTaskRef;

type CachedValue = Arc<dyn Any + Send + Sync>;
type Outcome = Result<CachedValue, TaskError>;

/// The cache key of one memoized execution: the task implementation id plus
/// the concatenated digests of its inputs in declared dependency order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    task_id: String,
    dependency_digest: String,
}

/// Memoized task results, shared across runners.
///
/// Lookups are single-flight: concurrent executions of the same key share
/// one computation, and when it fails every waiter receives the same error.
/// Failed entries are evicted so later runs may retry. The store is
/// unbounded; its lifetime is chosen by the caller, typically process-wide.
#[derive(Default)]
pub struct TaskResultCache {
    entries: DashMap<CacheKey, Arc<OnceCell<Outcome>>>,
}

impl TaskResultCache {
    pub fn new() -> TaskResultCache {
        TaskResultCache::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for TaskResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskResultCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Wraps `task` into an equivalent task whose body is bypassed when a
/// memoized value for the same dependency digest exists in `cache`.
pub fn cached<T: TaskValue>(task: &Task<T>, cache: &Arc<TaskResultCache>) -> Task<T> {
    let labels = task.labels().with(labels::cacheable());
    let deps = task.dependencies().to_vec();
    let inner = task.clone();
    let cache = cache.clone();
    let run_deps = deps.clone();

    Task::from_parts(
        task.id().clone(),
        deps,
        labels,
        Arc::new(move |ctx: TaskContext| {
            let task = inner.clone();
            let cache = cache.clone();
            let deps = run_deps.clone();
            async move {
                let key = CacheKey {
                    task_id: task.id().untyped().to_string(),
                    dependency_digest: dependency_digest(&ctx, &deps)?,
                };
                let cell = {
                    let entry = cache.entries.entry(key.clone()).or_default();
                    entry.value().clone()
                };
                if cell.initialized() {
                    debug!(task.id = %key.task_id, "cache hit");
                }

                let task_id = key.task_id.clone();
                let outcome = cell
                    .get_or_init(|| async {
                        match task.run(ctx).await {
                            Ok(value) => Ok(Arc::new(value) as CachedValue),
                            Err(err) => Err(TaskError::Failed {
                                task_id,
                                cause: Arc::new(err),
                            }),
                        }
                    })
                    .await
                    .clone();

                match outcome {
                    Ok(value) => value.downcast_ref::<T>().cloned().ok_or_else(|| {
                        anyhow::anyhow!(
                            "cache entry for `{}` holds a value of another type",
                            key.task_id
                        )
                    }),
                    Err(err) => {
                        // evict so later runs may retry; current waiters all
                        // share this error
                        cache.entries.remove_if(&key, |_, c| Arc::ptr_eq(c, &cell));
                        Err(anyhow::Error::new(err))
                    }
                }
            }
            .boxed()
        }),
    )
}

fn dependency_digest(ctx: &TaskContext, deps: &[UntypedTaskRef]) -> anyhow::Result<String> {
    let mut digest = String::with_capacity(deps.len() * 16);
    for dep in deps {
        let part = ctx.results().digest(dep.id()).ok_or_else(|| {
            anyhow::anyhow!("dependency `{}` has not produced a value to digest", dep.id())
        })?;
        digest.push_str(&part);
    }
    Ok(digest)
}
