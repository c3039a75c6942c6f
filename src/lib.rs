//! # Weft
//!
//! A typed task DAG engine. Callers describe computations as named, typed
//! tasks with declared dependencies, resolve them into an ordered set, and
//! execute them with maximum legal parallelism while strongly-typed results
//! flow between tasks through a shared result map.
//!
//! The flow begins with [`TaskRef`]s naming the roles of the graph and
//! [`Task`]s binding implementations to those roles. A target [`TaskSet`]
//! resolved against a pool yields a [`ResolvedTaskSet`]; a [`LocalRunner`]
//! executes it, exposing live [`metadata`] during the run and the typed
//! results afterwards. [`cached`] wraps tasks with digest-keyed memoization,
//! and [`form::TextFieldBuilder`] models interactive parameter inputs as
//! ordinary tasks re-evaluated between dry-run and run modes.
//!
//! ```
//! use weft::{LocalRunner, RunMode, RunOptions, Task, TaskId, TaskRef, TaskSet};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let gen: TaskRef<i64> = TaskRef::new("gen");
//! let gen_for_double = gen.clone();
//!
//! let mut target = TaskSet::new();
//! target.add(Task::new(TaskId::new("gen"), vec![], |_ctx| async { Ok(1i64) }))?;
//! target.add(Task::new(
//!     TaskId::new("double"),
//!     vec![gen.untyped()],
//!     move |ctx| {
//!         let gen = gen_for_double.clone();
//!         async move { Ok(ctx.dep(&gen)? * 2) }
//!     },
//! ))?;
//!
//! let runner = LocalRunner::new(target.resolve(&TaskSet::new(), None)?);
//! runner.run(RunOptions::new(RunMode::Run))?;
//! runner.wait().await;
//! let results = runner.result()?;
//! assert_eq!(weft::get_result(&results, &gen), Some(1));
//! # Ok(())
//! # }
//! ```

mod cache;
mod context;
mod digest;
mod registry;
mod results;
mod runner;
mod set;
mod task;
mod taskid;
mod typedmap;

pub mod form;
pub mod labels;
pub mod logging;
pub mod metadata;
pub mod testutil;

pub use cache::{cached, CacheKey, TaskResultCache};
pub use context::{InspectionRequest, RunMode, TaskContext, TaskContextBuilder};
pub use digest::{digest_of, ContentDigest};
pub use registry::TaskRegistry;
pub use results::{get_result, TaskResults};
pub use runner::{initial_value, InitialValue, LocalRunner, RunOptions, RunnerError, TaskError};
pub use set::{ResolveError, ResolvedTaskSet, TaskSet};
pub use task::{Task, TaskValue, UntypedTask};
pub use taskid::{TaskId, TaskRef, UntypedTaskId, UntypedTaskRef};
pub use typedmap::{TypedKey, TypedMap};
