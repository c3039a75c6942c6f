use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::metadata::progress::TaskProgress;
use crate::metadata::MetadataSet;
use crate::results::TaskResults;
use crate::task::TaskValue;
use crate::taskid::{TaskRef, UntypedTaskId};
use crate::typedmap::TypedMap;

/// Whether a run is a form-editing preview or the final execution.
///
/// The distinction is a property of the run context, not of individual
/// tasks: tasks that must be no-ops during form editing check this mode
/// explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunMode {
    #[serde(rename = "dry-run")]
    DryRun,
    #[serde(rename = "run")]
    Run,
}

/// Caller-supplied input values, keyed by form field id.
#[derive(Clone, Debug, Default)]
pub struct InspectionRequest {
    values: HashMap<String, serde_json::Value>,
}

impl InspectionRequest {
    pub fn new() -> InspectionRequest {
        InspectionRequest::default()
    }

    pub fn from_values(values: HashMap<String, serde_json::Value>) -> InspectionRequest {
        InspectionRequest { values }
    }

    pub fn with_value(mut self, id: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(id.into(), value.into());
        self
    }

    pub fn get(&self, id: &str) -> Option<&serde_json::Value> {
        self.values.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub(crate) struct RunShared {
    pub(crate) cancel: CancellationToken,
    pub(crate) mode: RunMode,
    pub(crate) request: InspectionRequest,
    pub(crate) results: Arc<TaskResults>,
    pub(crate) metadata: Arc<MetadataSet>,
    pub(crate) state: Arc<TypedMap>,
    pub(crate) values: Arc<TypedMap>,
}

/// The context handed to every task run closure.
///
/// Carries the run-wide collaborators (result map, metadata, shared state,
/// cancellation) plus the identity of the task currently executing. Cloning
/// is shallow; per-task derivations share the run-wide parts.
#[derive(Clone)]
pub struct TaskContext {
    shared: Arc<RunShared>,
    task_id: Option<UntypedTaskId>,
    progress: Option<Arc<TaskProgress>>,
}

impl TaskContext {
    pub(crate) fn from_shared(shared: Arc<RunShared>) -> TaskContext {
        TaskContext {
            shared,
            task_id: None,
            progress: None,
        }
    }

    /// Derives the per-task context: same run, tagged with the task's
    /// implementation id and its progress slot when it has one.
    pub(crate) fn for_task(
        &self,
        task_id: UntypedTaskId,
        progress: Option<Arc<TaskProgress>>,
    ) -> TaskContext {
        TaskContext {
            shared: self.shared.clone(),
            task_id: Some(task_id),
            progress,
        }
    }

    pub fn mode(&self) -> RunMode {
        self.shared.mode
    }

    pub fn request(&self) -> &InspectionRequest {
        &self.shared.request
    }

    pub fn results(&self) -> &Arc<TaskResults> {
        &self.shared.results
    }

    pub fn metadata(&self) -> &Arc<MetadataSet> {
        &self.shared.metadata
    }

    /// The shared cache scope: state that outlives single runs when the
    /// caller passes the same map to consecutive runs.
    pub fn shared_state(&self) -> &Arc<TypedMap> {
        &self.shared.state
    }

    /// Caller-supplied context values under application-defined typed keys.
    pub fn values(&self) -> &Arc<TypedMap> {
        &self.shared.values
    }

    /// The implementation id of the task this context belongs to, absent
    /// outside task execution.
    pub fn task_id(&self) -> Option<&UntypedTaskId> {
        self.task_id.as_ref()
    }

    /// The progress slot of the current task, present when the task carries
    /// the progress-reportable label.
    pub fn progress(&self) -> Option<&Arc<TaskProgress>> {
        self.progress.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Resolves when the run is cancelled. Tasks block on this at their
    /// suspension points via `tokio::select!`.
    pub async fn cancelled(&self) {
        self.shared.cancel.cancelled().await
    }

    /// Reads the result a dependency produced, typed by its reference.
    ///
    /// The runner starts a task only after every dependency has written, so
    /// a miss here means the reference was not declared as a dependency or
    /// was read through a reference of the wrong type.
    pub fn dep<T: TaskValue>(&self, reference: &TaskRef<T>) -> anyhow::Result<T> {
        self.shared.results.get::<T>(reference.id()).ok_or_else(|| {
            anyhow::anyhow!(
                "dependency `{}` has no value of type `{}`; was it declared in the task's dependencies?",
                reference.id(),
                std::any::type_name::<T>()
            )
        })
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("mode", &self.shared.mode)
            .field("task_id", &self.task_id)
            .finish()
    }
}

/// Builds a [`TaskContext`] outside a runner, for embedders and tests that
/// execute single tasks against seeded dependency values.
pub struct TaskContextBuilder {
    mode: RunMode,
    request: InspectionRequest,
    results: Arc<TaskResults>,
    metadata: Arc<MetadataSet>,
    state: Arc<TypedMap>,
    values: Arc<TypedMap>,
    cancel: CancellationToken,
}

impl Default for TaskContextBuilder {
    fn default() -> Self {
        TaskContextBuilder {
            mode: RunMode::DryRun,
            request: InspectionRequest::default(),
            results: Arc::new(TaskResults::new()),
            metadata: Arc::new(MetadataSet::new()),
            state: Arc::new(TypedMap::new()),
            values: Arc::new(TypedMap::new()),
            cancel: CancellationToken::new(),
        }
    }
}

impl TaskContextBuilder {
    pub fn new() -> TaskContextBuilder {
        TaskContextBuilder::default()
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn request(mut self, request: InspectionRequest) -> Self {
        self.request = request;
        self
    }

    pub fn results(mut self, results: Arc<TaskResults>) -> Self {
        self.results = results;
        self
    }

    pub fn metadata(mut self, metadata: Arc<MetadataSet>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn shared_state(mut self, state: Arc<TypedMap>) -> Self {
        self.state = state;
        self
    }

    pub fn values(mut self, values: Arc<TypedMap>) -> Self {
        self.values = values;
        self
    }

    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> TaskContext {
        TaskContext::from_shared(Arc::new(RunShared {
            cancel: self.cancel,
            mode: self.mode,
            request: self.request,
            results: self.results,
            metadata: self.metadata,
            state: self.state,
            values: self.values,
        }))
    }
}
