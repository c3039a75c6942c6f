use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use crate::context::{InspectionRequest, RunMode, RunShared, TaskContext};
use crate::logging;
use crate::metadata::progress::ProgressSet;
use crate::metadata::MetadataSet;
use crate::results::TaskResults;
use crate::set::ResolvedTaskSet;
use crate::task::TaskValue;
use crate::taskid::TaskRef;
use crate::typedmap::TypedMap;

/// The failure of one run, raised by a task or by cancellation.
///
/// Clonable so that every waiter of a single-flight cache computation
/// receives the same error.
#[derive(Clone, Debug, Error)]
pub enum TaskError {
    #[error("task `{task_id}` failed: {cause}")]
    Failed {
        task_id: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("task `{task_id}` panicked")]
    Panicked { task_id: String },

    #[error("run cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskError::Failed { task_id, .. } => Some(task_id),
            TaskError::Panicked { task_id } => Some(task_id),
            TaskError::Cancelled => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("runner has already been started")]
    AlreadyStarted,

    #[error("runner has not been started")]
    NotStarted,

    #[error("run has not completed yet")]
    StillRunning,

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// A typed value written into the result map before any task starts.
pub struct InitialValue {
    write: Box<dyn FnOnce(&TaskResults) + Send>,
}

/// Seeds the result map slot of `reference` with `value` for one run.
pub fn initial_value<T: TaskValue>(reference: &TaskRef<T>, value: T) -> InitialValue {
    let reference_id = reference.id().to_string();
    InitialValue {
        write: Box::new(move |results| results.insert(&reference_id, value)),
    }
}

/// Configuration of one run: mode, request, cancellation parent, the shared
/// cache scope and initial values.
pub struct RunOptions {
    mode: RunMode,
    request: InspectionRequest,
    cancel: CancellationToken,
    shared_state: Arc<TypedMap>,
    values: Arc<TypedMap>,
    initial_values: Vec<InitialValue>,
}

impl RunOptions {
    pub fn new(mode: RunMode) -> RunOptions {
        RunOptions {
            mode,
            request: InspectionRequest::default(),
            cancel: CancellationToken::new(),
            shared_state: Arc::new(TypedMap::new()),
            values: Arc::new(TypedMap::new()),
            initial_values: Vec::new(),
        }
    }

    pub fn with_request(mut self, request: InspectionRequest) -> Self {
        self.request = request;
        self
    }

    /// Makes the run a child of `cancel`: cancelling it cancels every task.
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// State outliving single runs, e.g. form value history. Pass the same
    /// map to consecutive runs to retain it.
    pub fn with_shared_state(mut self, state: Arc<TypedMap>) -> Self {
        self.shared_state = state;
        self
    }

    pub fn with_values(mut self, values: Arc<TypedMap>) -> Self {
        self.values = values;
        self
    }

    pub fn with_initial_value(mut self, value: InitialValue) -> Self {
        self.initial_values.push(value);
        self
    }
}

/// Executes a resolved set with maximum legal parallelism.
///
/// One runner performs one run: it owns the run's result and metadata maps
/// and spawns one worker per task. A worker starts once every producer of
/// its dependencies has written its result, so producer writes always
/// happen before dependant reads. The first failing task records its error
/// and cancels the rest; external cancellation surfaces as
/// [`TaskError::Cancelled`].
pub struct LocalRunner {
    resolved: ResolvedTaskSet,
    results: Arc<TaskResults>,
    metadata: Arc<MetadataSet>,
    started: AtomicBool,
    done_tx: Arc<watch::Sender<bool>>,
    done_rx: watch::Receiver<bool>,
    final_error: Arc<Mutex<Option<TaskError>>>,
}

impl LocalRunner {
    pub fn new(resolved: ResolvedTaskSet) -> LocalRunner {
        let (done_tx, done_rx) = watch::channel(false);
        LocalRunner {
            resolved,
            results: Arc::new(TaskResults::new()),
            metadata: Arc::new(MetadataSet::new()),
            started: AtomicBool::new(false),
            done_tx: Arc::new(done_tx),
            done_rx,
            final_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts every task of the resolved set and returns immediately.
    ///
    /// Must be called from within a tokio runtime. A runner runs once;
    /// starting it again is an error.
    pub fn run(&self, options: RunOptions) -> Result<(), RunnerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RunnerError::AlreadyStarted);
        }

        let external = options.cancel;
        let cancel = external.child_token();
        for value in options.initial_values {
            (value.write)(&self.results);
        }
        let base_ctx = TaskContext::from_shared(Arc::new(RunShared {
            cancel: cancel.clone(),
            mode: options.mode,
            request: options.request,
            results: self.results.clone(),
            metadata: self.metadata.clone(),
            state: options.shared_state,
            values: options.values,
        }));
        // materialized up front so observers can poll it from the start
        let progress_set = self.metadata.get_or_init::<ProgressSet>();

        let count = self.resolved.len();
        let mut completions: Vec<Option<watch::Sender<bool>>> = Vec::with_capacity(count);
        let mut completed: Vec<watch::Receiver<bool>> = Vec::with_capacity(count);
        for _ in 0..count {
            let (tx, rx) = watch::channel(false);
            completions.push(Some(tx));
            completed.push(rx);
        }

        let mut workers = Vec::with_capacity(count);
        for (index, task) in self.resolved.tasks().iter().enumerate() {
            let task = task.clone();
            let producers: Vec<watch::Receiver<bool>> = self
                .resolved
                .producers(index)
                .iter()
                .map(|&p| completed[p].clone())
                .collect();
            let completion = completions[index].take().expect("one worker per task");
            let ctx = base_ctx.clone();
            let cancel = cancel.clone();
            let external = external.clone();
            let first_error = self.final_error.clone();
            let progress_set = progress_set.clone();
            let task_id = task.untyped_id().clone();
            let span = logging::task_span(&task_id);

            workers.push(tokio::spawn(
                async move {
                    for mut producer in producers {
                        loop {
                            if *producer.borrow_and_update() {
                                break;
                            }
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                changed = producer.changed() => {
                                    if changed.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    if cancel.is_cancelled() {
                        return;
                    }

                    let id_string = task_id.to_string();
                    let progress = task
                        .labels()
                        .progress_reportable()
                        .then(|| progress_set.slot(&id_string));
                    let task_ctx = ctx.for_task(task_id.clone(), progress.clone());
                    debug!(task.id = %task_id, "task started");
                    let outcome = AssertUnwindSafe(task.run_erased(task_ctx)).catch_unwind().await;
                    if progress.is_some() {
                        progress_set.resolve(&id_string);
                    }
                    match outcome {
                        Ok(Ok(())) => {
                            debug!(task.id = %task_id, "task completed");
                            let _ = completion.send(true);
                        }
                        Ok(Err(err)) => {
                            record_first_error(
                                &first_error,
                                &external,
                                TaskError::Failed {
                                    task_id: id_string,
                                    cause: Arc::new(err),
                                },
                            );
                            cancel.cancel();
                        }
                        Err(_panic) => {
                            record_first_error(
                                &first_error,
                                &external,
                                TaskError::Panicked { task_id: id_string },
                            );
                            cancel.cancel();
                        }
                    }
                }
                .instrument(span),
            ));
        }

        let done = self.done_tx.clone();
        let final_error = self.final_error.clone();
        tokio::spawn(async move {
            for worker in workers {
                let _ = worker.await;
            }
            {
                let mut slot = final_error.lock().unwrap();
                if slot.is_none() && cancel.is_cancelled() {
                    *slot = Some(TaskError::Cancelled);
                }
            }
            let _ = done.send(true);
        });

        Ok(())
    }

    /// Resolves when every task has produced or been cancelled.
    pub async fn wait(&self) {
        let mut done = self.done_rx.clone();
        loop {
            if *done.borrow_and_update() {
                return;
            }
            if done.changed().await.is_err() {
                return;
            }
        }
    }

    /// The final result map, or the first captured error.
    pub fn result(&self) -> Result<Arc<TaskResults>, RunnerError> {
        if !*self.done_rx.borrow() {
            if !self.started.load(Ordering::SeqCst) {
                return Err(RunnerError::NotStarted);
            }
            return Err(RunnerError::StillRunning);
        }
        if let Some(err) = self.final_error.lock().unwrap().clone() {
            return Err(RunnerError::Task(err));
        }
        Ok(self.results.clone())
    }

    /// The result map regardless of outcome; partial when the run failed.
    pub fn results(&self) -> Arc<TaskResults> {
        self.results.clone()
    }

    /// The first captured error, when the run has failed.
    pub fn error(&self) -> Option<TaskError> {
        self.final_error.lock().unwrap().clone()
    }

    /// Live metadata of the run, readable concurrently with execution.
    pub fn metadata(&self) -> Arc<MetadataSet> {
        self.metadata.clone()
    }
}

fn record_first_error(
    slot: &Mutex<Option<TaskError>>,
    external: &CancellationToken,
    err: TaskError,
) {
    // failures observed after an external cancel are a consequence of it
    if external.is_cancelled() {
        return;
    }
    let mut slot = slot.lock().unwrap();
    if slot.is_none() {
        *slot = Some(err);
    }
}
