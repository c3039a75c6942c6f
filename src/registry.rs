use std::fmt;
use std::sync::{Arc, Mutex};

use fxhash::FxHashSet;

use crate::set::{ResolveError, TaskSet};
use crate::task::{Task, TaskValue, UntypedTask};

/// The process-wide collection of registered task implementations.
///
/// External code adds its tasks during initialization; runs snapshot the
/// registry into a [`TaskSet`] pool. Duplicate implementation ids are
/// rejected at registration time.
#[derive(Default)]
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    tasks: Vec<Arc<dyn UntypedTask>>,
    ids: FxHashSet<String>,
}

impl TaskRegistry {
    pub fn new() -> TaskRegistry {
        TaskRegistry::default()
    }

    pub fn add<T: TaskValue>(&self, task: Task<T>) -> Result<(), ResolveError> {
        self.add_untyped(Arc::new(task))
    }

    pub fn add_untyped(&self, task: Arc<dyn UntypedTask>) -> Result<(), ResolveError> {
        let mut inner = self.inner.lock().unwrap();
        let id = task.untyped_id().to_string();
        if !inner.ids.insert(id.clone()) {
            return Err(ResolveError::DuplicateTaskId(id));
        }
        inner.tasks.push(task);
        Ok(())
    }

    /// A snapshot of every registered task, in registration order.
    pub fn task_set(&self) -> TaskSet {
        let inner = self.inner.lock().unwrap();
        let mut set = TaskSet::new();
        for task in &inner.tasks {
            set.add_untyped(task.clone()).expect("registry ids are unique");
        }
        set
    }

    /// A snapshot of the tasks eligible under `inspection_type`, used by the
    /// application layer to build per-inspection pools.
    pub fn task_set_for(&self, inspection_type: &str) -> TaskSet {
        let inner = self.inner.lock().unwrap();
        let mut set = TaskSet::new();
        for task in &inner.tasks {
            if task.labels().matches_inspection_type(inspection_type) {
                set.add_untyped(task.clone()).expect("registry ids are unique");
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().tasks.is_empty()
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry").field("len", &self.len()).finish()
    }
}
