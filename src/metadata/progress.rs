use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Serialize;

use super::Metadata;

/// The progress slot of one running task.
///
/// Tasks update their slot freely during execution; observers read a
/// consistent copy of the slot state at any time.
pub struct TaskProgress {
    task_id: String,
    state: Mutex<ProgressState>,
}

#[derive(Clone, Default)]
struct ProgressState {
    completion: f64,
    message: String,
}

impl TaskProgress {
    fn new(task_id: &str) -> TaskProgress {
        TaskProgress {
            task_id: task_id.to_string(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Sets the completion ratio (clamped to `0.0..=1.0`) and the message
    /// shown next to it.
    pub fn update(&self, completion: f64, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.completion = completion.clamp(0.0, 1.0);
        state.message = message.into();
    }

    pub fn update_message(&self, message: impl Into<String>) {
        self.state.lock().unwrap().message = message.into();
    }

    pub fn completion(&self) -> f64 {
        self.state.lock().unwrap().completion
    }

    pub fn message(&self) -> String {
        self.state.lock().unwrap().message.clone()
    }

    fn mark_resolved(&self) {
        self.state.lock().unwrap().completion = 1.0;
    }
}

#[derive(Serialize)]
struct ProgressSnapshot {
    #[serde(rename = "taskId")]
    task_id: String,
    completion: f64,
    message: String,
}

/// Per-task progress slots, keyed by implementation id.
///
/// The runner acquires a slot when a progress-reportable task starts and
/// resolves it on every exit path.
#[derive(Default)]
pub struct ProgressSet {
    slots: DashMap<String, Arc<TaskProgress>>,
}

impl ProgressSet {
    pub fn new() -> ProgressSet {
        ProgressSet::default()
    }

    /// Returns the slot for `task_id`, creating it on first use.
    pub fn slot(&self, task_id: &str) -> Arc<TaskProgress> {
        self.slots
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(TaskProgress::new(task_id)))
            .value()
            .clone()
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<TaskProgress>> {
        self.slots.get(task_id).map(|slot| slot.value().clone())
    }

    /// Marks the task's slot complete. Called by the runner when the task
    /// exits, whatever the outcome.
    pub fn resolve(&self, task_id: &str) {
        if let Some(slot) = self.slots.get(task_id) {
            slot.value().mark_resolved();
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Metadata for ProgressSet {
    fn kind(&self) -> &'static str {
        "progress"
    }

    fn to_serializable(&self) -> serde_json::Value {
        let mut snapshots: Vec<ProgressSnapshot> = self
            .slots
            .iter()
            .map(|entry| {
                let slot = entry.value();
                let state = slot.state.lock().unwrap().clone();
                ProgressSnapshot {
                    task_id: slot.task_id.clone(),
                    completion: state.completion,
                    message: state.message,
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        serde_json::to_value(snapshots).expect("progress snapshot serializes")
    }
}
