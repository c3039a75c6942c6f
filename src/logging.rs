//! The logging adapter: tagging records with the running task's identity.
//!
//! The runner instruments every task worker with [`task_span`], so `tracing`
//! records emitted inside a task carry its implementation id. Records
//! emitted outside any task pass through undecorated.

use tracing::Span;

use crate::taskid::UntypedTaskId;

/// The span entered for the whole execution of one task.
pub fn task_span(task_id: &UntypedTaskId) -> Span {
    tracing::info_span!("task", task.id = %task_id)
}
