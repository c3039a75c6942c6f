use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

use fxhash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::debug;

use crate::task::{Task, TaskValue, UntypedTask};
use crate::taskid::UntypedTaskRef;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("task id `{0}` is already registered")]
    DuplicateTaskId(String),

    #[error("reference `{reference}` required by `{required_by}` has no candidate task")]
    UnresolvedReference { reference: String, required_by: String },

    #[error("reference `{reference}` is provided by multiple candidates: {candidates:?}")]
    AmbiguousReference {
        reference: String,
        candidates: Vec<String>,
    },

    #[error("dependency cycle between references: {references:?}")]
    Cycle { references: Vec<String> },

    #[error(
        "reference `{reference}` expects `{expected}` but implementation `{provider}` produces `{actual}`"
    )]
    TypeMismatch {
        reference: String,
        expected: &'static str,
        provider: String,
        actual: &'static str,
    },
}

/// An unordered collection of tasks, used both as a resolve target and as
/// the pool of selectable implementations.
///
/// Construction is order-independent for resolution semantics; insertion
/// order only breaks ordering ties, keeping resolved sequences
/// deterministic.
#[derive(Clone, Default)]
pub struct TaskSet {
    tasks: Vec<Arc<dyn UntypedTask>>,
    ids: FxHashSet<String>,
}

impl TaskSet {
    pub fn new() -> TaskSet {
        TaskSet::default()
    }

    pub fn add<T: TaskValue>(&mut self, task: Task<T>) -> Result<&mut Self, ResolveError> {
        self.add_untyped(Arc::new(task))?;
        Ok(self)
    }

    pub fn add_untyped(&mut self, task: Arc<dyn UntypedTask>) -> Result<(), ResolveError> {
        let id = task.untyped_id().to_string();
        if !self.ids.insert(id.clone()) {
            return Err(ResolveError::DuplicateTaskId(id));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn tasks(&self) -> &[Arc<dyn UntypedTask>] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Selects implementations for every reference reachable from this set
    /// and orders them into an executable sequence.
    ///
    /// Selection starts from this set (the target; all of its tasks are
    /// selected) and closes over dependencies against `pool`. A reference
    /// already provided by a selected task wins over pool candidates;
    /// otherwise exactly one eligible candidate must exist. When
    /// `inspection_type` is given, candidates labelled with inspection types
    /// are eligible only when their label includes it.
    pub fn resolve(
        &self,
        pool: &TaskSet,
        inspection_type: Option<&str>,
    ) -> Result<ResolvedTaskSet, ResolveError> {
        let mut selected: Vec<Arc<dyn UntypedTask>> = Vec::with_capacity(self.tasks.len());
        let mut provider_of: FxHashMap<String, usize> = FxHashMap::default();

        for task in &self.tasks {
            let reference_id = task.untyped_id().reference_id().to_string();
            if let Some(&existing) = provider_of.get(&reference_id) {
                return Err(ResolveError::AmbiguousReference {
                    reference: reference_id,
                    candidates: vec![
                        selected[existing].untyped_id().to_string(),
                        task.untyped_id().to_string(),
                    ],
                });
            }
            provider_of.insert(reference_id, selected.len());
            selected.push(task.clone());
        }

        // Close over dependencies until fixed point. Newly selected tasks are
        // appended and scanned in turn.
        let mut cursor = 0;
        while cursor < selected.len() {
            let task = selected[cursor].clone();
            for dep in task.dependencies() {
                if let Some(&provider) = provider_of.get(dep.id()) {
                    check_provider_type(dep, &selected[provider])?;
                    continue;
                }

                let candidates: Vec<Arc<dyn UntypedTask>> = pool
                    .tasks
                    .iter()
                    .filter(|candidate| candidate.untyped_id().reference_id() == dep.id())
                    .filter(|candidate| match inspection_type {
                        Some(ty) => candidate.labels().matches_inspection_type(ty),
                        None => true,
                    })
                    .cloned()
                    .collect();

                match candidates.len() {
                    0 => {
                        return Err(ResolveError::UnresolvedReference {
                            reference: dep.id().to_string(),
                            required_by: task.untyped_id().to_string(),
                        });
                    }
                    1 => {
                        let candidate = candidates.into_iter().next().unwrap();
                        check_provider_type(dep, &candidate)?;
                        debug!(
                            reference = dep.id(),
                            implementation = %candidate.untyped_id(),
                            "selected implementation"
                        );
                        provider_of.insert(dep.id().to_string(), selected.len());
                        selected.push(candidate);
                    }
                    _ => {
                        return Err(ResolveError::AmbiguousReference {
                            reference: dep.id().to_string(),
                            candidates: candidates
                                .iter()
                                .map(|c| c.untyped_id().to_string())
                                .collect(),
                        });
                    }
                }
            }
            cursor += 1;
        }

        order_selected(selected, &provider_of)
    }
}

impl fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.tasks.iter().map(|t| t.untyped_id().to_string()).collect();
        f.debug_struct("TaskSet").field("tasks", &ids).finish()
    }
}

fn check_provider_type(
    dep: &UntypedTaskRef,
    provider: &Arc<dyn UntypedTask>,
) -> Result<(), ResolveError> {
    let (actual, actual_name) = provider.result_type();
    if actual != dep.result_type() {
        return Err(ResolveError::TypeMismatch {
            reference: dep.id().to_string(),
            expected: dep.result_type_name(),
            provider: provider.untyped_id().to_string(),
            actual: actual_name,
        });
    }
    Ok(())
}

/// Kahn's algorithm over the selected tasks. Ties break towards the lowest
/// selection index, so identical inputs always order identically.
fn order_selected(
    selected: Vec<Arc<dyn UntypedTask>>,
    provider_of: &FxHashMap<String, usize>,
) -> Result<ResolvedTaskSet, ResolveError> {
    let count = selected.len();
    let producers: Vec<Vec<usize>> = selected
        .iter()
        .map(|task| {
            task.dependencies()
                .iter()
                .map(|dep| provider_of[dep.id()])
                .collect()
        })
        .collect();

    let mut indegree: Vec<usize> = producers.iter().map(Vec::len).collect();
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (consumer, deps) in producers.iter().enumerate() {
        for &producer in deps {
            consumers[producer].push(consumer);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order: Vec<usize> = Vec::with_capacity(count);
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for &consumer in &consumers[index] {
            indegree[consumer] -= 1;
            if indegree[consumer] == 0 {
                ready.push(Reverse(consumer));
            }
        }
    }

    if order.len() != count {
        let mut references: Vec<String> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d > 0)
            .map(|(i, _)| selected[i].untyped_id().reference_id().to_string())
            .collect();
        references.sort();
        return Err(ResolveError::Cycle { references });
    }

    let mut new_index = vec![0usize; count];
    for (position, &old) in order.iter().enumerate() {
        new_index[old] = position;
    }
    let mut tasks = Vec::with_capacity(count);
    let mut reordered_producers = Vec::with_capacity(count);
    for &old in &order {
        tasks.push(selected[old].clone());
        reordered_producers.push(producers[old].iter().map(|&p| new_index[p]).collect());
    }

    Ok(ResolvedTaskSet {
        tasks,
        producers: reordered_producers,
    })
}

/// A cycle-free, gap-free, totally ordered sequence of tasks, reusable
/// across runs. Every task's dependencies appear strictly earlier in the
/// sequence.
#[derive(Clone)]
pub struct ResolvedTaskSet {
    tasks: Vec<Arc<dyn UntypedTask>>,
    producers: Vec<Vec<usize>>,
}

impl ResolvedTaskSet {
    pub fn tasks(&self) -> &[Arc<dyn UntypedTask>] {
        &self.tasks
    }

    /// For the task at `index`, the indices of the tasks producing its
    /// dependencies. Always strictly less than `index`.
    pub(crate) fn producers(&self, index: usize) -> &[usize] {
        &self.producers[index]
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl fmt::Debug for ResolvedTaskSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.tasks.iter().map(|t| t.untyped_id().to_string()).collect();
        f.debug_struct("ResolvedTaskSet").field("order", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels;
    use crate::taskid::{TaskId, TaskRef};
    use assert_matches::assert_matches;

    fn provider(id: TaskId<String>, deps: Vec<UntypedTaskRef>) -> Task<String> {
        Task::new(id, deps, |_ctx| async { Ok(String::new()) })
    }

    fn resolved_ids(resolved: &ResolvedTaskSet) -> Vec<String> {
        resolved
            .tasks()
            .iter()
            .map(|t| t.untyped_id().to_string())
            .collect()
    }

    #[test]
    fn duplicate_task_ids_are_rejected() {
        let mut set = TaskSet::new();
        set.add(provider(TaskId::new("gen"), vec![])).unwrap();
        let err = set.add(provider(TaskId::new("gen"), vec![])).unwrap_err();
        assert_matches!(err, ResolveError::DuplicateTaskId(id) if id == "gen#default");
    }

    #[test]
    fn dependencies_order_before_their_dependants() {
        let a: TaskRef<String> = TaskRef::new("a");
        let b: TaskRef<String> = TaskRef::new("b");
        let c: TaskRef<String> = TaskRef::new("c");

        let mut target = TaskSet::new();
        target
            .add(provider(TaskId::new("d"), vec![b.untyped(), c.untyped()]))
            .unwrap();
        let mut pool = TaskSet::new();
        pool.add(provider(TaskId::new("b"), vec![a.untyped()])).unwrap();
        pool.add(provider(TaskId::new("c"), vec![a.untyped()])).unwrap();
        pool.add(provider(TaskId::new("a"), vec![])).unwrap();

        let resolved = target.resolve(&pool, None).unwrap();
        let ids = resolved_ids(&resolved);
        let position = |id: &str| ids.iter().position(|i| i == id).unwrap();
        assert_eq!(ids.len(), 4);
        assert!(position("a#default") < position("b#default"));
        assert!(position("a#default") < position("c#default"));
        assert!(position("b#default") < position("d#default"));
        assert!(position("c#default") < position("d#default"));

        for (index, task) in resolved.tasks().iter().enumerate() {
            for &producer in resolved.producers(index) {
                assert!(producer < index, "{} must precede its dependant", producer);
            }
            assert_eq!(resolved.producers(index).len(), task.dependencies().len());
        }
    }

    #[test]
    fn resolving_twice_yields_identical_sequences() {
        let a: TaskRef<String> = TaskRef::new("a");

        let mut target = TaskSet::new();
        target.add(provider(TaskId::new("z"), vec![a.untyped()])).unwrap();
        target.add(provider(TaskId::new("y"), vec![a.untyped()])).unwrap();
        target.add(provider(TaskId::new("x"), vec![a.untyped()])).unwrap();
        let mut pool = TaskSet::new();
        pool.add(provider(TaskId::new("a"), vec![])).unwrap();

        let first = resolved_ids(&target.resolve(&pool, None).unwrap());
        let second = resolved_ids(&target.resolve(&pool, None).unwrap());
        assert_eq!(first, second);
        // `a` must execute first; its dependants keep insertion order
        assert_eq!(first, vec!["a#default", "z#default", "y#default", "x#default"]);
    }

    #[test]
    fn a_single_candidate_is_selected_for_an_abstract_reference() {
        let log_input: TaskRef<String> = TaskRef::new("log-input");
        let parser = provider(TaskId::new("parser"), vec![log_input.untyped()]);

        let mut target = TaskSet::new();
        target.add(parser.clone()).unwrap();

        let mut cloud_pool = TaskSet::new();
        cloud_pool
            .add(provider(log_input.implementation("cloud-logging"), vec![]))
            .unwrap();
        let resolved = target.resolve(&cloud_pool, None).unwrap();
        assert!(resolved_ids(&resolved).contains(&"log-input#cloud-logging".to_string()));

        let mut file_pool = TaskSet::new();
        file_pool
            .add(provider(log_input.implementation("file"), vec![]))
            .unwrap();
        let resolved = target.resolve(&file_pool, None).unwrap();
        assert!(resolved_ids(&resolved).contains(&"log-input#file".to_string()));
    }

    #[test]
    fn competing_candidates_are_an_ambiguity_error() {
        let log_input: TaskRef<String> = TaskRef::new("log-input");
        let mut target = TaskSet::new();
        target
            .add(provider(TaskId::new("parser"), vec![log_input.untyped()]))
            .unwrap();
        let mut pool = TaskSet::new();
        pool.add(provider(log_input.implementation("cloud-logging"), vec![]))
            .unwrap();
        pool.add(provider(log_input.implementation("file"), vec![])).unwrap();

        let err = target.resolve(&pool, None).unwrap_err();
        assert_matches!(
            err,
            ResolveError::AmbiguousReference { reference, candidates }
                if reference == "log-input" && candidates.len() == 2
        );
    }

    #[test]
    fn a_target_selection_wins_over_pool_candidates() {
        let log_input: TaskRef<String> = TaskRef::new("log-input");
        let mut target = TaskSet::new();
        target
            .add(provider(TaskId::new("parser"), vec![log_input.untyped()]))
            .unwrap();
        target
            .add(provider(log_input.implementation("file"), vec![]))
            .unwrap();
        let mut pool = TaskSet::new();
        pool.add(provider(log_input.implementation("cloud-logging"), vec![]))
            .unwrap();

        let resolved = target.resolve(&pool, None).unwrap();
        let ids = resolved_ids(&resolved);
        assert!(ids.contains(&"log-input#file".to_string()));
        assert!(!ids.contains(&"log-input#cloud-logging".to_string()));
    }

    #[test]
    fn missing_references_are_an_unresolved_error() {
        let log_input: TaskRef<String> = TaskRef::new("log-input");
        let mut target = TaskSet::new();
        target
            .add(provider(TaskId::new("parser"), vec![log_input.untyped()]))
            .unwrap();

        let err = target.resolve(&TaskSet::new(), None).unwrap_err();
        assert_matches!(
            err,
            ResolveError::UnresolvedReference { reference, required_by }
                if reference == "log-input" && required_by == "parser#default"
        );
    }

    #[test]
    fn cycles_are_reported_with_their_references() {
        let x: TaskRef<String> = TaskRef::new("x");
        let y: TaskRef<String> = TaskRef::new("y");
        let mut target = TaskSet::new();
        target.add(provider(TaskId::new("x"), vec![y.untyped()])).unwrap();
        target.add(provider(TaskId::new("y"), vec![x.untyped()])).unwrap();

        let err = target.resolve(&TaskSet::new(), None).unwrap_err();
        assert_matches!(
            err,
            ResolveError::Cycle { references }
                if references == vec!["x".to_string(), "y".to_string()]
        );
    }

    #[test]
    fn providers_of_the_wrong_type_are_a_type_mismatch() {
        let count: TaskRef<u64> = TaskRef::new("count");
        let mut target = TaskSet::new();
        target
            .add(provider(TaskId::new("report"), vec![count.untyped()]))
            .unwrap();
        let mut pool = TaskSet::new();
        pool.add(provider(TaskId::new("count"), vec![])).unwrap();

        let err = target.resolve(&pool, None).unwrap_err();
        assert_matches!(
            err,
            ResolveError::TypeMismatch { reference, provider, .. }
                if reference == "count" && provider == "count#default"
        );
    }

    #[test]
    fn inspection_type_context_filters_candidates() {
        let log_input: TaskRef<String> = TaskRef::new("log-input");
        let mut target = TaskSet::new();
        target
            .add(provider(TaskId::new("parser"), vec![log_input.untyped()]))
            .unwrap();

        let gke = Task::with_labels(
            log_input.implementation("gke-audit"),
            vec![],
            vec![labels::inspection_types(["gke"])],
            |_ctx| async { Ok(String::new()) },
        );
        let composer = Task::with_labels(
            log_input.implementation("composer-audit"),
            vec![],
            vec![labels::inspection_types(["composer"])],
            |_ctx| async { Ok(String::new()) },
        );
        let mut pool = TaskSet::new();
        pool.add(gke).unwrap();
        pool.add(composer).unwrap();

        let resolved = target.resolve(&pool, Some("gke")).unwrap();
        assert!(resolved_ids(&resolved).contains(&"log-input#gke-audit".to_string()));

        // without a context both candidates are eligible
        let err = target.resolve(&pool, None).unwrap_err();
        assert_matches!(err, ResolveError::AmbiguousReference { .. });
    }
}
