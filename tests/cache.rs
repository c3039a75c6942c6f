use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use weft::{
    cached, get_result, LocalRunner, RunMode, RunOptions, RunnerError, Task, TaskError, TaskId,
    TaskRef, TaskResultCache, TaskSet,
};

fn runner_of(task: &Task<String>) -> LocalRunner {
    let mut target = TaskSet::new();
    target.add(task.clone()).unwrap();
    LocalRunner::new(target.resolve(&TaskSet::new(), None).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn a_hundred_concurrent_runners_share_one_execution() {
    const RUNNERS: usize = 100;

    let calls = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(TaskResultCache::new());
    let calls_in_task = calls.clone();
    let slow = Task::new(TaskId::<String>::new("slow"), vec![], move |_ctx| {
        let calls = calls_in_task.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("slow-value".to_string())
        }
    });
    let slow = cached(&slow, &cache);
    let slow_ref: TaskRef<String> = TaskRef::new("slow");

    let mut waiters = Vec::with_capacity(RUNNERS);
    for _ in 0..RUNNERS {
        let runner = Arc::new(runner_of(&slow));
        let slow_ref = slow_ref.clone();
        waiters.push(tokio::spawn(async move {
            runner.run(RunOptions::new(RunMode::Run)).unwrap();
            runner.wait().await;
            get_result(&runner.result().unwrap(), &slow_ref).unwrap()
        }));
    }

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), "slow-value");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1, "the body must run exactly once");
    assert_eq!(cache.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn every_waiter_of_a_failed_flight_receives_the_same_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(TaskResultCache::new());
    let calls_in_task = calls.clone();
    let doomed = Task::new(TaskId::<String>::new("doomed"), vec![], move |_ctx| {
        let calls = calls_in_task.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("credentials expired")
        }
    });
    let doomed = cached(&doomed, &cache);

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let runner = Arc::new(runner_of(&doomed));
        waiters.push(tokio::spawn(async move {
            runner.run(RunOptions::new(RunMode::Run)).unwrap();
            runner.wait().await;
            runner.result().map(|_| ()).unwrap_err()
        }));
    }

    for waiter in waiters {
        let err = waiter.await.unwrap();
        assert_matches!(
            err,
            RunnerError::Task(TaskError::Failed { task_id, cause })
                if task_id == "doomed#default" && cause.to_string().contains("credentials expired")
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1, "the failing body must run once");
    assert!(cache.is_empty(), "failed flights are evicted");
}

#[tokio::test]
async fn cache_entries_are_keyed_by_upstream_content() {
    let upstream: TaskRef<String> = TaskRef::new("upstream");
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(TaskResultCache::new());

    let calls_in_task = calls.clone();
    let upstream_dep = upstream.clone();
    let summarize = Task::new(
        TaskId::<String>::new("summarize"),
        vec![upstream.untyped()],
        move |ctx| {
            let calls = calls_in_task.clone();
            let upstream = upstream_dep.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!("summary of {}", ctx.dep(&upstream)?))
            }
        },
    );
    let summarize = cached(&summarize, &cache);
    let summary_ref: TaskRef<String> = TaskRef::new("summarize");

    let run_with = |input: &'static str| {
        let summarize = summarize.clone();
        let upstream = upstream.clone();
        let summary_ref = summary_ref.clone();
        async move {
            let mut target = TaskSet::new();
            target.add(summarize).unwrap();
            target
                .add(Task::new(upstream.implementation("fixture"), vec![], move |_ctx| {
                    async move { Ok(input.to_string()) }
                }))
                .unwrap();
            let runner = LocalRunner::new(target.resolve(&TaskSet::new(), None).unwrap());
            runner.run(RunOptions::new(RunMode::Run)).unwrap();
            runner.wait().await;
            get_result(&runner.result().unwrap(), &summary_ref).unwrap()
        }
    };

    assert_eq!(run_with("qux").await, "summary of qux");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(run_with("qux2").await, "summary of qux2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // the first run's entry is still warm
    assert_eq!(run_with("qux").await, "summary of qux");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 2);
}
