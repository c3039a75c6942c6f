use std::time::Duration;

use assert_matches::assert_matches;
use weft::form::TextFieldBuilder;
use weft::metadata::form::HintType;
use weft::{
    get_result, InspectionRequest, LocalRunner, RunMode, RunOptions, RunnerError, Task, TaskError,
    TaskRef, TaskSet,
};

fn duration_field() -> Task<Duration> {
    TextFieldBuilder::new("query-duration", 100, "Duration")
        .with_description("How far back to fetch logs")
        .with_default("1h", false)
        .with_validator(|_ctx, value| async move {
            match humantime::parse_duration(value.trim()) {
                Ok(duration) if duration > Duration::ZERO => Ok(None),
                _ => Ok(Some("duration must be positive".to_string())),
            }
        })
        .with_converter(|_ctx, value| async move {
            humantime::parse_duration(value.trim()).map_err(anyhow::Error::from)
        })
        .with_hint_fn(|_ctx, _value, converted| async move {
            Ok((format!("parsed as {:?}", converted), HintType::Info))
        })
        .build()
}

fn duration_runner() -> LocalRunner {
    let mut target = TaskSet::new();
    target.add(duration_field()).unwrap();
    LocalRunner::new(target.resolve(&TaskSet::new(), None).unwrap())
}

async fn dry_run(request: InspectionRequest) -> (LocalRunner, Duration) {
    let runner = duration_runner();
    runner
        .run(RunOptions::new(RunMode::DryRun).with_request(request))
        .unwrap();
    runner.wait().await;
    let reference: TaskRef<Duration> = TaskRef::new("query-duration");
    let value = get_result(&runner.result().unwrap(), &reference).unwrap();
    (runner, value)
}

#[tokio::test]
async fn valid_input_converts_and_hints_informationally() {
    let request = InspectionRequest::new().with_value("query-duration", "10m");
    let (runner, value) = dry_run(request).await;
    assert_eq!(value, Duration::from_secs(600));

    let snapshot = runner.metadata().snapshot();
    let field = &snapshot["form"][0];
    assert_eq!(field["id"], "query-duration");
    assert_eq!(field["type"], "text");
    assert_eq!(field["label"], "Duration");
    assert_eq!(field["default"], "1h");
    assert_eq!(field["hintType"], "info");
    assert_eq!(field["hint"], "parsed as 600s");
}

#[tokio::test]
async fn invalid_input_in_dry_run_returns_the_default_and_an_error_hint() {
    let request = InspectionRequest::new().with_value("query-duration", "-1h");
    let (runner, value) = dry_run(request).await;
    assert_eq!(value, Duration::from_secs(3600));

    let snapshot = runner.metadata().snapshot();
    let field = &snapshot["form"][0];
    assert_eq!(field["hintType"], "error");
    assert_eq!(field["hint"], "duration must be positive");
}

#[tokio::test]
async fn invalid_input_in_run_mode_fails_the_run() {
    let runner = duration_runner();
    runner
        .run(
            RunOptions::new(RunMode::Run)
                .with_request(InspectionRequest::new().with_value("query-duration", "-1h")),
        )
        .unwrap();
    runner.wait().await;

    assert_matches!(
        runner.result().unwrap_err(),
        RunnerError::Task(TaskError::Failed { task_id, cause })
            if task_id == "query-duration#default"
                && cause.to_string().contains("unresolved validation error")
    );
}

#[tokio::test]
async fn fields_of_one_dry_run_order_by_priority() {
    let mut target = TaskSet::new();
    target
        .add(
            TextFieldBuilder::new("project-id", 1000, "Project ID")
                .with_default("foo-project", false)
                .build(),
        )
        .unwrap();
    target
        .add(
            TextFieldBuilder::new("cluster-name", 500, "Cluster name")
                .with_default("primary", false)
                .build(),
        )
        .unwrap();

    let runner = LocalRunner::new(target.resolve(&TaskSet::new(), None).unwrap());
    runner.run(RunOptions::new(RunMode::DryRun)).unwrap();
    runner.wait().await;
    runner.result().unwrap();

    let snapshot = runner.metadata().snapshot();
    assert_eq!(snapshot["form"][0]["id"], "project-id");
    assert_eq!(snapshot["form"][1]["id"], "cluster-name");
}

#[tokio::test]
async fn metadata_snapshots_survive_a_serialization_round_trip() {
    let request = InspectionRequest::new().with_value("query-duration", "10m");
    let (runner, _) = dry_run(request).await;
    let snapshot = runner.metadata().snapshot();
    let text = serde_json::to_string(&snapshot).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, snapshot);
}
