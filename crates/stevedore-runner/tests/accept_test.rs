// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the job accept cycle.
//!
//! These drive a [`stevedore_runner::Runner`] against the in-memory
//! fake core: claim, execute, report, and the reattach path when the
//! server disappears mid-report.

mod support;

use std::sync::Arc;
use std::time::Duration;

use support::{FakeApp, FakeConnector, FakeCore, FakeProject, SharedEnvSink};

use stevedore_runner::component::{Artifact, PushedArtifact};
use stevedore_runner::runner_proto::{
    ConfigVar, DeployOp, Job, NoopOp, OpaqueValue, OperationStatus, RunnerConfig, config_var, job,
};
use stevedore_runner::{Runner, RunnerError, RunnerSettings, StreamError};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn settings() -> RunnerSettings {
    RunnerSettings::localhost("runner-test").with_register_backoff_ms(10)
}

fn runner_with(core: &Arc<FakeCore>, app: FakeApp, sink: SharedEnvSink) -> Runner {
    Runner::with_environment(
        settings(),
        Arc::new(FakeConnector { core: core.clone() }),
        core.clone(),
        Arc::new(FakeProject { app: Arc::new(app) }),
        sink,
    )
}

fn noop_job(id: &str) -> Job {
    Job {
        id: id.to_string(),
        application: "web".to_string(),
        workspace: "default".to_string(),
        singleton_id: String::new(),
        operation: Some(job::Operation::Noop(NoopOp {})),
    }
}

fn deploy_job(id: &str) -> Job {
    let pushed = PushedArtifact {
        artifact: Artifact {
            id: "img-1".to_string(),
            labels: Default::default(),
        },
        location: "registry.local/img-1".to_string(),
    };
    Job {
        id: id.to_string(),
        application: "web".to_string(),
        workspace: "default".to_string(),
        singleton_id: String::new(),
        operation: Some(job::Operation::Deploy(DeployOp {
            artifact: Some(OpaqueValue {
                kind: "push".to_string(),
                data: serde_json::to_vec(&pushed).unwrap(),
            }),
        })),
    }
}

async fn accept(runner: &Runner) -> Result<(), RunnerError> {
    tokio::time::timeout(TEST_TIMEOUT, runner.accept())
        .await
        .expect("accept timed out")
}

#[tokio::test]
async fn test_noop_job_completes_without_upserts() {
    let core = FakeCore::new();
    core.queue_job(noop_job("job-1")).await;
    let runner = runner_with(&core, FakeApp::default(), SharedEnvSink::default());

    accept(&runner).await.unwrap();

    assert_eq!(core.completions().await, 1);
    assert_eq!(core.job_errors().await, 0);
    // Noop jobs carry no operation state.
    assert!(core.upserts.lock().await.is_empty());

    runner.shutdown().await;
}

#[tokio::test]
async fn test_deploy_job_success_persists_two_states() {
    let core = FakeCore::new();
    core.queue_job(deploy_job("job-2")).await;
    let runner = runner_with(&core, FakeApp::default(), SharedEnvSink::default());

    accept(&runner).await.unwrap();

    assert_eq!(core.completions().await, 1);

    let upserts = core.upserts.lock().await;
    assert_eq!(upserts.len(), 2);
    assert_eq!(upserts[0].status, OperationStatus::Running as i32);
    assert_eq!(upserts[1].status, OperationStatus::Success as i32);
    assert_eq!(upserts[1].job_id, "job-2");
    let value = upserts[1].value.as_ref().unwrap();
    assert_eq!(value.kind, "deploy");
    drop(upserts);

    runner.shutdown().await;
}

#[tokio::test]
async fn test_failed_deploy_reports_error_but_accept_succeeds() {
    let core = FakeCore::new();
    core.queue_job(deploy_job("job-3")).await;
    let runner = runner_with(
        &core,
        FakeApp {
            fail_deploy: true,
        },
        SharedEnvSink::default(),
    );

    // Execution failures are reported through the stream, not returned.
    accept(&runner).await.unwrap();

    assert_eq!(core.completions().await, 0);
    assert_eq!(core.job_errors().await, 1);

    let upserts = core.upserts.lock().await;
    assert_eq!(upserts.len(), 2);
    assert_eq!(upserts[1].status, OperationStatus::Error as i32);
    assert!(upserts[1].value.is_none());
    let error = upserts[1].error.as_ref().unwrap();
    assert!(error.message.contains("platform rejected deploy"));
    drop(upserts);

    runner.shutdown().await;
}

#[tokio::test]
async fn test_terminal_output_reaches_the_server() {
    let core = FakeCore::new();
    core.queue_job(deploy_job("job-4")).await;
    let runner = runner_with(&core, FakeApp::default(), SharedEnvSink::default());

    accept(&runner).await.unwrap();

    let lines = core.terminal_lines().await;
    assert!(
        lines.iter().any(|l| l.contains("deploying img-1")),
        "expected deploy progress line, got {:?}",
        lines
    );

    runner.shutdown().await;
}

#[tokio::test]
async fn test_unavailable_on_complete_send_reattaches_and_completes_once() {
    let core = FakeCore::new();
    core.queue_job(noop_job("job-5")).await;
    core.fail_next_complete_send().await;
    let runner = runner_with(&core, FakeApp::default(), SharedEnvSink::default());

    accept(&runner).await.unwrap();

    // The resumed assignment is for the same job, and completion is
    // reported exactly once end-to-end.
    assert_eq!(*core.assigned.lock().await, vec!["job-5", "job-5"]);
    assert_eq!(core.completions().await, 1);
    // Reattach happened only after the runner re-registered.
    assert!(core.registrations.load(std::sync::atomic::Ordering::SeqCst) >= 2);

    runner.shutdown().await;
}

#[tokio::test]
async fn test_request_send_unavailable_before_assignment_propagates() {
    let core = FakeCore::new();
    core.queue_job(noop_job("job-6")).await;
    core.fail_next_request_send().await;
    let runner = runner_with(&core, FakeApp::default(), SharedEnvSink::default());

    // No job was assigned yet, so there is nothing to reattach; the
    // stream-level failure surfaces to the caller.
    let err = accept(&runner).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::Stream(StreamError::Unavailable(_))
    ));

    // The job is still queued for the next accept.
    accept(&runner).await.unwrap();
    assert_eq!(core.completions().await, 1);

    runner.shutdown().await;
}

#[tokio::test]
async fn test_pushed_config_is_applied_to_the_environment() {
    let core = FakeCore::new();
    let sink = SharedEnvSink::default();
    let runner = runner_with(&core, FakeApp::default(), sink.clone());

    // Wait for registration so a config stream exists to push on.
    tokio::time::timeout(TEST_TIMEOUT, async {
        while core.registrations.load(std::sync::atomic::Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("runner never registered");

    core.push_config(RunnerConfig {
        config_vars: vec![ConfigVar {
            name: "DATABASE_URL".to_string(),
            value: Some(config_var::Value::StaticValue(
                "postgres://db.internal".to_string(),
            )),
        }],
        poll: None,
    })
    .await;

    tokio::time::timeout(TEST_TIMEOUT, async {
        loop {
            if sink.vars.lock().unwrap().get("DATABASE_URL").map(String::as_str)
                == Some("postgres://db.internal")
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("config never applied");

    runner.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_accepts_each_complete_one_job() {
    let core = FakeCore::new();
    core.queue_job(noop_job("job-a")).await;
    core.queue_job(noop_job("job-b")).await;
    let runner = Arc::new(runner_with(
        &core,
        FakeApp::default(),
        SharedEnvSink::default(),
    ));

    let r1 = runner.clone();
    let r2 = runner.clone();
    let (a, b) = tokio::join!(
        tokio::time::timeout(TEST_TIMEOUT, r1.accept()),
        tokio::time::timeout(TEST_TIMEOUT, r2.accept()),
    );
    a.expect("accept timed out").unwrap();
    b.expect("accept timed out").unwrap();

    assert_eq!(core.completions().await, 2);
    let mut assigned = core.assigned.lock().await.clone();
    assigned.sort();
    assert_eq!(assigned, vec!["job-a", "job-b"]);
}
