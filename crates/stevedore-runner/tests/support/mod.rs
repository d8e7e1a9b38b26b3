// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory fake of stevedore-core for integration tests.
//!
//! [`FakeCore`] implements the transport traits over channels and runs
//! one server-side task per opened job stream. Tests script failures
//! (a dropped server, a forged reattach assignment) and observe
//! everything the runner sent.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use stevedore_runner::transport::{ConfigStream, CoreConnector, JobStream, StateClient};
use stevedore_runner::{OperationError, StreamError};
use stevedore_runner::component::{
    App, Artifact, Deployment, Health, Project, PushedArtifact, Release, StatusReport,
};
use stevedore_runner::runner_proto::{
    Job, JobAssignment, OperationState, RunnerConfig, RunnerJobStreamRequest,
    RunnerJobStreamResponse, runner_job_stream_request, runner_job_stream_response,
};
use stevedore_runner::JobUi;

#[derive(Default)]
struct FailurePlan {
    /// Remaining `JobComplete` sends to fail with Unavailable. Each
    /// injected failure also restarts the core (severing config
    /// streams) so the runner must re-register before reattaching.
    fail_complete_sends: usize,
    /// Remaining `JobRequest` sends to fail with Unavailable. These
    /// happen before any assignment, so nothing is reattachable yet.
    fail_request_sends: usize,
    /// Job id to return on reattach instead of the real one.
    forge_reattach_job_id: Option<String>,
}

#[derive(Default)]
pub struct FakeCore {
    queue: Mutex<VecDeque<Job>>,
    /// Job currently held by a runner, replayed on reattach.
    active: Mutex<Option<Job>>,
    plan: Mutex<FailurePlan>,

    /// Every client message a server task received, in order.
    pub events: Mutex<Vec<RunnerJobStreamRequest>>,
    /// Every operation state upserted.
    pub upserts: Mutex<Vec<OperationState>>,
    /// Job ids handed out in assignments (fresh claims and reattaches).
    pub assigned: Mutex<Vec<String>>,
    /// Successful config stream opens, i.e. registrations.
    pub registrations: AtomicUsize,

    config_senders: Mutex<Vec<mpsc::Sender<RunnerConfig>>>,
}

impl FakeCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn queue_job(&self, job: Job) {
        self.queue.lock().await.push_back(job);
    }

    /// Fail the next `JobComplete` send with Unavailable and restart
    /// the core so reattach has to wait for re-registration.
    pub async fn fail_next_complete_send(&self) {
        self.plan.lock().await.fail_complete_sends = 1;
    }

    /// Fail the next `JobRequest` send with Unavailable.
    pub async fn fail_next_request_send(&self) {
        self.plan.lock().await.fail_request_sends = 1;
    }

    /// Answer the next reattach with an assignment for a different job.
    pub async fn forge_reattach(&self, job_id: &str) {
        self.plan.lock().await.forge_reattach_job_id = Some(job_id.to_string());
    }

    /// Sever all config streams, forcing runners to re-register.
    pub async fn restart(&self) {
        self.config_senders.lock().await.clear();
    }

    /// Push a config snapshot to every registered runner.
    pub async fn push_config(&self, config: RunnerConfig) {
        let senders = self.config_senders.lock().await;
        for sender in senders.iter() {
            let _ = sender.send(config.clone()).await;
        }
    }

    /// Count of complete events observed.
    pub async fn completions(&self) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|req| {
                matches!(
                    req.event,
                    Some(runner_job_stream_request::Event::Complete(_))
                )
            })
            .count()
    }

    /// Count of error events observed.
    pub async fn job_errors(&self) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|req| matches!(req.event, Some(runner_job_stream_request::Event::Error(_))))
            .count()
    }

    /// All terminal lines observed, flattened in order.
    pub async fn terminal_lines(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|req| match &req.event {
                Some(runner_job_stream_request::Event::Terminal(batch)) => Some(batch.lines.clone()),
                _ => None,
            })
            .flatten()
            .map(|line| line.raw)
            .collect()
    }

    async fn should_fail_send(&self, req: &RunnerJobStreamRequest) -> bool {
        let mut plan = self.plan.lock().await;
        match req.event {
            Some(runner_job_stream_request::Event::Complete(_))
                if plan.fail_complete_sends > 0 =>
            {
                plan.fail_complete_sends -= 1;
                drop(plan);
                // The failed send simulates a server restart: config
                // streams die with it.
                self.restart().await;
                true
            }
            Some(runner_job_stream_request::Event::Request(_))
                if plan.fail_request_sends > 0 =>
            {
                plan.fail_request_sends -= 1;
                true
            }
            _ => false,
        }
    }
}

enum ServerEvent {
    Message(RunnerJobStreamResponse),
    Eof,
}

struct ChannelJobStream {
    core: Arc<FakeCore>,
    to_server: Mutex<Option<mpsc::Sender<RunnerJobStreamRequest>>>,
    from_server: Mutex<mpsc::Receiver<ServerEvent>>,
    /// Set after an explicit EOF so later receives stay clean.
    saw_eof: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl JobStream for ChannelJobStream {
    async fn send(&self, req: RunnerJobStreamRequest) -> Result<(), StreamError> {
        if self.core.should_fail_send(&req).await {
            return Err(StreamError::Unavailable("injected send failure".to_string()));
        }
        let sender = self.to_server.lock().await.clone();
        match sender {
            Some(tx) => tx
                .send(req)
                .await
                .map_err(|_| StreamError::Unavailable("server task gone".to_string())),
            None => Err(StreamError::Unavailable("stream closed".to_string())),
        }
    }

    async fn recv(&self) -> Result<Option<RunnerJobStreamResponse>, StreamError> {
        let mut rx = self.from_server.lock().await;
        match rx.recv().await {
            Some(ServerEvent::Message(msg)) => Ok(Some(msg)),
            Some(ServerEvent::Eof) => {
                self.saw_eof.store(true, Ordering::SeqCst);
                Ok(None)
            }
            None => {
                if self.saw_eof.load(Ordering::SeqCst) {
                    Ok(None)
                } else {
                    Err(StreamError::Unavailable("connection lost".to_string()))
                }
            }
        }
    }

    async fn close_send(&self) -> Result<(), StreamError> {
        self.to_server.lock().await.take();
        Ok(())
    }
}

struct ChannelConfigStream {
    rx: mpsc::Receiver<RunnerConfig>,
}

#[async_trait]
impl ConfigStream for ChannelConfigStream {
    async fn recv(&mut self) -> Result<Option<RunnerConfig>, StreamError> {
        Ok(self.rx.recv().await)
    }
}

pub struct FakeConnector {
    pub core: Arc<FakeCore>,
}

#[async_trait]
impl CoreConnector for FakeConnector {
    async fn open_job_stream(&self) -> Result<Box<dyn JobStream>, StreamError> {
        let (to_server_tx, to_server_rx) = mpsc::channel(64);
        let (from_server_tx, from_server_rx) = mpsc::channel(64);

        tokio::spawn(serve_job_stream(
            self.core.clone(),
            to_server_rx,
            from_server_tx,
        ));

        Ok(Box::new(ChannelJobStream {
            core: self.core.clone(),
            to_server: Mutex::new(Some(to_server_tx)),
            from_server: Mutex::new(from_server_rx),
            saw_eof: std::sync::atomic::AtomicBool::new(false),
        }))
    }

    async fn open_config_stream(
        &self,
        _runner_id: &str,
    ) -> Result<Box<dyn ConfigStream>, StreamError> {
        let (tx, rx) = mpsc::channel(8);
        self.core.config_senders.lock().await.push(tx);
        self.core.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ChannelConfigStream { rx }))
    }
}

async fn serve_job_stream(
    core: Arc<FakeCore>,
    mut rx: mpsc::Receiver<RunnerJobStreamRequest>,
    tx: mpsc::Sender<ServerEvent>,
) {
    // Opening message: a job request, fresh or reattach.
    let Some(first) = rx.recv().await else { return };
    core.events.lock().await.push(first.clone());

    let request = match first.event {
        Some(runner_job_stream_request::Event::Request(req)) => req,
        _ => return,
    };

    let job = if request.reattach_job_id.is_some() {
        let forged = core.plan.lock().await.forge_reattach_job_id.take();
        match forged {
            Some(id) => Job {
                id,
                ..core.active.lock().await.clone().unwrap_or_default()
            },
            None => match core.active.lock().await.clone() {
                Some(job) => job,
                None => return,
            },
        }
    } else {
        loop {
            let next = core.queue.lock().await.pop_front();
            match next {
                Some(job) => break job,
                // No queued work; hold the stream open like the real
                // server would.
                None => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
            }
        }
    };

    core.assigned.lock().await.push(job.id.clone());
    *core.active.lock().await = Some(job.clone());

    let assignment = RunnerJobStreamResponse {
        event: Some(runner_job_stream_response::Event::Assignment(JobAssignment {
            job: Some(job),
        })),
    };
    if tx.send(ServerEvent::Message(assignment)).await.is_err() {
        return;
    }

    // Everything after the assignment: ack, terminal batches, then a
    // terminal complete/error event.
    while let Some(msg) = rx.recv().await {
        core.events.lock().await.push(msg.clone());
        match msg.event {
            Some(runner_job_stream_request::Event::Complete(_))
            | Some(runner_job_stream_request::Event::Error(_)) => {
                *core.active.lock().await = None;
                // Outcome recorded; confirm by finishing the stream.
                let _ = tx.send(ServerEvent::Eof).await;
                return;
            }
            _ => {}
        }
    }
}

#[async_trait]
impl StateClient for FakeCore {
    async fn upsert_operation(
        &self,
        state: OperationState,
    ) -> Result<OperationState, StreamError> {
        let mut upserts = self.upserts.lock().await;
        let mut stored = state;
        if stored.id.is_empty() {
            stored.id = format!("op-{}", upserts.len() + 1);
        }
        upserts.push(stored.clone());
        Ok(stored)
    }
}

/// Environment sink shared with the test so reconciliation results
/// are observable without touching the real process environment.
#[derive(Clone, Default)]
pub struct SharedEnvSink {
    pub vars: Arc<std::sync::Mutex<std::collections::HashMap<String, String>>>,
}

impl stevedore_runner::EnvironmentSink for SharedEnvSink {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.lock().unwrap().get(name).cloned()
    }

    fn set(&mut self, name: &str, value: &str) -> std::io::Result<()> {
        self.vars
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn unset(&mut self, name: &str) -> std::io::Result<()> {
        self.vars.lock().unwrap().remove(name);
        Ok(())
    }

    fn snapshot(&self) -> std::collections::HashMap<String, String> {
        self.vars.lock().unwrap().clone()
    }
}

/// Project resolving every application to one scripted app.
pub struct FakeProject {
    pub app: Arc<FakeApp>,
}

impl Project for FakeProject {
    fn app(&self, _name: &str) -> Result<Arc<dyn App>, OperationError> {
        Ok(self.app.clone())
    }
}

#[derive(Default)]
pub struct FakeApp {
    pub fail_deploy: bool,
}

#[async_trait]
impl App for FakeApp {
    fn application(&self) -> &str {
        "web"
    }

    async fn build(&self, _ui: &JobUi) -> Result<Artifact, OperationError> {
        Ok(Artifact {
            id: "img-1".to_string(),
            labels: Default::default(),
        })
    }

    async fn push(
        &self,
        _ui: &JobUi,
        artifact: Artifact,
    ) -> Result<PushedArtifact, OperationError> {
        Ok(PushedArtifact {
            location: format!("registry.local/{}", artifact.id),
            artifact,
        })
    }

    async fn deploy(
        &self,
        _ui: &JobUi,
        artifact: PushedArtifact,
    ) -> Result<Deployment, OperationError> {
        if self.fail_deploy {
            return Err(OperationError::Component("platform rejected deploy".to_string()));
        }
        Ok(Deployment {
            id: format!("dep-{}", artifact.artifact.id),
            url: None,
        })
    }

    async fn release(
        &self,
        _ui: &JobUi,
        deployment: Deployment,
        _prune: bool,
    ) -> Result<Release, OperationError> {
        Ok(Release {
            id: format!("rel-{}", deployment.id),
            url: None,
        })
    }

    async fn destroy(&self, _ui: &JobUi, _deployment: Deployment) -> Result<(), OperationError> {
        Ok(())
    }

    async fn status_report(
        &self,
        _ui: &JobUi,
        _deployment: Deployment,
    ) -> Result<StatusReport, OperationError> {
        Ok(StatusReport {
            health: Health::Ready,
            detail: "ok".to_string(),
        })
    }
}
