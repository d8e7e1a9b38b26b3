// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The runner: claims jobs from stevedore-core and executes them.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::component::Project;
use crate::config::RunnerSettings;
use crate::config_watcher::{ConfigWatcher, EnvironmentSink, ProcessEnv};
use crate::error::{OperationError, Result, StreamError};
use crate::events;
use crate::operation::{self, ExecutorContext, Operation};
use crate::operations::{
    BuildOperation, DeployOperation, DestroyOperation, PushOperation, ReleaseOperation,
    StatusReportOperation,
};
use crate::reattach::ReattachStream;
use crate::registration::Registration;
use crate::transport::{CoreConnector, JobStream, StateClient};
use crate::ui::JobUi;
use stevedore_protocol::runner_proto::{
    Job, PollSettings, RunnerJobStreamResponse, job, runner_job_stream_response::Event,
};

/// A runner instance.
///
/// Construction spawns the registration task (which owns the config
/// stream and feeds the config watcher); [`Runner::accept`] then
/// drives one job each call. `accept` may be called concurrently to
/// execute multiple jobs in parallel; each call owns an independent
/// job stream.
pub struct Runner {
    settings: RunnerSettings,
    connector: Arc<dyn CoreConnector>,
    state: Arc<dyn StateClient>,
    project: Arc<dyn Project>,
    registration: Registration,
    poll: watch::Receiver<PollSettings>,
    cancel: CancellationToken,
    watcher_task: Mutex<Option<JoinHandle<()>>>,
}

impl Runner {
    /// Create a runner applying pushed configuration to the process
    /// environment.
    pub fn new(
        settings: RunnerSettings,
        connector: Arc<dyn CoreConnector>,
        state: Arc<dyn StateClient>,
        project: Arc<dyn Project>,
    ) -> Self {
        Self::with_environment(settings, connector, state, project, ProcessEnv)
    }

    /// Create a runner with a custom environment sink (used by tests
    /// and embedders that sandbox configuration).
    pub fn with_environment<S: EnvironmentSink + 'static>(
        settings: RunnerSettings,
        connector: Arc<dyn CoreConnector>,
        state: Arc<dyn StateClient>,
        project: Arc<dyn Project>,
        sink: S,
    ) -> Self {
        let cancel = CancellationToken::new();

        let (registration, configs) = Registration::spawn(
            connector.clone(),
            settings.runner_id.clone(),
            std::time::Duration::from_millis(settings.register_backoff_ms),
            cancel.child_token(),
        );

        let (watcher, poll) = ConfigWatcher::new(sink);
        let watcher_task = tokio::spawn(watcher.watch(configs));

        Self {
            settings,
            connector,
            state,
            project,
            registration,
            poll,
            cancel,
            watcher_task: Mutex::new(Some(watcher_task)),
        }
    }

    /// The runner's identifier.
    pub fn id(&self) -> &str {
        &self.settings.runner_id
    }

    /// Latest poll settings pushed by the server.
    pub fn poll_settings(&self) -> PollSettings {
        self.poll.borrow().clone()
    }

    /// Claim, execute, and report exactly one job.
    ///
    /// Blocks until a job is assigned and fully processed. Job
    /// execution failures are reported to the server through the
    /// stream and still return `Ok`; only stream-level failures return
    /// an error. Completion is confirmed by the server finishing the
    /// stream, so a successful return means the outcome was durably
    /// recorded.
    #[instrument(skip(self), fields(runner_id = %self.settings.runner_id))]
    pub async fn accept(&self) -> Result<()> {
        let raw = self.connector.open_job_stream().await?;
        let stream = Arc::new(ReattachStream::new(
            raw,
            self.connector.clone(),
            self.settings.runner_id.clone(),
            self.registration.generation(),
            self.cancel.child_token(),
        ));

        stream
            .send(events::build_request(&self.settings.runner_id, None))
            .await?;

        let assignment = match stream.recv().await? {
            Some(RunnerJobStreamResponse {
                event: Some(Event::Assignment(assignment)),
            }) => assignment,
            Some(_) => {
                return Err(StreamError::Aborted("expected assignment".to_string()).into());
            }
            None => {
                return Err(
                    StreamError::Aborted("stream closed before assignment".to_string()).into(),
                );
            }
        };
        let job = assignment
            .job
            .ok_or_else(|| StreamError::Aborted("assignment missing job".to_string()))?;

        // From here a disconnect resumes this job rather than claiming
        // a new one.
        stream.arm(job.id.clone());
        stream.send(events::build_ack()).await?;
        info!(job_id = %job.id, application = %job.application, "job assigned");

        let job_stream: Arc<dyn JobStream> = stream.clone();
        let ui = JobUi::new(job_stream);
        let result = self.execute_job(&job, &ui).await;
        ui.close().await;

        match &result {
            Ok(()) => {
                stream.send(events::build_complete()).await?;
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "job execution failed");
                stream.send(events::build_error(e)).await?;
            }
        }

        // Completion is confirmed, not fire-and-forget: the server
        // finishes the stream once the outcome is durably recorded.
        match stream.recv().await? {
            None => {}
            Some(_) => {
                return Err(StreamError::Aborted(
                    "unexpected message after job completion".to_string(),
                )
                .into());
            }
        }
        let _ = stream.close_send().await;

        info!(job_id = %job.id, ok = result.is_ok(), "job reported");
        Ok(())
    }

    async fn execute_job(&self, job: &Job, ui: &JobUi) -> std::result::Result<(), OperationError> {
        let operation = job
            .operation
            .as_ref()
            .ok_or_else(|| OperationError::InvalidPayload("job missing operation".to_string()))?;

        match operation {
            job::Operation::Noop(_) => {
                let _ = ui.output("runner verification complete").await;
                Ok(())
            }
            job::Operation::Poll(poll) => {
                // Deciding what work a poll triggers is server-side
                // scheduling; the runner just acknowledges it.
                let _ = ui
                    .output(format!("poll acknowledged for {}", poll.application))
                    .await;
                Ok(())
            }
            job::Operation::Build(op) => {
                self.run_operation(&mut BuildOperation::new(op), job, ui).await
            }
            job::Operation::Push(op) => {
                self.run_operation(&mut PushOperation::new(op), job, ui).await
            }
            job::Operation::Deploy(op) => {
                self.run_operation(&mut DeployOperation::new(op), job, ui).await
            }
            job::Operation::Release(op) => {
                self.run_operation(&mut ReleaseOperation::new(op), job, ui)
                    .await
            }
            job::Operation::Destroy(op) => {
                self.run_operation(&mut DestroyOperation::new(op), job, ui)
                    .await
            }
            job::Operation::StatusReport(op) => {
                self.run_operation(&mut StatusReportOperation::new(op), job, ui)
                    .await
            }
        }
    }

    async fn run_operation<O: Operation>(
        &self,
        op: &mut O,
        job: &Job,
        ui: &JobUi,
    ) -> std::result::Result<(), OperationError> {
        let app = self.project.app(&job.application)?;
        let cx = ExecutorContext {
            client: self.state.as_ref(),
            app: app.as_ref(),
            ui,
            job,
        };
        operation::execute(op, &cx).await.map(|_| ())
    }

    /// Stop background tasks and wait for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.registration.join().await;
        if let Some(task) = self.watcher_task.lock().await.take() {
            let _ = task.await;
        }
        info!(runner_id = %self.settings.runner_id, "runner shut down");
    }
}
