// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job stream wrapper that survives server restarts.
//!
//! [`ReattachStream`] exposes the same surface as a raw job stream but
//! transparently recovers from transient server unavailability: it
//! waits for the runner's registration stream to re-establish, reopens
//! the job stream with a reattach request, replays the
//! assignment/acknowledge handshake, and retries the interrupted call.
//! The in-flight job is never lost; a reattach that comes back with a
//! different job id is a server bug and aborts the cycle instead.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::events;
use crate::transport::{CoreConnector, JobStream};
use stevedore_protocol::runner_proto::{
    RunnerJobStreamRequest, RunnerJobStreamResponse, runner_job_stream_response::Event,
};

/// Pause between transient failures of the reattach handshake itself.
/// The registration gate paces the first reconnect; this keeps a
/// flapping handshake from hot-looping.
const HANDSHAKE_RETRY_PAUSE: Duration = Duration::from_millis(250);

/// The live stream plus a generation counter. The counter lets a
/// caller that lost the race detect that another caller already
/// reconnected and simply retry against the new stream.
struct Slot {
    stream: Arc<dyn JobStream>,
    generation: u64,
}

/// A job stream that reattaches across server restarts.
pub struct ReattachStream {
    connector: Arc<dyn CoreConnector>,
    runner_id: String,
    /// Registration-stream generation; reattach waits for this to move
    /// past its pre-failure snapshot before touching the server.
    registration: watch::Receiver<u64>,
    cancel: CancellationToken,
    slot: Mutex<Slot>,
    /// Id of the in-flight job once an assignment has been observed.
    /// Until then there is nothing to reattach and transient errors
    /// propagate to the caller.
    job_id: StdMutex<Option<String>>,
}

impl ReattachStream {
    pub fn new(
        stream: Box<dyn JobStream>,
        connector: Arc<dyn CoreConnector>,
        runner_id: impl Into<String>,
        registration: watch::Receiver<u64>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            runner_id: runner_id.into(),
            registration,
            cancel,
            slot: Mutex::new(Slot {
                stream: Arc::from(stream),
                generation: 0,
            }),
            job_id: StdMutex::new(None),
        }
    }

    /// Arm reattachment for the given job. Called by the accept cycle
    /// as soon as the assignment arrives.
    pub fn arm(&self, job_id: impl Into<String>) {
        *self.job_id.lock().unwrap() = Some(job_id.into());
    }

    fn armed_job(&self) -> Option<String> {
        self.job_id.lock().unwrap().clone()
    }

    async fn current(&self) -> (Arc<dyn JobStream>, u64) {
        let slot = self.slot.lock().await;
        (slot.stream.clone(), slot.generation)
    }

    /// Run one stream operation, reattaching and retrying on transient
    /// failures.
    ///
    /// The registration generation is snapshotted *before* each
    /// attempt: if the failure raced with a re-registration, the gate
    /// is already satisfied and reattach proceeds immediately.
    async fn run_with_reattach<T, F, Fut>(&self, mut op: F) -> Result<T, StreamError>
    where
        F: FnMut(Arc<dyn JobStream>) -> Fut,
        Fut: Future<Output = Result<T, StreamError>>,
    {
        loop {
            let registration_snapshot = *self.registration.borrow();
            let (stream, generation) = self.current().await;

            match op(stream).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    let Some(job_id) = self.armed_job() else {
                        // No assignment yet, so nothing to resume; the
                        // caller re-requests on a fresh stream.
                        return Err(e);
                    };
                    warn!(error = %e, %job_id, "job stream failed, reattaching");
                    self.reconnect(&job_id, generation, registration_snapshot)
                        .await?;
                }
            }
        }
    }

    /// Replace the failed stream under the slot lock.
    async fn reconnect(
        &self,
        job_id: &str,
        seen_generation: u64,
        registration_snapshot: u64,
    ) -> Result<(), StreamError> {
        let mut slot = self.slot.lock().await;

        if slot.generation != seen_generation {
            // Another caller already reconnected; retry against the
            // stream it installed.
            debug!(generation = slot.generation, "reattach already performed");
            return Ok(());
        }

        // The job is only reattached after the runner has re-registered
        // itself. Wait for the registration generation to move past the
        // pre-failure snapshot.
        {
            let mut registration = self.registration.clone();
            tokio::select! {
                result = registration.wait_for(|g| *g > registration_snapshot) => {
                    result.map_err(|_| {
                        StreamError::Internal("registration channel closed".to_string())
                    })?;
                }
                _ = self.cancel.cancelled() => {
                    return Err(StreamError::Internal(
                        "cancelled while waiting for re-registration".to_string(),
                    ));
                }
            }
        }
        debug!(%job_id, "runner re-registered, reattaching job stream");

        // The handshake itself retries without bound on transient
        // errors; only cancellation or a non-transient error gives up.
        loop {
            if self.cancel.is_cancelled() {
                return Err(StreamError::Internal(
                    "cancelled during reattach handshake".to_string(),
                ));
            }

            match self.handshake(job_id).await {
                Ok(stream) => {
                    slot.stream = Arc::from(stream);
                    slot.generation += 1;
                    info!(%job_id, generation = slot.generation, "job stream reattached");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    debug!(error = %e, "reattach handshake failed, retrying");
                    tokio::time::sleep(HANDSHAKE_RETRY_PAUSE).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One attempt at the reattach handshake: open, request with the
    /// reattach id, verify the replayed assignment, acknowledge.
    async fn handshake(&self, job_id: &str) -> Result<Box<dyn JobStream>, StreamError> {
        let stream = self.connector.open_job_stream().await?;

        stream
            .send(events::build_request(&self.runner_id, Some(job_id)))
            .await?;

        let assignment = match stream.recv().await? {
            Some(RunnerJobStreamResponse {
                event: Some(Event::Assignment(assignment)),
            }) => assignment,
            Some(_) => {
                return Err(StreamError::Aborted(
                    "expected assignment during reattach".to_string(),
                ));
            }
            None => {
                // The server closed the fresh stream mid-handshake;
                // treat like any other flap and retry.
                return Err(StreamError::Unavailable(
                    "stream closed during reattach handshake".to_string(),
                ));
            }
        };

        let assigned = assignment.job.map(|j| j.id).unwrap_or_default();
        if assigned != job_id {
            // A different job here means the server's bookkeeping is
            // wrong; continuing would corrupt both jobs.
            return Err(StreamError::Aborted(format!(
                "reattach assigned job {:?}, expected {:?}",
                assigned, job_id
            )));
        }

        stream.send(events::build_ack()).await?;
        Ok(stream)
    }
}

#[async_trait]
impl JobStream for ReattachStream {
    async fn send(&self, req: RunnerJobStreamRequest) -> Result<(), StreamError> {
        self.run_with_reattach(move |stream| {
            let req = req.clone();
            async move { stream.send(req).await }
        })
        .await
    }

    async fn recv(&self) -> Result<Option<RunnerJobStreamResponse>, StreamError> {
        self.run_with_reattach(|stream| async move { stream.recv().await })
            .await
    }

    async fn close_send(&self) -> Result<(), StreamError> {
        self.run_with_reattach(|stream| async move { stream.close_send().await })
            .await
    }
}
