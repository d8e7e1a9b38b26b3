// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC-backed transport implementations over [`RunnerClient`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use stevedore_protocol::frame::{self, Frame, FrameError, MessageType};
use stevedore_protocol::runner_proto::{
    OperationState, RegisterRunnerRequest, RunnerConfig, RunnerJobStreamRequest,
    RunnerJobStreamResponse, StatusDetail, UpsertOperationRequest, UpsertOperationResponse,
};
use stevedore_protocol::{RunnerClient, RunnerClientConfig};

use super::{ConfigStream, CoreConnector, JobStream, StateClient};
use crate::config::RunnerSettings;
use crate::error::{Result, StreamError};

fn transport_err(err: FrameError) -> StreamError {
    match err {
        // A payload that fails to decode is corruption, not a flap.
        FrameError::Decode(e) => StreamError::Decode(e),
        other => StreamError::Unavailable(other.to_string()),
    }
}

/// QUIC connector: opens job and config streams on a shared
/// [`RunnerClient`] connection.
pub struct QuicCoreConnector {
    client: Arc<RunnerClient>,
}

impl QuicCoreConnector {
    /// Create a connector from runner settings.
    pub fn new(settings: &RunnerSettings) -> Result<Self> {
        let config = RunnerClientConfig {
            server_addr: settings.server_addr,
            server_name: settings.server_name.clone(),
            dangerous_skip_cert_verification: settings.skip_cert_verification,
            connect_timeout_ms: settings.connect_timeout_ms,
            ..Default::default()
        };
        let client = RunnerClient::new(config)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Share the underlying client (e.g. with a [`QuicStateClient`]).
    pub fn client(&self) -> Arc<RunnerClient> {
        self.client.clone()
    }
}

#[async_trait]
impl CoreConnector for QuicCoreConnector {
    async fn open_job_stream(&self) -> std::result::Result<Box<dyn JobStream>, StreamError> {
        let (send, recv) = self.client.open_raw_stream().await?;
        debug!("job stream opened");
        Ok(Box::new(QuicJobStream {
            send: Mutex::new(send),
            recv: Mutex::new(recv),
            opened: AtomicBool::new(false),
        }))
    }

    async fn open_config_stream(
        &self,
        runner_id: &str,
    ) -> std::result::Result<Box<dyn ConfigStream>, StreamError> {
        let (mut send, recv) = self.client.open_raw_stream().await?;

        let register = RegisterRunnerRequest {
            runner_id: runner_id.to_string(),
        };
        let open = Frame::request(&register).map_err(transport_err)?;
        frame::write_frame(&mut send, &open)
            .await
            .map_err(transport_err)?;
        debug!(%runner_id, "config stream opened");

        Ok(Box::new(QuicConfigStream {
            recv,
            _send: send,
        }))
    }
}

/// A job stream over one QUIC bidirectional stream.
///
/// The first client message travels as a `Request` frame (it opens the
/// conversation); everything after is an `Event` frame.
struct QuicJobStream {
    send: Mutex<quinn::SendStream>,
    recv: Mutex<quinn::RecvStream>,
    opened: AtomicBool,
}

#[async_trait]
impl JobStream for QuicJobStream {
    async fn send(&self, req: RunnerJobStreamRequest) -> std::result::Result<(), StreamError> {
        let frame = if self.opened.swap(true, Ordering::AcqRel) {
            Frame::event(&req)
        } else {
            Frame::request(&req)
        }
        .map_err(transport_err)?;

        let mut send = self.send.lock().await;
        frame::write_frame(&mut *send, &frame)
            .await
            .map_err(transport_err)
    }

    async fn recv(&self) -> std::result::Result<Option<RunnerJobStreamResponse>, StreamError> {
        let mut recv = self.recv.lock().await;
        match frame::read_frame(&mut *recv).await {
            Ok(frame) => match frame.message_type {
                MessageType::Event => {
                    let resp: RunnerJobStreamResponse = frame.decode().map_err(transport_err)?;
                    Ok(Some(resp))
                }
                MessageType::Error => {
                    let detail: StatusDetail = frame.decode().map_err(transport_err)?;
                    Err(StreamError::from_status(&detail.code, &detail.message))
                }
                other => Err(StreamError::Aborted(format!(
                    "unexpected {:?} frame on job stream",
                    other
                ))),
            },
            Err(FrameError::StreamClosed) => Ok(None),
            Err(e) => Err(transport_err(e)),
        }
    }

    async fn close_send(&self) -> std::result::Result<(), StreamError> {
        let mut send = self.send.lock().await;
        send.finish()
            .map_err(|e| StreamError::Unavailable(e.to_string()))
    }
}

/// Server-push half of the registration stream.
struct QuicConfigStream {
    recv: quinn::RecvStream,
    // Held so the client half stays open for the stream's lifetime.
    _send: quinn::SendStream,
}

#[async_trait]
impl ConfigStream for QuicConfigStream {
    async fn recv(&mut self) -> std::result::Result<Option<RunnerConfig>, StreamError> {
        match frame::read_frame(&mut self.recv).await {
            Ok(frame) => match frame.message_type {
                MessageType::Event => Ok(Some(frame.decode().map_err(transport_err)?)),
                MessageType::Error => {
                    let detail: StatusDetail = frame.decode().map_err(transport_err)?;
                    Err(StreamError::from_status(&detail.code, &detail.message))
                }
                other => Err(StreamError::Aborted(format!(
                    "unexpected {:?} frame on config stream",
                    other
                ))),
            },
            Err(FrameError::StreamClosed) => Ok(None),
            Err(e) => Err(transport_err(e)),
        }
    }
}

/// Operation state persistence over unary requests.
pub struct QuicStateClient {
    client: Arc<RunnerClient>,
}

impl QuicStateClient {
    pub fn new(client: Arc<RunnerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StateClient for QuicStateClient {
    async fn upsert_operation(
        &self,
        state: OperationState,
    ) -> std::result::Result<OperationState, StreamError> {
        let request = UpsertOperationRequest { state: Some(state) };
        let response: UpsertOperationResponse = self.client.request(&request).await?;
        response
            .state
            .ok_or_else(|| StreamError::Internal("upsert response missing state".to_string()))
    }
}
