// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transport seam between the runner state machines and the wire.
//!
//! The accept cycle, reattach logic, and operation executor only see
//! these traits. The QUIC implementations live in [`quic`]; tests
//! drive the same machinery with in-memory implementations.

pub mod quic;

use async_trait::async_trait;

use crate::error::StreamError;
use stevedore_protocol::runner_proto::{
    OperationState, RunnerConfig, RunnerJobStreamRequest, RunnerJobStreamResponse,
};

/// One side of a job stream: the per-job bidirectional conversation
/// with stevedore-core.
///
/// `send` and `recv` lock independently so that terminal-output sends
/// never wait behind a blocked receive. `recv` returning `Ok(None)`
/// means the server finished its half cleanly - for a completed job
/// this is the confirmation that completion was durably recorded.
#[async_trait]
pub trait JobStream: Send + Sync {
    async fn send(&self, req: RunnerJobStreamRequest) -> Result<(), StreamError>;

    async fn recv(&self) -> Result<Option<RunnerJobStreamResponse>, StreamError>;

    /// Finish the sending half of the stream.
    async fn close_send(&self) -> Result<(), StreamError>;
}

/// Server-push half of the registration stream.
#[async_trait]
pub trait ConfigStream: Send {
    /// Receive the next configuration snapshot. `Ok(None)` means the
    /// server finished the stream cleanly.
    async fn recv(&mut self) -> Result<Option<RunnerConfig>, StreamError>;
}

/// Opens streams to stevedore-core.
#[async_trait]
pub trait CoreConnector: Send + Sync {
    /// Open a fresh job stream. Implementations redial a severed
    /// connection before opening, so callers can treat this as
    /// wait-for-ready.
    async fn open_job_stream(&self) -> Result<Box<dyn JobStream>, StreamError>;

    /// Open the long-lived config stream, registering `runner_id` with
    /// the server as part of the open.
    async fn open_config_stream(
        &self,
        runner_id: &str,
    ) -> Result<Box<dyn ConfigStream>, StreamError>;
}

/// Persists operation state records on the server.
#[async_trait]
pub trait StateClient: Send + Sync {
    /// Upsert an operation state record, returning the stored version
    /// (which may carry a server-assigned id).
    async fn upsert_operation(&self, state: OperationState)
        -> Result<OperationState, StreamError>;
}
