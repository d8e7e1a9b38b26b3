// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic operation lifecycle.
//!
//! Every operation kind (build, push, deploy, release, destroy,
//! status report) runs through the same server-visible lifecycle:
//! initial state, RUNNING persisted before work starts, the work
//! itself, then the terminal state persisted regardless of outcome.
//! The server therefore never shows a job stuck RUNNING because the
//! local work crashed.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::component::App;
use crate::error::OperationError;
use crate::transport::StateClient;
use crate::ui::JobUi;
use stevedore_protocol::runner_proto::{
    Job, OpaqueValue, OperationState, OperationStatus, StatusDetail,
};

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Initial state record for a job, status unset.
pub(crate) fn initial_state(job: &Job) -> OperationState {
    OperationState {
        id: String::new(),
        job_id: job.id.clone(),
        application: job.application.clone(),
        workspace: job.workspace.clone(),
        status: OperationStatus::Unspecified as i32,
        value: None,
        error: None,
        started_at_ms: 0,
        completed_at_ms: 0,
    }
}

/// One executable operation kind.
///
/// Implementations are constructed per job with their job-specific
/// inputs as fields; the executor drives the lifecycle so no
/// implementation repeats the bookkeeping.
#[async_trait]
pub trait Operation: Send {
    /// Result of [`Operation::run`], marshalled into the state value
    /// on success.
    type Output: Serialize + Send + Sync;

    /// Operation kind label, used in logs and as the value kind tag.
    fn label(&self) -> &'static str;

    /// Produce the initial state record for this operation.
    fn init(&self, job: &Job) -> Result<OperationState, OperationError>;

    /// Persist the state record, returning the stored version (which
    /// may carry a server-assigned id).
    async fn upsert(
        &mut self,
        client: &dyn StateClient,
        state: OperationState,
    ) -> Result<OperationState, OperationError> {
        Ok(client.upsert_operation(state).await?)
    }

    /// Perform the local work.
    async fn run(&mut self, app: &dyn App, ui: &JobUi) -> Result<Self::Output, OperationError>;
}

/// Everything an operation needs from its surrounding job.
pub struct ExecutorContext<'a> {
    pub client: &'a dyn StateClient,
    pub app: &'a dyn App,
    pub ui: &'a JobUi,
    pub job: &'a Job,
}

/// Run one operation through its full lifecycle.
///
/// Exactly two upserts happen when `init` succeeds (RUNNING, then the
/// terminal state), zero when it fails. The terminal upsert is
/// unconditional; its own failure is logged and never masks the run
/// result. A result that cannot be marshalled becomes the operation's
/// error.
pub async fn execute<O: Operation>(
    op: &mut O,
    cx: &ExecutorContext<'_>,
) -> Result<O::Output, OperationError> {
    let mut state = op.init(cx.job)?;
    state.status = OperationStatus::Running as i32;
    state.started_at_ms = now_ms();

    let mut state = op.upsert(cx.client, state).await?;
    if !state.id.is_empty() {
        debug!(operation_id = %state.id, label = op.label(), "operation state created");
    }

    let result = match op.run(cx.app, cx.ui).await {
        Ok(output) => match serde_json::to_vec(&output) {
            Ok(data) => {
                state.value = Some(OpaqueValue {
                    kind: op.label().to_string(),
                    data,
                });
                state.error = None;
                state.status = OperationStatus::Success as i32;
                Ok(output)
            }
            Err(e) => {
                let err = OperationError::from(e);
                state.value = None;
                state.error = Some(error_detail(&err));
                state.status = OperationStatus::Error as i32;
                Err(err)
            }
        },
        Err(err) => {
            state.value = None;
            state.error = Some(error_detail(&err));
            state.status = OperationStatus::Error as i32;
            Err(err)
        }
    };
    state.completed_at_ms = now_ms();

    if let Err(e) = op.upsert(cx.client, state).await {
        warn!(error = %e, label = op.label(), "failed to persist terminal operation state");
    }

    result
}

fn error_detail(err: &OperationError) -> StatusDetail {
    StatusDetail {
        code: err.status_code().to_string(),
        message: err.to_string(),
    }
}
