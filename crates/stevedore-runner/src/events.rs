// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job stream message builders.

use stevedore_protocol::runner_proto::{
    JobAck, JobComplete, JobError, JobRequest, RunnerJobStreamRequest, StatusDetail, TerminalBatch,
    TerminalLine, runner_job_stream_request::Event,
};

use crate::error::OperationError;

/// Build the stream-opening job request.
pub(crate) fn build_request(
    runner_id: &str,
    reattach_job_id: Option<&str>,
) -> RunnerJobStreamRequest {
    RunnerJobStreamRequest {
        event: Some(Event::Request(JobRequest {
            runner_id: runner_id.to_string(),
            reattach_job_id: reattach_job_id.map(|s| s.to_string()),
        })),
    }
}

/// Build an assignment acknowledgement.
pub(crate) fn build_ack() -> RunnerJobStreamRequest {
    RunnerJobStreamRequest {
        event: Some(Event::Ack(JobAck {})),
    }
}

/// Build a terminal output batch.
pub(crate) fn build_terminal(lines: Vec<TerminalLine>) -> RunnerJobStreamRequest {
    RunnerJobStreamRequest {
        event: Some(Event::Terminal(TerminalBatch { lines })),
    }
}

/// Build a job completion event.
pub(crate) fn build_complete() -> RunnerJobStreamRequest {
    RunnerJobStreamRequest {
        event: Some(Event::Complete(JobComplete {})),
    }
}

/// Build a job error event from a local execution failure.
pub(crate) fn build_error(err: &OperationError) -> RunnerJobStreamRequest {
    RunnerJobStreamRequest {
        event: Some(Event::Error(JobError {
            status: Some(StatusDetail {
                code: err.status_code().to_string(),
                message: err.to_string(),
            }),
        })),
    }
}

/// Build one timestamped terminal line.
pub(crate) fn build_line(raw: impl Into<String>, line: u64) -> TerminalLine {
    TerminalLine {
        raw: raw.into(),
        line,
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    }
}
