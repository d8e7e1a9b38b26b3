// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stevedore Runner - the agent that executes deployment jobs.
//!
//! A runner registers with stevedore-core, claims jobs (build, push,
//! deploy, release, destroy, status report) over long-lived QUIC
//! streams, executes them through pluggable platform components, and
//! reports status back reliably across transient server outages.
//!
//! # Features
//!
//! - **Job acceptance**: [`Runner::accept`] claims, executes, and
//!   reports exactly one job per call; call it concurrently to run
//!   jobs in parallel
//! - **Automatic reattach**: a server restart mid-job re-registers the
//!   runner and resumes the same job exactly once; a job is never lost
//!   or duplicated by a disconnect
//! - **Operation lifecycle**: every operation persists a RUNNING state
//!   before work starts and its terminal state after, regardless of
//!   outcome, so the server never shows a job stuck running
//! - **Pushed configuration**: server-pushed env var snapshots are
//!   reconciled against the process environment, restoring pre-runner
//!   values when the server stops managing a variable
//! - **Terminal streaming**: component output is batched into ordered,
//!   timestamped line batches on the job stream
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use stevedore_runner::{Runner, RunnerSettings};
//! use stevedore_runner::transport::quic::{QuicCoreConnector, QuicStateClient};
//!
//! #[tokio::main]
//! async fn main() -> stevedore_runner::Result<()> {
//!     let settings = RunnerSettings::from_env()?;
//!
//!     let connector = Arc::new(QuicCoreConnector::new(&settings)?);
//!     let state = Arc::new(QuicStateClient::new(connector.client()));
//!     let project = plugin_host::load_project()?; // out-of-scope collaborator
//!
//!     let runner = Runner::new(settings, connector, state, project);
//!
//!     // Process jobs until stopped; accept() returns per job.
//!     loop {
//!         if let Err(e) = runner.accept().await {
//!             tracing::warn!(error = %e, "accept failed, retrying");
//!         }
//!     }
//! }
//! ```
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `STEVEDORE_RUNNER_ID` | No | random UUID | Runner identifier |
//! | `STEVEDORE_SERVER_ADDR` | No | `127.0.0.1:9701` | Server address |
//! | `STEVEDORE_SERVER_NAME` | No | `localhost` | TLS server name |
//! | `STEVEDORE_SKIP_CERT_VERIFICATION` | No | `false` | Skip TLS verification |
//! | `STEVEDORE_CONNECT_TIMEOUT_MS` | No | `10000` | Connection timeout |
//! | `STEVEDORE_REGISTER_BACKOFF_MS` | No | `1000` | Registration reconnect backoff |

mod client;
mod config;
mod config_watcher;
mod error;
mod events;
mod operation;
mod operations;
mod reattach;
mod registration;
mod ui;

pub mod component;
pub mod transport;

// Main types
pub use client::Runner;
pub use config::RunnerSettings;
pub use config_watcher::{ConfigWatcher, EnvironmentSink, ProcessEnv};
pub use error::{OperationError, Result, RunnerError, StreamError};
pub use operation::{ExecutorContext, Operation, execute};
pub use operations::{
    BuildOperation, BuildResult, DeployOperation, DestroyOperation, PushOperation,
    ReleaseOperation, StatusReportOperation,
};
pub use reattach::ReattachStream;
pub use registration::Registration;
pub use ui::{BATCH_CAPACITY, FLUSH_INTERVAL, JobUi, UiWriter};

// Re-export the wire types operations and collaborators exchange
pub use stevedore_protocol::runner_proto;
