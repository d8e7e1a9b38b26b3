// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner registration and the long-lived config stream.
//!
//! One background task per runner owns the registration stream. Each
//! successful (re)open bumps a generation counter that the job
//! reattach path waits on: a job stream is only reattached after the
//! runner has re-established its identity with the server.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::CoreConnector;
use stevedore_protocol::runner_proto::RunnerConfig;

/// Buffered config snapshots between the receive task and the watcher.
const CONFIG_CHANNEL_CAPACITY: usize = 8;

/// Handle to the registration task.
pub struct Registration {
    generation: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl Registration {
    /// Spawn the registration task.
    ///
    /// Returns the handle and the channel of pushed configuration
    /// snapshots (consumed by the config watcher). The channel closes
    /// when the task exits on cancellation.
    pub fn spawn(
        connector: Arc<dyn CoreConnector>,
        runner_id: String,
        backoff: Duration,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<RunnerConfig>) {
        let (generation_tx, generation_rx) = watch::channel(0u64);
        let (config_tx, config_rx) = mpsc::channel(CONFIG_CHANNEL_CAPACITY);

        let task = tokio::spawn(run(connector, runner_id, backoff, cancel, generation_tx, config_tx));

        (
            Self {
                generation: generation_rx,
                task,
            },
            config_rx,
        )
    }

    /// Watch receiver over the registration generation. The value
    /// increases by one every time the runner re-registers.
    pub fn generation(&self) -> watch::Receiver<u64> {
        self.generation.clone()
    }

    /// Wait for the registration task to exit. Call after cancelling
    /// the token passed to [`Registration::spawn`].
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

async fn run(
    connector: Arc<dyn CoreConnector>,
    runner_id: String,
    backoff: Duration,
    cancel: CancellationToken,
    generation_tx: watch::Sender<u64>,
    config_tx: mpsc::Sender<RunnerConfig>,
) {
    let mut generation: u64 = 0;

    while !cancel.is_cancelled() {
        match connector.open_config_stream(&runner_id).await {
            Ok(mut stream) => {
                generation += 1;
                let _ = generation_tx.send(generation);
                info!(%runner_id, generation, "runner registered with stevedore-core");

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        result = stream.recv() => match result {
                            Ok(Some(config)) => {
                                debug!(vars = config.config_vars.len(), "runner config received");
                                if config_tx.send(config).await.is_err() {
                                    // Watcher gone; keep the stream up for
                                    // the generation gate alone.
                                    debug!("config receiver dropped");
                                }
                            }
                            Ok(None) => {
                                warn!("config stream closed by server");
                                break;
                            }
                            Err(e) => {
                                warn!(error = %e, "config stream failed");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "registration attempt failed");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}
