// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime configuration reconciliation.
//!
//! The server pushes complete [`RunnerConfig`] snapshots over the
//! registration stream; each one supersedes the previous wholesale.
//! The watcher reconciles the target environment against the snapshot:
//! variables the server stops managing fall back to their pre-runner
//! values, and variables already at their target are left untouched.
//!
//! The process environment is global mutable state, so the watcher is
//! its sole writer: run exactly one watcher per runner.

use std::collections::HashMap;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use stevedore_protocol::runner_proto::{PollSettings, RunnerConfig, config_var};

/// Where configuration variables are applied.
///
/// Injected so reconciliation is testable without mutating the real
/// process environment.
pub trait EnvironmentSink: Send {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&mut self, name: &str, value: &str) -> std::io::Result<()>;
    fn unset(&mut self, name: &str) -> std::io::Result<()>;
    /// Capture the complete current environment.
    fn snapshot(&self) -> HashMap<String, String>;
}

/// The real process environment.
pub struct ProcessEnv;

impl EnvironmentSink for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn set(&mut self, name: &str, value: &str) -> std::io::Result<()> {
        // Sound per the single-writer rule above: the watcher is the
        // only environment mutator in the process.
        unsafe { std::env::set_var(name, value) };
        Ok(())
    }

    fn unset(&mut self, name: &str) -> std::io::Result<()> {
        unsafe { std::env::remove_var(name) };
        Ok(())
    }

    fn snapshot(&self) -> HashMap<String, String> {
        std::env::vars().collect()
    }
}

/// Applies pushed configuration snapshots to an environment sink.
pub struct ConfigWatcher<S> {
    sink: S,
    /// Environment as it was before the first config arrived; the
    /// restoration baseline when the server unsets a variable.
    original_env: Option<HashMap<String, String>>,
    previous: Option<RunnerConfig>,
    poll_tx: watch::Sender<PollSettings>,
}

impl<S: EnvironmentSink> ConfigWatcher<S> {
    /// Create a watcher over the given sink. The returned receiver
    /// tracks the latest poll settings from the server.
    pub fn new(sink: S) -> (Self, watch::Receiver<PollSettings>) {
        let (poll_tx, poll_rx) = watch::channel(PollSettings::default());
        (
            Self {
                sink,
                original_env: None,
                previous: None,
                poll_tx,
            },
            poll_rx,
        )
    }

    /// Consume configs from the registration stream until it closes.
    pub async fn watch(mut self, mut configs: mpsc::Receiver<RunnerConfig>) {
        while let Some(config) = configs.recv().await {
            self.apply(&config);
        }
        debug!("config channel closed, watcher exiting");
    }

    /// Reconcile the sink against one configuration snapshot.
    pub fn apply(&mut self, config: &RunnerConfig) {
        if self.original_env.is_none() {
            let snapshot = self.sink.snapshot();
            debug!(vars = snapshot.len(), "captured original environment");
            self.original_env = Some(snapshot);
        }
        let original = self.original_env.clone().unwrap_or_default();

        // Working map seeded from the pre-runner environment. A
        // variable the previous config set that the original never had
        // is marked for unset, so a value the server stops managing
        // falls back instead of persisting.
        let mut env: HashMap<String, String> = original.clone();
        if let Some(previous) = &self.previous {
            for var in &previous.config_vars {
                if !original.contains_key(&var.name) {
                    env.insert(var.name.clone(), String::new());
                }
            }
        }

        for var in &config.config_vars {
            match &var.value {
                Some(config_var::Value::StaticValue(value)) => {
                    env.insert(var.name.clone(), value.clone());
                }
                Some(config_var::Value::Dynamic(dynamic)) => {
                    warn!(
                        name = %var.name,
                        from = %dynamic.from,
                        "dynamic config values are not supported on runners, skipping"
                    );
                }
                None => {
                    warn!(name = %var.name, "config var without value, skipping");
                }
            }
        }

        for (name, value) in &env {
            let current = self.sink.get(name);
            if current.as_deref() == Some(value.as_str()) {
                continue;
            }
            if value.is_empty() {
                if current.is_none() {
                    continue;
                }
                info!(%name, "unsetting configuration variable");
                if let Err(e) = self.sink.unset(name) {
                    warn!(%name, error = %e, "failed to unset environment variable");
                }
            } else {
                info!(%name, "setting configuration variable");
                if let Err(e) = self.sink.set(name, value) {
                    warn!(%name, error = %e, "failed to set environment variable");
                }
            }
        }

        if let Some(poll) = &config.poll {
            let _ = self.poll_tx.send(poll.clone());
        }
        self.previous = Some(config.clone());
    }
}
