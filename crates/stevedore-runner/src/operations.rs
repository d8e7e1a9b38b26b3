// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Concrete operations, one type per job kind.
//!
//! Each type carries its job-specific inputs as fields and leans on
//! the executor for all lifecycle bookkeeping. Inputs produced by
//! earlier operations arrive as opaque values and are decoded here;
//! a payload that fails to decode surfaces through the normal error
//! path (the operation starts, then records the failure).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::component::{App, Artifact, Deployment, PushedArtifact, Release, StatusReport};
use crate::error::OperationError;
use crate::operation::{Operation, initial_state};
use crate::ui::JobUi;
use stevedore_protocol::runner_proto::{
    BuildOp, DeployOp, DestroyOp, Job, OpaqueValue, OperationState, PushOp, ReleaseOp,
    StatusReportOp,
};

fn decode_input<T: DeserializeOwned>(
    value: Option<&OpaqueValue>,
    what: &str,
) -> Result<T, OperationError> {
    let value =
        value.ok_or_else(|| OperationError::InvalidPayload(format!("missing {}", what)))?;
    serde_json::from_slice(&value.data)
        .map_err(|e| OperationError::InvalidPayload(format!("{}: {}", what, e)))
}

/// Result of a build, including the registry push unless disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub artifact: Artifact,
    #[serde(default)]
    pub push: Option<PushedArtifact>,
}

pub struct BuildOperation {
    disable_push: bool,
}

impl BuildOperation {
    pub fn new(op: &BuildOp) -> Self {
        Self {
            disable_push: op.disable_push,
        }
    }
}

#[async_trait]
impl Operation for BuildOperation {
    type Output = BuildResult;

    fn label(&self) -> &'static str {
        "build"
    }

    fn init(&self, job: &Job) -> Result<OperationState, OperationError> {
        Ok(initial_state(job))
    }

    async fn run(&mut self, app: &dyn App, ui: &JobUi) -> Result<Self::Output, OperationError> {
        let _ = ui.output(format!("building {}", app.application())).await;
        let artifact = app.build(ui).await?;

        if self.disable_push {
            return Ok(BuildResult {
                artifact,
                push: None,
            });
        }

        let _ = ui.output("pushing artifact").await;
        let push = app.push(ui, artifact.clone()).await?;
        Ok(BuildResult {
            artifact,
            push: Some(push),
        })
    }
}

pub struct PushOperation {
    artifact: Option<OpaqueValue>,
}

impl PushOperation {
    pub fn new(op: &PushOp) -> Self {
        Self {
            artifact: op.artifact.clone(),
        }
    }
}

#[async_trait]
impl Operation for PushOperation {
    type Output = PushedArtifact;

    fn label(&self) -> &'static str {
        "push"
    }

    fn init(&self, job: &Job) -> Result<OperationState, OperationError> {
        Ok(initial_state(job))
    }

    async fn run(&mut self, app: &dyn App, ui: &JobUi) -> Result<Self::Output, OperationError> {
        let artifact: Artifact = decode_input(self.artifact.as_ref(), "artifact")?;
        let _ = ui.output(format!("pushing {}", artifact.id)).await;
        app.push(ui, artifact).await
    }
}

pub struct DeployOperation {
    artifact: Option<OpaqueValue>,
}

impl DeployOperation {
    pub fn new(op: &DeployOp) -> Self {
        Self {
            artifact: op.artifact.clone(),
        }
    }
}

#[async_trait]
impl Operation for DeployOperation {
    type Output = Deployment;

    fn label(&self) -> &'static str {
        "deploy"
    }

    fn init(&self, job: &Job) -> Result<OperationState, OperationError> {
        Ok(initial_state(job))
    }

    async fn run(&mut self, app: &dyn App, ui: &JobUi) -> Result<Self::Output, OperationError> {
        let artifact: PushedArtifact = decode_input(self.artifact.as_ref(), "artifact")?;
        let _ = ui
            .output(format!("deploying {} to {}", artifact.artifact.id, app.application()))
            .await;
        app.deploy(ui, artifact).await
    }
}

pub struct ReleaseOperation {
    deployment: Option<OpaqueValue>,
    prune: bool,
}

impl ReleaseOperation {
    pub fn new(op: &ReleaseOp) -> Self {
        Self {
            deployment: op.deployment.clone(),
            prune: op.prune,
        }
    }
}

#[async_trait]
impl Operation for ReleaseOperation {
    type Output = Release;

    fn label(&self) -> &'static str {
        "release"
    }

    fn init(&self, job: &Job) -> Result<OperationState, OperationError> {
        Ok(initial_state(job))
    }

    async fn run(&mut self, app: &dyn App, ui: &JobUi) -> Result<Self::Output, OperationError> {
        let deployment: Deployment = decode_input(self.deployment.as_ref(), "deployment")?;
        let _ = ui.output(format!("releasing {}", deployment.id)).await;
        app.release(ui, deployment, self.prune).await
    }
}

pub struct DestroyOperation {
    deployment: Option<OpaqueValue>,
}

impl DestroyOperation {
    pub fn new(op: &DestroyOp) -> Self {
        Self {
            deployment: op.deployment.clone(),
        }
    }
}

#[async_trait]
impl Operation for DestroyOperation {
    type Output = ();

    fn label(&self) -> &'static str {
        "destroy"
    }

    fn init(&self, job: &Job) -> Result<OperationState, OperationError> {
        Ok(initial_state(job))
    }

    async fn run(&mut self, app: &dyn App, ui: &JobUi) -> Result<Self::Output, OperationError> {
        let deployment: Deployment = decode_input(self.deployment.as_ref(), "deployment")?;
        let _ = ui.output(format!("destroying {}", deployment.id)).await;
        app.destroy(ui, deployment).await
    }
}

pub struct StatusReportOperation {
    deployment: Option<OpaqueValue>,
}

impl StatusReportOperation {
    pub fn new(op: &StatusReportOp) -> Self {
        Self {
            deployment: op.deployment.clone(),
        }
    }
}

#[async_trait]
impl Operation for StatusReportOperation {
    type Output = StatusReport;

    fn label(&self) -> &'static str {
        "status_report"
    }

    fn init(&self, job: &Job) -> Result<OperationState, OperationError> {
        Ok(initial_state(job))
    }

    async fn run(&mut self, app: &dyn App, ui: &JobUi) -> Result<Self::Output, OperationError> {
        let deployment: Deployment = decode_input(self.deployment.as_ref(), "deployment")?;
        app.status_report(ui, deployment).await
    }
}
