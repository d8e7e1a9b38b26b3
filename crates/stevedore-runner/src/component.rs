// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Collaborator traits for platform components.
//!
//! The runner does not know how to build images or talk to cloud
//! providers; it drives plugin-backed applications through the [`App`]
//! trait and records whatever they return. Implementations live in the
//! plugin host crates; tests use in-memory fakes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OperationError;
use crate::ui::JobUi;

/// Artifact produced by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Component-assigned identifier (e.g. an image id).
    pub id: String,
    /// Free-form labels attached by the builder.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Artifact uploaded to a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushedArtifact {
    pub artifact: Artifact,
    /// Registry location the artifact was pushed to.
    pub location: String,
}

/// A deployment created by a platform component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    /// Platform-internal URL of the deployment, if any.
    #[serde(default)]
    pub url: Option<String>,
}

/// A release routing traffic to a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    /// Public URL of the release, if the platform exposes one.
    #[serde(default)]
    pub url: Option<String>,
}

/// Health of a deployed resource as observed by a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Unknown,
    Alive,
    Ready,
    Down,
}

/// Point-in-time status report for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub health: Health,
    /// Human-readable summary from the platform.
    pub detail: String,
}

/// A resolved application: the unit operations run against.
///
/// Each method performs the component work for one operation kind,
/// writing progress to the given [`JobUi`] and returning the result
/// the executor persists.
#[async_trait]
pub trait App: Send + Sync {
    /// The application name this handle resolves.
    fn application(&self) -> &str;

    async fn build(&self, ui: &JobUi) -> std::result::Result<Artifact, OperationError>;

    async fn push(
        &self,
        ui: &JobUi,
        artifact: Artifact,
    ) -> std::result::Result<PushedArtifact, OperationError>;

    async fn deploy(
        &self,
        ui: &JobUi,
        artifact: PushedArtifact,
    ) -> std::result::Result<Deployment, OperationError>;

    async fn release(
        &self,
        ui: &JobUi,
        deployment: Deployment,
        prune: bool,
    ) -> std::result::Result<Release, OperationError>;

    async fn destroy(
        &self,
        ui: &JobUi,
        deployment: Deployment,
    ) -> std::result::Result<(), OperationError>;

    async fn status_report(
        &self,
        ui: &JobUi,
        deployment: Deployment,
    ) -> std::result::Result<StatusReport, OperationError>;
}

/// Resolves application references from assigned jobs.
pub trait Project: Send + Sync {
    fn app(&self, name: &str) -> std::result::Result<Arc<dyn App>, OperationError>;
}
