// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stevedore Protocol - QUIC + Protobuf communication layer
//!
//! This crate provides the wire protocol for communication between
//! stevedore runners and stevedore-core:
//! - claiming jobs and reporting their outcome (job stream)
//! - runner registration and pushed runtime configuration (config stream)
//! - persisting operation state records (unary upsert)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   stevedore-protocol                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RPC Layer: Request/Response + Long-Lived Event Streams     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: Protobuf (prost)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: QUIC (quinn)                                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ## Unary request (operation state upsert)
//!
//! ```ignore
//! use stevedore_protocol::{RunnerClient, runner_proto};
//!
//! let client = RunnerClient::localhost()?;
//! client.connect().await?;
//!
//! let request = runner_proto::UpsertOperationRequest { state: Some(state) };
//! let response: runner_proto::UpsertOperationResponse = client.request(&request).await?;
//! ```
//!
//! ## Long-lived stream (job stream)
//!
//! ```ignore
//! use stevedore_protocol::{Frame, RunnerClient, runner_proto};
//! use stevedore_protocol::runner_proto::runner_job_stream_request::Event;
//!
//! let (mut send, mut recv) = client.open_raw_stream().await?;
//!
//! let open = runner_proto::RunnerJobStreamRequest {
//!     event: Some(Event::Request(runner_proto::JobRequest {
//!         runner_id: "runner-1".into(),
//!         reattach_job_id: None,
//!     })),
//! };
//! stevedore_protocol::frame::write_frame(&mut send, &Frame::request(&open)?).await?;
//! // ... read assignment events, write ack/terminal/complete events
//! ```

pub mod client;
pub mod frame;
pub mod server;

// Re-export generated protobuf types for the runner protocol
pub mod runner_proto {
    include!(concat!(env!("OUT_DIR"), "/stevedore.runner.rs"));
}

/// Well-known `StatusDetail.code` values used in error frames.
///
/// Runners classify `unavailable` and `not_found` as transient (the
/// job reattach path retries them); everything else is terminal.
pub mod status_code {
    /// The server cannot currently serve the request; safe to retry.
    pub const UNAVAILABLE: &str = "unavailable";
    /// The server does not know the referenced entity (e.g. a job
    /// stream lost across a server restart); safe to retry via reattach.
    pub const NOT_FOUND: &str = "not_found";
    /// Protocol violation; the exchange cannot continue.
    pub const ABORTED: &str = "aborted";
    /// Unclassified server-side failure.
    pub const INTERNAL: &str = "internal";
}

// Re-export main types
pub use client::{ClientError, RunnerClient, RunnerClientConfig};
pub use frame::{Frame, FrameError, FramedStream, MessageType};
pub use server::{ConnectionHandler, ServerError, StevedoreServer, StevedoreServerConfig, StreamHandler};
