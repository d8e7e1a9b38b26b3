// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner configuration for connecting to stevedore-core.

use std::env;
use std::net::SocketAddr;

use crate::error::{Result, RunnerError};

/// Runner configuration for connecting to stevedore-core.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Runner ID - unique identifier for this runner. Defaults to a
    /// random v4 UUID when not configured.
    pub runner_id: String,
    /// Server address (default: "127.0.0.1:9701")
    pub server_addr: SocketAddr,
    /// Server name for TLS verification (default: "localhost")
    pub server_name: String,
    /// Skip TLS certificate verification (default: false, use true for dev)
    pub skip_cert_verification: bool,
    /// Connection timeout in milliseconds (default: 10_000)
    pub connect_timeout_ms: u64,
    /// Backoff between registration stream reconnect attempts in
    /// milliseconds (default: 1_000)
    pub register_backoff_ms: u64,
}

impl RunnerSettings {
    /// Load configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `STEVEDORE_RUNNER_ID` - Runner identifier (default: random UUID)
    /// - `STEVEDORE_SERVER_ADDR` - Server address (default: "127.0.0.1:9701")
    /// - `STEVEDORE_SERVER_NAME` - Server name for TLS (default: "localhost")
    /// - `STEVEDORE_SKIP_CERT_VERIFICATION` - Skip TLS verification (default: false)
    /// - `STEVEDORE_CONNECT_TIMEOUT_MS` - Connection timeout (default: 10000)
    /// - `STEVEDORE_REGISTER_BACKOFF_MS` - Registration reconnect backoff (default: 1000)
    pub fn from_env() -> Result<Self> {
        let runner_id = env::var("STEVEDORE_RUNNER_ID")
            .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let server_addr = env::var("STEVEDORE_SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:9701".to_string())
            .parse()
            .map_err(|e| RunnerError::Config(format!("invalid STEVEDORE_SERVER_ADDR: {}", e)))?;

        let server_name =
            env::var("STEVEDORE_SERVER_NAME").unwrap_or_else(|_| "localhost".to_string());

        let skip_cert_verification = env::var("STEVEDORE_SKIP_CERT_VERIFICATION")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let connect_timeout_ms = env::var("STEVEDORE_CONNECT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000);

        let register_backoff_ms = env::var("STEVEDORE_REGISTER_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1_000);

        Ok(Self {
            runner_id,
            server_addr,
            server_name,
            skip_cert_verification,
            connect_timeout_ms,
            register_backoff_ms,
        })
    }

    /// Create a configuration for local development.
    ///
    /// Connects to `127.0.0.1:9701` with TLS verification disabled.
    pub fn localhost(runner_id: impl Into<String>) -> Self {
        Self {
            runner_id: runner_id.into(),
            server_addr: "127.0.0.1:9701".parse().unwrap(),
            server_name: "localhost".to_string(),
            skip_cert_verification: true,
            connect_timeout_ms: 10_000,
            register_backoff_ms: 1_000,
        }
    }

    /// Create a new configuration with the given runner ID.
    pub fn new(runner_id: impl Into<String>) -> Self {
        Self {
            runner_id: runner_id.into(),
            server_addr: "127.0.0.1:9701".parse().unwrap(),
            server_name: "localhost".to_string(),
            skip_cert_verification: false,
            connect_timeout_ms: 10_000,
            register_backoff_ms: 1_000,
        }
    }

    /// Set the server address.
    pub fn with_server_addr(mut self, addr: SocketAddr) -> Self {
        self.server_addr = addr;
        self
    }

    /// Set the server name for TLS verification.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Skip TLS certificate verification (for development only!).
    pub fn with_skip_cert_verification(mut self, skip: bool) -> Self {
        self.skip_cert_verification = skip;
        self
    }

    /// Set the registration reconnect backoff.
    pub fn with_register_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.register_backoff_ms = backoff_ms;
        self
    }
}
