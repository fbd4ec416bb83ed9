// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the management client and the operation poller.

use std::time::Duration;

use crate::error::{ConsoleError, Result};
use crate::poller::PollerConfig;

const DEFAULT_API_URL: &str = "https://127.0.0.1:8443";

/// Configuration for [`ConsoleClient`](crate::ConsoleClient) and the poller.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Base URL of the management API (scheme, host and port).
    pub api_url: String,
    /// Project to scope requests to. `None` means all projects.
    pub project: Option<String>,
    /// Bearer token sent with every request.
    pub bearer_token: Option<String>,
    /// Skip TLS certificate verification (development only).
    pub skip_cert_verification: bool,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Interval between operation list polls.
    pub poll_interval: Duration,
    /// How long a tracked operation may be absent from poll results before
    /// it is failed as orphaned.
    pub orphan_grace_period: Duration,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            project: None,
            bearer_token: None,
            skip_cert_verification: false,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            orphan_grace_period: Duration::from_secs(10),
        }
    }
}

impl ConsoleConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration for localhost development.
    ///
    /// The daemon ships with a self-signed certificate, so verification is skipped.
    pub fn localhost() -> Self {
        Self {
            skip_cert_verification: true,
            ..Self::default()
        }
    }

    /// Create a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HVCONSOLE_API_URL`: API base URL (default: "https://127.0.0.1:8443")
    /// - `HVCONSOLE_PROJECT`: Project name (default: all projects)
    /// - `HVCONSOLE_TOKEN`: Bearer token (default: none)
    /// - `HVCONSOLE_SKIP_CERT_VERIFICATION`: Skip TLS verification (default: "false")
    /// - `HVCONSOLE_CONNECT_TIMEOUT_MS`: Connection timeout in milliseconds (default: 10000)
    /// - `HVCONSOLE_REQUEST_TIMEOUT_MS`: Request timeout in milliseconds (default: 30000)
    /// - `HVCONSOLE_POLL_INTERVAL_MS`: Operation poll interval in milliseconds (default: 1000)
    /// - `HVCONSOLE_ORPHAN_GRACE_MS`: Orphan grace period in milliseconds (default: 10000)
    pub fn from_env() -> Result<Self> {
        let api_url =
            std::env::var("HVCONSOLE_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let project = std::env::var("HVCONSOLE_PROJECT")
            .ok()
            .filter(|p| !p.is_empty());

        let bearer_token = std::env::var("HVCONSOLE_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let skip_cert_verification = std::env::var("HVCONSOLE_SKIP_CERT_VERIFICATION")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let config = Self {
            api_url,
            project,
            bearer_token,
            skip_cert_verification,
            connect_timeout: Duration::from_millis(env_millis(
                "HVCONSOLE_CONNECT_TIMEOUT_MS",
                10_000,
            )?),
            request_timeout: Duration::from_millis(env_millis(
                "HVCONSOLE_REQUEST_TIMEOUT_MS",
                30_000,
            )?),
            poll_interval: Duration::from_millis(env_millis("HVCONSOLE_POLL_INTERVAL_MS", 1_000)?),
            orphan_grace_period: Duration::from_millis(env_millis(
                "HVCONSOLE_ORPHAN_GRACE_MS",
                10_000,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConsoleError::Config(format!(
                "api url must start with http:// or https://, got {:?}",
                self.api_url
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ConsoleError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.orphan_grace_period.is_zero() {
            return Err(ConsoleError::Config(
                "orphan grace period must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(ConsoleError::Config(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Poller settings derived from this configuration.
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            orphan_grace_period: self.orphan_grace_period,
        }
    }

    /// Set the API base URL.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Scope requests to a project.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Set the bearer token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Enable or disable certificate verification skipping.
    pub fn with_skip_cert_verification(mut self, skip: bool) -> Self {
        self.skip_cert_verification = skip;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the operation poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the orphan grace period.
    pub fn with_orphan_grace_period(mut self, grace: Duration) -> Self {
        self.orphan_grace_period = grace;
        self
    }
}

fn env_millis(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|e| ConsoleError::Config(format!("invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}
