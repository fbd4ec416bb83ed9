// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ConsoleClient for interacting with the management daemon's REST API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::api::OperationsApi;
use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, Result};
use crate::types::{
    ApiResponse, InstanceStateChange, Operation, ResponseType, ServerInfo, Submission,
};

/// Characters left unescaped in a single path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const API_PREFIX: &str = "/1.0";

/// Client for the management daemon's REST API.
///
/// Synchronous requests return their payload directly. Requests the server
/// answers asynchronously return a [`Submission::Async`] whose operation ID
/// can be tracked with an [`OperationRegistry`](crate::OperationRegistry)
/// and an [`OperationPoller`](crate::OperationPoller).
pub struct ConsoleClient {
    http: reqwest::Client,
    base_url: String,
    config: ConsoleConfig,
}

impl ConsoleClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ConsoleConfig) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.skip_cert_verification)
            .build()
            .map_err(|e| ConsoleError::Config(format!("failed to build http client: {}", e)))?;

        let base_url = config.api_url.trim_end_matches('/').to_string();

        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ConsoleConfig::from_env()?)
    }

    /// Create a client for localhost development.
    pub fn localhost() -> Result<Self> {
        Self::new(ConsoleConfig::localhost())
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Query parameters that scope a request to the configured project.
    fn project_query(&self) -> Vec<(&'static str, String)> {
        match &self.config.project {
            Some(project) => vec![("project", project.clone())],
            None => Vec::new(),
        }
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ConsoleError {
        if err.is_timeout() {
            ConsoleError::Timeout(self.config.request_timeout.as_millis() as u64)
        } else {
            ConsoleError::from(err)
        }
    }

    /// Send a request and decode the response envelope.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let mut request = self.http.request(method, self.url(path)).query(query);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let envelope: ApiResponse = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(ConsoleError::Server {
                    code: status.as_u16().to_string(),
                    message: String::from_utf8_lossy(&bytes).trim().to_string(),
                });
            }
            Err(e) => {
                return Err(ConsoleError::UnexpectedResponse(format!(
                    "invalid response envelope: {}",
                    e
                )));
            }
        };

        if envelope.response_type == ResponseType::Error || !status.is_success() {
            let code = if envelope.error_code != 0 {
                envelope.error_code
            } else {
                status.as_u16()
            };
            return Err(ConsoleError::Server {
                code: code.to_string(),
                message: envelope.error,
            });
        }

        Ok(envelope)
    }

    /// Send a request whose sync response carries a typed payload.
    async fn send_sync<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let envelope = self.send(method, path, query, None).await?;
        if envelope.response_type != ResponseType::Sync {
            return Err(ConsoleError::UnexpectedResponse(format!(
                "expected sync response from {}",
                path
            )));
        }
        let metadata = envelope.metadata.unwrap_or(Value::Null);
        Ok(serde_json::from_value(metadata)?)
    }

    /// Map "not found" server errors to `OperationNotFound`.
    fn operation_error(id: &str, err: ConsoleError) -> ConsoleError {
        match err {
            ConsoleError::Server { code, .. } if code == StatusCode::NOT_FOUND.as_str() => {
                ConsoleError::OperationNotFound(id.to_string())
            }
            other => other,
        }
    }

    // =========================================================================
    // Server
    // =========================================================================

    /// Fetch server details from the API root.
    #[instrument(skip(self))]
    pub async fn server_info(&self) -> Result<ServerInfo> {
        debug!("Fetching server info");
        self.send_sync(Method::GET, API_PREFIX, &[]).await
    }

    // =========================================================================
    // Submissions
    // =========================================================================

    /// Submit an arbitrary request.
    ///
    /// `path` is relative to the API root, e.g. `/1.0/instances/web1`.
    #[instrument(skip(self, body))]
    pub async fn submit(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Submission> {
        let query = self.project_query();
        let envelope = self.send(method, path, &query, body.as_ref()).await?;

        match envelope.response_type {
            ResponseType::Sync => Ok(Submission::Sync(envelope.metadata.unwrap_or(Value::Null))),
            ResponseType::Async => {
                let mut operation: Operation = match envelope.metadata {
                    Some(metadata) => serde_json::from_value(metadata)?,
                    None => Operation::default(),
                };
                if operation.id.is_empty() {
                    operation.id = operation_id_from_url(&envelope.operation).ok_or_else(|| {
                        ConsoleError::UnexpectedResponse(
                            "async response without an operation id".to_string(),
                        )
                    })?;
                }
                debug!(operation_id = %operation.id, "Request started background operation");
                Ok(Submission::Async(operation))
            }
            ResponseType::Error => Err(ConsoleError::UnexpectedResponse(
                "error envelope with success status".to_string(),
            )),
        }
    }

    /// Submit a request that must start a background operation, returning its ID.
    async fn submit_async(&self, method: Method, path: &str, body: Option<Value>) -> Result<String> {
        match self.submit(method, path, body).await? {
            Submission::Async(op) => Ok(op.id),
            Submission::Sync(_) => Err(ConsoleError::UnexpectedResponse(format!(
                "expected async response from {}",
                path
            ))),
        }
    }

    // =========================================================================
    // Instance actions
    // =========================================================================

    /// Delete an instance. Returns the ID of the deletion operation.
    #[instrument(skip(self), fields(instance = %name))]
    pub async fn delete_instance(&self, name: &str) -> Result<String> {
        info!("Deleting instance");
        let path = format!("{}/instances/{}", API_PREFIX, encode_segment(name));
        self.submit_async(Method::DELETE, &path, None).await
    }

    /// Change the running state of an instance. Returns the operation ID.
    #[instrument(skip(self, change), fields(instance = %name, action = ?change.action))]
    pub async fn update_instance_state(
        &self,
        name: &str,
        change: InstanceStateChange,
    ) -> Result<String> {
        info!(force = change.force, "Changing instance state");
        let path = format!("{}/instances/{}/state", API_PREFIX, encode_segment(name));
        let body = serde_json::to_value(&change)?;
        self.submit_async(Method::PUT, &path, Some(body)).await
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// List operations, flattened from the server's per-status grouping.
    ///
    /// Groups are emitted in status-name order (`failure`, `running`,
    /// `success`, ...); order is kept only within a group.
    ///
    /// Scoped to the configured project, or to all projects if none is set.
    #[instrument(skip(self))]
    pub async fn list_operations(&self) -> Result<Vec<Operation>> {
        let mut query = vec![("recursion", "1".to_string())];
        match &self.config.project {
            Some(project) => query.push(("project", project.clone())),
            None => query.push(("all-projects", "true".to_string())),
        }

        let grouped: Option<BTreeMap<String, Vec<Operation>>> = self
            .send_sync(Method::GET, &format!("{}/operations", API_PREFIX), &query)
            .await?;

        let operations: Vec<Operation> = grouped
            .unwrap_or_default()
            .into_values()
            .flatten()
            .collect();
        debug!(count = operations.len(), "Listed operations");
        Ok(operations)
    }

    /// Get a single operation.
    #[instrument(skip(self), fields(operation_id = %id))]
    pub async fn get_operation(&self, id: &str) -> Result<Operation> {
        let path = format!("{}/operations/{}", API_PREFIX, encode_segment(id));
        self.send_sync(Method::GET, &path, &self.project_query())
            .await
            .map_err(|e| Self::operation_error(id, e))
    }

    /// Cancel a running operation.
    #[instrument(skip(self), fields(operation_id = %id))]
    pub async fn cancel_operation(&self, id: &str) -> Result<()> {
        info!("Cancelling operation");
        let path = format!("{}/operations/{}", API_PREFIX, encode_segment(id));
        self.send(Method::DELETE, &path, &self.project_query(), None)
            .await
            .map_err(|e| Self::operation_error(id, e))?;
        Ok(())
    }

    /// Block on the server until the operation finishes or `timeout` elapses,
    /// then return its state.
    #[instrument(skip(self), fields(operation_id = %id))]
    pub async fn wait_operation(&self, id: &str, timeout: Duration) -> Result<Operation> {
        let path = format!("{}/operations/{}/wait", API_PREFIX, encode_segment(id));
        let mut query = self.project_query();
        query.push(("timeout", timeout.as_secs().to_string()));
        self.send_sync(Method::GET, &path, &query)
            .await
            .map_err(|e| Self::operation_error(id, e))
    }
}

#[async_trait]
impl OperationsApi for ConsoleClient {
    async fn list_operations(&self) -> Result<Vec<Operation>> {
        ConsoleClient::list_operations(self).await
    }
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Extract the ID from an operation URL such as `/1.0/operations/<id>`.
fn operation_id_from_url(url: &str) -> Option<String> {
    let path = url.split('?').next().unwrap_or(url);
    path.strip_prefix("/1.0/operations/")
        .filter(|id| !id.is_empty() && !id.contains('/'))
        .map(str::to_string)
}
