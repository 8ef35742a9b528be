//! HTTP client library for a herald server.
//!
//! Provides `HeraldClient` for interacting with a running server over HTTP.
//! Used by CLI commands to communicate with local or remote servers.

mod error;

pub use crate::api::{
    ClearQueueResponse, InitializeResponse, QueueStatsResponse, ReadyzResponse,
    SendMessageRequest, SendMessageResponse, SessionStatusResponse,
};
pub use error::{ClientError, Result};

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use crate::build_info;

/// HTTP client for a herald server.
#[derive(Debug, Clone)]
pub struct HeraldClient {
    base_url: String,
    http: Client,
    admin_token: Option<String>,
}

impl HeraldClient {
    /// Create a new client pointing to the given base URL.
    ///
    /// Example: `HeraldClient::new("http://localhost:3000")`
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        let http = Client::builder()
            .user_agent(build_info::user_agent())
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            admin_token: None,
        }
    }

    /// Send `token` as a bearer token on admin requests.
    #[must_use]
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the server is healthy.
    ///
    /// Calls GET /readyz and returns the reported session phase.
    pub async fn health(&self) -> Result<ReadyzResponse> {
        let url = format!("{}/readyz", self.base_url);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(ClientError::ServerUnhealthy {
                status: response.status().as_u16(),
            });
        }

        Ok(response.json().await?)
    }

    // ----------------------------------------------------------------------------
    // Session
    // ----------------------------------------------------------------------------

    pub async fn status(&self) -> Result<SessionStatusResponse> {
        let url = format!("{}/api/v1/session/status", self.base_url);
        let response = self.http.get(&url).send().await?;
        self.json_response(response).await
    }

    /// Bring the session up, waiting until it is ready or fails.
    pub async fn initialize(&self) -> Result<InitializeResponse> {
        let url = format!("{}/api/v1/session/initialize", self.base_url);
        let response = self.http.post(&url).send().await?;
        self.json_response(response).await
    }

    // ----------------------------------------------------------------------------
    // Messages & Queue
    // ----------------------------------------------------------------------------

    pub async fn send(&self, request: &SendMessageRequest) -> Result<SendMessageResponse> {
        let url = format!("{}/api/v1/messages", self.base_url);
        let response = self.http.post(&url).json(request).send().await?;
        self.json_response(response).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStatsResponse> {
        let url = format!("{}/api/v1/queue", self.base_url);
        let response = self.http.get(&url).send().await?;
        self.json_response(response).await
    }

    /// Drop everything still waiting in the queue.
    pub async fn clear_queue(&self) -> Result<ClearQueueResponse> {
        let url = format!("{}/api/v1/queue", self.base_url);
        let response = self.http.delete(&url).send().await?;
        self.json_response(response).await
    }

    // ----------------------------------------------------------------------------
    // Admin
    // ----------------------------------------------------------------------------

    /// Request server shutdown.
    ///
    /// Calls POST /api/admin/v1/shutdown to trigger graceful server shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        let url = format!("{}/api/admin/v1/shutdown", self.base_url);
        let response = self.admin(self.http.post(&url)).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.parse_error(response).await)
        }
    }

    // ----------------------------------------------------------------------------
    // Helpers
    // ----------------------------------------------------------------------------

    fn admin(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.admin_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Parse an error response into a ClientError.
    async fn parse_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();

        // Try to parse as problem+json
        if let Ok(problem) = response.json::<ProblemDetails>().await {
            ClientError::ApiError {
                status,
                message: problem.detail.unwrap_or(problem.title),
            }
        } else {
            ClientError::ApiError {
                status,
                message: format!("HTTP {}", status),
            }
        }
    }

    /// Parse a successful JSON response or convert error response.
    async fn json_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(self.parse_error(response).await)
        }
    }
}

/// RFC 7807 Problem Details response.
#[derive(Deserialize)]
struct ProblemDetails {
    title: String,
    detail: Option<String>,
}
