//! HTTP transport primitive.
//!
//! A [`Transport`] executes exactly one request and reports what the server
//! said. It knows nothing about refresh; retries are the gateway's business.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::config::{ConfigError, GatewayConfig};
use crate::request::{ApiResponse, RequestEnvelope};
use crate::store::Secret;

/// Failure to exchange a request with the server.
///
/// HTTP error statuses are not transport errors; they arrive as an
/// [`ApiResponse`].
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out: {message}")]
    Timeout { message: String },

    /// Connection, TLS or protocol failure.
    #[error("network error: {message}")]
    Network { message: String },

    /// The request could not be built (bad path, header or body).
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                message: e.to_string(),
            }
        } else if e.is_builder() {
            Self::InvalidRequest {
                message: e.to_string(),
            }
        } else {
            Self::Network {
                message: e.to_string(),
            }
        }
    }
}

/// Executes a single request.
///
/// Implemented by [`ReqwestTransport`] and by test doubles.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request`, attaching `bearer` as `Authorization: Bearer <token>`
    /// when present.
    async fn send(
        &self,
        request: &RequestEnvelope,
        bearer: Option<&Secret>,
    ) -> Result<ApiResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestTransport {
    /// Build a client with the configured timeout and user agent.
    pub fn new(config: &GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::HttpClient {
                message: e.to_string(),
            })?;

        Ok(Self::with_client(client, config.parsed_base_url()?))
    }

    /// Use an existing client.
    pub fn with_client(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidRequest {
                message: format!("cannot resolve path {:?}: {}", path, e),
            })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &RequestEnvelope,
        bearer: Option<&Secret>,
    ) -> Result<ApiResponse, TransportError> {
        let url = self.resolve(&request.path)?;

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token.expose());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
            retried = request.retried,
            authorized = bearer.is_some(),
            "Sending request"
        );

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        tracing::debug!(request_id = %request.id, status = status.as_u16(), "Received response");

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
