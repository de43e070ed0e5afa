//! The authenticated request gateway.
//!
//! [`AuthGateway::authorized_request`] is the single entry point callers use.
//! It attaches the current access token, sends the request, and on a 401
//! recovers through the [`RefreshCoordinator`]: the request is replayed once
//! with the refreshed token, or fails with a terminal [`AuthError`].
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), dentgate_core::GatewayError> {
//! use std::sync::Arc;
//! use dentgate_core::{AuthGateway, GatewayConfig, MemoryStore, RequestEnvelope, Secret};
//!
//! let config = GatewayConfig::default().with_base_url("https://clinic.example.com/api/");
//! let gateway = AuthGateway::new(config, Arc::new(MemoryStore::new()))?;
//!
//! gateway.login("front-desk@example.com", &Secret::new("hunter2")).await?;
//! let response = gateway
//!     .authorized_request(RequestEnvelope::get("appointments").with_query("day", "today"))
//!     .await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ConfigError, GatewayConfig};
use crate::coordinator::{AuthError, RefreshCoordinator, Renewal};
use crate::refresh::{HttpRefreshInvoker, RefreshInvoker, parse_token_envelope};
use crate::request::{ApiResponse, RequestEnvelope, RequestKind};
use crate::store::{CredentialPair, CredentialStore, Secret, StoreError};
use crate::transport::{ReqwestTransport, Transport, TransportError};

/// Error returned to gateway callers.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Terminal authentication failure; the user must log in again.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// The request could not be exchanged with the server.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with an error status other than 401.
    #[error("request failed with status {status}")]
    Status { status: StatusCode, body: String },

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The login endpoint answered 2xx without a usable token pair.
    #[error("invalid login response: {message}")]
    InvalidLoginResponse { message: String },

    /// Reading or writing credentials failed.
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    /// The gateway could not be built from its configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl GatewayError {
    /// Whether the host should force a re-login.
    pub fn is_terminal_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// HTTP status for [`GatewayError::Status`].
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Wraps every outbound request with credential handling.
pub struct AuthGateway {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    coordinator: RefreshCoordinator,
}

impl AuthGateway {
    /// Build a gateway over HTTP using the given credential store.
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, GatewayError> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(&config)?);
        let invoker = Arc::new(HttpRefreshInvoker::new(
            Arc::clone(&transport),
            config.refresh_path.clone(),
        ));
        Ok(Self::with_parts(config, store, transport, invoker))
    }

    /// Build a gateway from explicit collaborators.
    pub fn with_parts(
        config: GatewayConfig,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        invoker: Arc<dyn RefreshInvoker>,
    ) -> Self {
        let coordinator =
            RefreshCoordinator::new(Arc::clone(&store), invoker, config.refresh_timeout());
        Self {
            config,
            transport,
            store,
            coordinator,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Send a request with the current access token.
    ///
    /// Returns the response for 2xx/3xx. A 401 on a regular request is
    /// recovered by a shared refresh and a single replay; any other status
    /// is [`GatewayError::Status`]. Transport failures never trigger a
    /// refresh.
    ///
    /// A 401 that arrives after another caller's refresh already replaced
    /// the token is first replayed with the stored token. Only a replay with
    /// a token from a cycle this request took part in is final.
    pub async fn authorized_request(
        &self,
        mut request: RequestEnvelope,
    ) -> Result<ApiResponse, GatewayError> {
        let mut bearer = self.store.get_access_token()?;
        let mut adopted = false;

        loop {
            let response = self.transport.send(&request, bearer.as_ref()).await?;
            if response.status != StatusCode::UNAUTHORIZED {
                return into_result(response);
            }

            let stale = if adopted { None } else { bearer.as_ref() };
            let renewal = self.handle_unauthorized(&request, stale).await?;

            match renewal {
                Renewal::Replaced(token) => {
                    tracing::debug!(
                        request_id = %request.id,
                        "Replaying request with token from a finished refresh"
                    );
                    adopted = true;
                    bearer = Some(token);
                }
                Renewal::Refreshed(token) => {
                    tracing::debug!(request_id = %request.id, "Replaying request with refreshed token");
                    request.retried = true;
                    bearer = Some(token);
                }
            }
        }
    }

    /// Decide how to recover from a 401 on `request`, which was sent with
    /// `sent_with`.
    ///
    /// Returns the token to replay with. Login and refresh requests, and
    /// requests that were already replayed once, fail without refreshing.
    pub async fn handle_unauthorized(
        &self,
        request: &RequestEnvelope,
        sent_with: Option<&Secret>,
    ) -> Result<Renewal, AuthError> {
        if !request.kind.enters_refresh_cycle() {
            tracing::warn!(request_id = %request.id, "{} request rejected as unauthorized", request.kind);
            return Err(AuthError::Unauthorized { kind: request.kind });
        }

        if request.retried {
            tracing::warn!(
                request_id = %request.id,
                "Request rejected again after replay, giving up"
            );
            return Err(AuthError::ReplayRejected);
        }

        self.coordinator.await_refresh(sent_with).await
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        self.send_json(RequestEnvelope::get(path)).await
    }

    /// Send `request` and decode the JSON body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestEnvelope,
    ) -> Result<T, GatewayError> {
        let response = self.authorized_request(request).await?;
        Ok(response.json()?)
    }

    /// Exchange email and password for a token pair and store it.
    pub async fn login(&self, email: &str, password: &Secret) -> Result<(), GatewayError> {
        let request = RequestEnvelope::post(self.config.login_path.as_str())
            .with_kind(RequestKind::Login)
            .with_body(serde_json::json!({
                "email": email,
                "password": password.expose(),
            }));

        let response = self.transport.send(&request, None).await?;
        if response.status == StatusCode::UNAUTHORIZED {
            tracing::warn!("Login rejected for {}", email);
            return Err(AuthError::Unauthorized {
                kind: RequestKind::Login,
            }
            .into());
        }
        let response = into_result(response)?;

        let tokens = parse_token_envelope(&response.body)
            .map_err(|message| GatewayError::InvalidLoginResponse { message })?;
        let refresh_token =
            tokens
                .refresh_token
                .ok_or_else(|| GatewayError::InvalidLoginResponse {
                    message: "response has no refreshToken".to_string(),
                })?;

        self.coordinator
            .install(&CredentialPair::from_secrets(tokens.access_token, refresh_token))?;

        tracing::info!("Logged in as {}", email);
        Ok(())
    }

    /// Clear credentials and release anyone waiting on a refresh.
    pub fn logout(&self) -> Result<(), GatewayError> {
        self.coordinator.teardown()?;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Refresh now, or join a refresh that is already running.
    pub async fn refresh_now(&self) -> Result<(), GatewayError> {
        self.coordinator.await_refresh(None).await?;
        Ok(())
    }

    /// Whether both tokens are present.
    pub fn is_logged_in(&self) -> Result<bool, GatewayError> {
        Ok(self.store.get_access_token()?.is_some() && self.store.get_refresh_token()?.is_some())
    }
}

impl std::fmt::Debug for AuthGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGateway")
            .field("base_url", &self.config.base_url)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

fn into_result(response: ApiResponse) -> Result<ApiResponse, GatewayError> {
    if response.status.is_success() || response.status.is_redirection() {
        Ok(response)
    } else {
        Err(GatewayError::Status {
            status: response.status,
            body: response.text().into_owned(),
        })
    }
}
