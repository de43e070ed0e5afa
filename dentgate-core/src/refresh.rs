//! Refresh invoker: exchanges a refresh token for a new token pair.
//!
//! The wire contract is `POST {refresh_path}` with `{"refreshToken": "..."}`,
//! answered by `{"accessToken": "...", "refreshToken": "..."}` where the
//! refresh token is only present when the server rotates it.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::request::{RequestEnvelope, RequestKind};
use crate::store::{CredentialPair, Secret};
use crate::transport::{Transport, TransportError};

/// Why a refresh attempt failed.
///
/// Every variant is treated the same way by the coordinator: the session is
/// torn down. The distinction exists for logs and diagnostics.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    /// The refresh endpoint answered with a non-2xx status.
    #[error("refresh endpoint rejected the token with status {status}")]
    Rejected { status: u16 },

    /// The refresh request never got an answer.
    #[error("refresh request failed: {0}")]
    Transport(#[from] TransportError),

    /// A 2xx answer without a usable access token.
    #[error("malformed refresh response: {message}")]
    MalformedResponse { message: String },

    /// The refresh call exceeded the configured timeout.
    #[error("refresh timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The refresh task stopped without producing a result.
    #[error("refresh task aborted: {message}")]
    Aborted { message: String },

    /// Reading or writing the credential store failed.
    #[error("credential store failed during refresh: {message}")]
    Store { message: String },
}

/// Tokens returned by a successful refresh or login.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: Secret,

    /// Present only when the server rotated the refresh token.
    pub refresh_token: Option<Secret>,
}

impl RefreshedTokens {
    /// Build the pair to store, keeping `previous` when the refresh token
    /// was not rotated.
    pub fn into_pair(self, previous: Secret) -> CredentialPair {
        CredentialPair::from_secrets(self.access_token, self.refresh_token.unwrap_or(previous))
    }
}

/// Token envelope shared by the login and refresh endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenEnvelope {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Extract tokens from a 2xx body.
///
/// Anything without a non-empty string `accessToken` is rejected. An empty
/// `refreshToken` counts as "not rotated".
pub(crate) fn parse_token_envelope(body: &[u8]) -> Result<RefreshedTokens, String> {
    let envelope: TokenEnvelope =
        serde_json::from_slice(body).map_err(|e| format!("invalid JSON body: {}", e))?;

    let access_token = envelope
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "response has no accessToken".to_string())?;

    Ok(RefreshedTokens {
        access_token: Secret::new(access_token),
        refresh_token: envelope
            .refresh_token
            .filter(|t| !t.is_empty())
            .map(Secret::new),
    })
}

/// Calls the remote refresh endpoint.
#[async_trait]
pub trait RefreshInvoker: Send + Sync {
    async fn refresh(&self, refresh_token: &Secret) -> Result<RefreshedTokens, RefreshError>;
}

/// [`RefreshInvoker`] that goes through the shared [`Transport`].
///
/// Refresh requests are tagged [`RequestKind::Refresh`] and sent without a
/// bearer token, so they can never re-enter the refresh cycle.
pub struct HttpRefreshInvoker {
    transport: Arc<dyn Transport>,
    refresh_path: String,
}

impl HttpRefreshInvoker {
    pub fn new(transport: Arc<dyn Transport>, refresh_path: impl Into<String>) -> Self {
        Self {
            transport,
            refresh_path: refresh_path.into(),
        }
    }
}

impl std::fmt::Debug for HttpRefreshInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRefreshInvoker")
            .field("refresh_path", &self.refresh_path)
            .finish()
    }
}

#[async_trait]
impl RefreshInvoker for HttpRefreshInvoker {
    async fn refresh(&self, refresh_token: &Secret) -> Result<RefreshedTokens, RefreshError> {
        let request = RequestEnvelope::post(self.refresh_path.as_str())
            .with_kind(RequestKind::Refresh)
            .with_body(serde_json::json!({ "refreshToken": refresh_token.expose() }));

        let response = self.transport.send(&request, None).await?;

        if !response.is_success() {
            return Err(RefreshError::Rejected {
                status: response.status.as_u16(),
            });
        }

        parse_token_envelope(&response.body)
            .map_err(|message| RefreshError::MalformedResponse { message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rotated_pair() {
        let tokens =
            parse_token_envelope(br#"{"accessToken":"a2","refreshToken":"r2"}"#).unwrap();
        assert_eq!(tokens.access_token.expose(), "a2");
        assert_eq!(tokens.refresh_token.unwrap().expose(), "r2");
    }

    #[test]
    fn test_parse_without_rotation() {
        let tokens = parse_token_envelope(br#"{"accessToken":"a2"}"#).unwrap();
        assert!(tokens.refresh_token.is_none());

        let tokens = parse_token_envelope(br#"{"accessToken":"a2","refreshToken":""}"#).unwrap();
        assert!(tokens.refresh_token.is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_bodies() {
        assert!(parse_token_envelope(b"").is_err());
        assert!(parse_token_envelope(b"<html>ok</html>").is_err());
        assert!(parse_token_envelope(br#"{"message":"ok"}"#).is_err());
        assert!(parse_token_envelope(br#"{"accessToken":""}"#).is_err());
        assert!(parse_token_envelope(br#"{"accessToken":42}"#).is_err());
        assert!(parse_token_envelope(br#"{"error":"invalid_grant"}"#).is_err());
    }

    #[test]
    fn test_into_pair_keeps_previous_refresh_token() {
        let tokens = RefreshedTokens {
            access_token: Secret::new("a2"),
            refresh_token: None,
        };
        let pair = tokens.into_pair(Secret::new("r1"));
        assert_eq!(pair.access_token.expose(), "a2");
        assert_eq!(pair.refresh_token.expose(), "r1");
    }
}
