//! Request envelopes and responses exchanged with the transport.
//!
//! A [`RequestEnvelope`] captures everything needed to send a request and to
//! replay it once after a token refresh. It never holds credentials; the
//! access token is handed to the transport separately at send time.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::fmt;
use uuid::Uuid;

/// Which flow a request belongs to.
///
/// Only [`RequestKind::Regular`] requests may trigger or join a refresh
/// cycle. A 401 on a login or refresh request fails directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestKind {
    /// Ordinary API call.
    #[default]
    Regular,
    /// Part of the login flow.
    Login,
    /// The refresh call itself.
    Refresh,
}

impl RequestKind {
    /// Whether a 401 on this request may be recovered by refreshing.
    pub fn enters_refresh_cycle(&self) -> bool {
        matches!(self, Self::Regular)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular => write!(f, "regular"),
            Self::Login => write!(f, "login"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

/// A request that can be sent, and replayed exactly once.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    /// Correlation id for logs.
    pub id: Uuid,

    /// HTTP method.
    pub method: Method,

    /// Path relative to the configured base URL (e.g. `patients/42`).
    pub path: String,

    /// Query string pairs.
    pub query: Vec<(String, String)>,

    /// Extra headers. `Authorization` is set by the transport.
    pub headers: HeaderMap,

    /// JSON body, if any.
    pub body: Option<serde_json::Value>,

    /// Flow this request belongs to.
    pub kind: RequestKind,

    /// Set once the request has been replayed after a refresh.
    pub retried: bool,
}

impl RequestEnvelope {
    /// Create a request with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            kind: RequestKind::Regular,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize a value as the JSON body.
    pub fn with_json<T: Serialize>(self, body: &T) -> Result<Self, serde_json::Error> {
        Ok(self.with_body(serde_json::to_value(body)?))
    }

    /// Append a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set an extra header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Mark the flow this request belongs to.
    pub fn with_kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A response as returned by the transport.
///
/// Every HTTP status is a response; only failures to exchange a request at
/// all are transport errors.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
