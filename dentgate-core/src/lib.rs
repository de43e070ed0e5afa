//! # Dentgate Core
//!
//! Authenticated HTTP access to the dentgate clinic API.
//!
//! This crate provides:
//! - A credential store abstraction with memory, file and keyring backends
//! - A transport primitive over `reqwest`
//! - A refresh invoker for the `auth/refresh` endpoint
//! - A single-flight refresh coordinator that refreshes once for any number
//!   of concurrent 401s and replays every affected request
//! - [`AuthGateway`], the entry point tying these together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dentgate_core::{AuthGateway, GatewayConfig, RequestEnvelope, create_store, StoreBackend};
//!
//! async fn list_patients() -> Result<String, Box<dyn std::error::Error>> {
//!     let store = create_store(StoreBackend::File, None)?;
//!     let gateway = AuthGateway::new(GatewayConfig::default(), store)?;
//!     let response = gateway.authorized_request(RequestEnvelope::get("patients")).await?;
//!     Ok(response.text().into_owned())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod gateway;
pub mod refresh;
pub mod request;
pub mod store;
pub mod transport;

// Re-export commonly used types at crate root
pub use config::{ConfigError, GatewayConfig};

pub use coordinator::{AuthError, RefreshCoordinator, RefreshOutcome, Renewal};

pub use gateway::{AuthGateway, GatewayError};

pub use refresh::{HttpRefreshInvoker, RefreshError, RefreshInvoker, RefreshedTokens};

pub use request::{ApiResponse, RequestEnvelope, RequestKind};

pub use store::{
    CredentialPair,
    CredentialStore,
    FileStore,
    MemoryStore,
    Secret,
    StoreBackend,
    StoreError,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use transport::{ReqwestTransport, Transport, TransportError};

pub use reqwest::{Method, StatusCode};
