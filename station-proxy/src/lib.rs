//! # station-proxy
//!
//! A backend-for-frontend that keeps OAuth tokens out of the browser.
//!
//! The proxy runs the authorization-code flow against the identity provider,
//! keeps the resulting tokens in HTTP-only cookies, refreshes expired access
//! tokens on the fly and forwards reads to the resource API. It also records a
//! per-user "station" on/off flag.
//!
//! ## Features
//!
//! - **Login flow**: login, callback with CSRF state check, logout
//! - **Cookie sessions**: plain or encrypted cookie values, no server-side session table
//! - **Transparent refresh**: stale access tokens are renewed before proxying
//! - **Pluggable seams**: token endpoint, resource API and station store are traits
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use station_proxy::{ApiGateway, AppConfig, OAuthClient, ProxyServer, SqliteStationStore};
//!
//! # async fn example() -> station_proxy::Result<()> {
//! let config = AppConfig::load("config.json")?;
//! let credentials = config.credentials()?;
//! let client_id = credentials.client_id.clone();
//!
//! let proxy = ProxyServer::builder()
//!     .token_endpoint(Arc::new(OAuthClient::from_config(&config, credentials)?))
//!     .resource_api(Arc::new(ApiGateway::from_config(&config)?))
//!     .station_store(Arc::new(SqliteStationStore::connect(&config.path).await?))
//!     .client_id(client_id)
//!     .config(config)
//!     .build()?;
//!
//! let app = proxy.router();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod cookies;
pub mod error;
pub mod gateway;
pub mod server;
pub mod session;
pub mod store;
pub mod token;

pub use config::{AppConfig, ClientCredentials};
pub use cookies::{CookieStore, SessionCookies};
pub use error::{Error, Result};
pub use gateway::{ApiGateway, ResourceApi, UpstreamResponse, UserProfile};
pub use server::{ProxyServer, ProxyServerBuilder, StationStatus};
pub use session::{CallbackParams, SessionManager, SessionState};
pub use store::{MemoryStationStore, SqliteStationStore, StationStore};
pub use token::{OAuthClient, OAuthToken, TokenEndpoint};
