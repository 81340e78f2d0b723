#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, Request, Response, StatusCode, header::SET_COOKIE};
use cookie::Cookie;
use station_proxy::{
    AppConfig, CookieStore, Error, MemoryStationStore, OAuthToken, ProxyServer, ResourceApi,
    Result, TokenEndpoint, UpstreamResponse,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

pub const CLIENT_ID: &str = "client-1";

pub fn token(access: &str, refresh: Option<&str>, expires_in: i64) -> OAuthToken {
    OAuthToken {
        access_token: access.to_string(),
        token_type: "Bearer".to_string(),
        scope: String::new(),
        expires_in,
        refresh_token: refresh.map(String::from),
    }
}

/// Token endpoint that hands out canned tokens and counts calls.
#[derive(Default)]
pub struct MockTokenEndpoint {
    pub exchanges: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub codes: Mutex<Vec<String>>,
    pub refresh_tokens_seen: Mutex<Vec<String>>,
    pub exchange_response: Mutex<Option<OAuthToken>>,
    pub refresh_response: Mutex<Option<OAuthToken>>,
}

impl MockTokenEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_exchange(self, token: OAuthToken) -> Self {
        *self.exchange_response.lock().unwrap() = Some(token);
        self
    }

    pub fn on_refresh(self, token: OAuthToken) -> Self {
        *self.refresh_response.lock().unwrap() = Some(token);
        self
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenEndpoint for MockTokenEndpoint {
    async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> Result<OAuthToken> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        self.codes.lock().unwrap().push(code.to_string());
        self.exchange_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::UpstreamAuth("400 Bad Request".to_string()))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthToken> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens_seen
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        self.refresh_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::UpstreamAuth("400 Bad Request".to_string()))
    }
}

/// Resource API that answers `/me` with a fixed profile and records the
/// bearer tokens it was given. The token `REVOKED` is rejected.
pub struct MockResourceApi {
    pub user_id: String,
    pub tokens_seen: Mutex<Vec<String>>,
}

impl MockResourceApi {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            tokens_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceApi for MockResourceApi {
    async fn get(&self, endpoint: &str, access_token: &str) -> Result<UpstreamResponse> {
        self.tokens_seen
            .lock()
            .unwrap()
            .push(access_token.to_string());

        if access_token == "REVOKED" {
            return Err(Error::UpstreamRejected);
        }

        let (status, body) = match endpoint {
            "/me" => (
                StatusCode::OK,
                serde_json::json!({ "id": self.user_id, "display_name": "Test User" }).to_string(),
            ),
            _ => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": "not found" }).to_string(),
            ),
        };

        Ok(UpstreamResponse {
            status,
            content_type: Some(HeaderValue::from_static("application/json")),
            body: Bytes::from(body),
        })
    }
}

pub fn test_config() -> AppConfig {
    AppConfig::default()
        .with_authorize_url(Url::parse("https://idp.example/authorize").unwrap())
        .with_token_url(Url::parse("https://idp.example/token").unwrap())
        .with_redirect(Url::parse("http://localhost:3000/auth/callback").unwrap())
        .with_app_url(Url::parse("http://app.example/").unwrap())
        .with_scopes(vec!["user-read-email".to_string()])
        .with_encrypted_cookies(false)
}

pub type TestServer = ProxyServer<MockTokenEndpoint, MockResourceApi, MemoryStationStore>;

pub struct Harness {
    pub server: TestServer,
    pub tokens: Arc<MockTokenEndpoint>,
    pub api: Arc<MockResourceApi>,
    pub stations: Arc<MemoryStationStore>,
}

/// Route library logs to the test writer. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "station_proxy=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn harness(tokens: MockTokenEndpoint) -> Harness {
    harness_with(tokens, CookieStore::plain(false))
}

pub fn harness_with(tokens: MockTokenEndpoint, cookie_store: CookieStore) -> Harness {
    init_tracing();

    let tokens = Arc::new(tokens);
    let api = Arc::new(MockResourceApi::new("alice"));
    let stations = Arc::new(MemoryStationStore::new());

    let server = ProxyServer::builder()
        .config(test_config())
        .client_id(CLIENT_ID)
        .cookie_store(cookie_store)
        .token_endpoint(tokens.clone())
        .resource_api(api.clone())
        .station_store(stations.clone())
        .build()
        .unwrap();

    Harness {
        server,
        tokens,
        api,
        stations,
    }
}

pub fn request(method: &str, uri: &str, cookies: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if !cookies.is_empty() {
        let header = cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        builder = builder.header("cookie", header);
    }
    builder.body(Body::empty()).unwrap()
}

/// Parse every `Set-Cookie` header of a response, keyed by cookie name.
pub fn set_cookies(response: &Response<Body>) -> HashMap<String, Cookie<'static>> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|raw| Cookie::parse(raw.to_string()).ok())
        .map(|cookie| (cookie.name().to_string(), cookie))
        .collect()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
