use crate::config::AppConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Status, content type and body of an upstream response, untouched.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let content_type = self
            .content_type
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));

        Response::builder()
            .status(self.status)
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(self.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

/// Authenticated reads against the upstream resource API.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// GET `endpoint` (relative to the API base) with a bearer token.
    ///
    /// A 401 is reported as [`Error::UpstreamRejected`]; every other status
    /// is returned as-is.
    async fn get(&self, endpoint: &str, access_token: &str) -> Result<UpstreamResponse>;
}

/// The subset of the `/me` profile the proxy relies on.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub id: String,
}

/// Fetch the caller's profile from `/me`.
pub async fn fetch_profile<R>(api: &R, access_token: &str) -> Result<UserProfile>
where
    R: ResourceApi + ?Sized,
{
    let response = api.get("/me", access_token).await?;
    if !response.status.is_success() {
        tracing::error!("profile request returned {}", response.status);
        return Err(Error::UpstreamUnavailable(format!(
            "profile request returned {}",
            response.status
        )));
    }

    serde_json::from_slice(&response.body)
        .map_err(|e| Error::UpstreamUnavailable(format!("invalid profile response: {}", e)))
}

/// Forwards GET requests to the resource API. No caching, no retries.
#[derive(Clone)]
pub struct ApiGateway {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiGateway {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build http client: {}", e)))?;

        Ok(Self { http, base_url })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(config.api_url.clone(), config.request_timeout())
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ResourceApi for ApiGateway {
    async fn get(&self, endpoint: &str, access_token: &str) -> Result<UpstreamResponse> {
        let url = self.endpoint_url(endpoint);
        tracing::debug!("proxying GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("upstream request to {} failed: {}", url, e);
                Error::UpstreamUnavailable(e.to_string())
            })?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("upstream rejected access token for {}", endpoint);
            return Err(Error::UpstreamRejected);
        }

        let content_type = resp.headers().get(CONTENT_TYPE).cloned();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}
