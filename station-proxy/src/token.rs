use crate::config::{AppConfig, ClientCredentials};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Longest access token lifetime accepted from the provider, in seconds
pub const MAX_EXPIRES_IN: i64 = 366 * 24 * 60 * 60;

/// Token set returned by the identity provider's token endpoint.
///
/// Unknown fields are ignored; `access_token` and `expires_in` are required.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    /// Absent on refresh responses that do not rotate the refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl OAuthToken {
    /// Access token lifetime, rejecting values that are not positive or
    /// exceed [`MAX_EXPIRES_IN`].
    pub fn lifetime(&self) -> Result<chrono::Duration> {
        Some(self.expires_in)
            .filter(|secs| (1..=MAX_EXPIRES_IN).contains(secs))
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| Error::UpstreamAuth(format!("invalid expires_in: {}", self.expires_in)))
    }
}

/// Grants against the identity provider's token endpoint.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange an authorization code for a token set
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<OAuthToken>;

    /// Obtain a fresh access token with a refresh token
    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthToken>;
}

/// Build the provider's authorize URL for the authorization-code flow.
///
/// Scopes are joined with `%20`. No network access.
pub fn authorization_url(
    authorize_url: &Url,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
) -> Url {
    let scope = scopes
        .iter()
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("%20");

    let query = format!(
        "client_id={}&response_type=code&redirect_uri={}&scope={}&state={}",
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        scope,
        urlencoding::encode(state),
    );

    let mut url = authorize_url.clone();
    url.set_query(Some(&query));
    url
}

/// HTTP client for the token endpoint.
///
/// Authenticates with HTTP Basic (`client_id:client_secret`) and posts
/// form-encoded grants.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    token_url: Url,
    credentials: ClientCredentials,
}

impl OAuthClient {
    pub fn new(token_url: Url, credentials: ClientCredentials, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http,
            token_url,
            credentials,
        })
    }

    pub fn from_config(config: &AppConfig, credentials: ClientCredentials) -> Result<Self> {
        Self::new(
            config.auth.token_url.clone(),
            credentials,
            config.request_timeout(),
        )
    }

    pub fn client_id(&self) -> &str {
        &self.credentials.client_id
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<OAuthToken> {
        let response = self
            .http
            .post(self.token_url.clone())
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("token endpoint unreachable: {}", e);
                Error::UpstreamAuth(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!("token endpoint returned {}", status);
            return Err(Error::UpstreamAuth(status.to_string()));
        }

        let token = response.json::<OAuthToken>().await.map_err(|e| {
            tracing::error!("failed to decode token response: {}", e);
            Error::UpstreamAuth(format!("invalid token response: {}", e))
        })?;

        token.lifetime().inspect_err(|e| {
            tracing::error!("rejecting token response: {}", e);
        })?;
        Ok(token)
    }
}

#[async_trait]
impl TokenEndpoint for OAuthClient {
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<OAuthToken> {
        tracing::debug!("exchanging authorization code");
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthToken> {
        tracing::debug!("refreshing access token");
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_url_is_deterministic() {
        let authorize = Url::parse("https://accounts.example/authorize").unwrap();
        let scopes = vec!["user-read-email".to_string(), "user-follow-read".to_string()];

        let url = authorization_url(
            &authorize,
            "client-1",
            "http://localhost:3000/auth/callback",
            &scopes,
            "s-t_ate",
        );

        assert_eq!(
            url.as_str(),
            "https://accounts.example/authorize?client_id=client-1&response_type=code\
             &redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fauth%2Fcallback\
             &scope=user-read-email%20user-follow-read&state=s-t_ate"
        );
        assert_eq!(
            url,
            authorization_url(
                &authorize,
                "client-1",
                "http://localhost:3000/auth/callback",
                &scopes,
                "s-t_ate",
            )
        );
    }

    #[test]
    fn scope_decodes_to_space_separated_list() {
        let authorize = Url::parse("https://accounts.example/authorize").unwrap();
        let scopes = vec!["a".to_string(), "b".to_string()];
        let url = authorization_url(&authorize, "id", "https://app/cb", &scopes, "xyz");

        let scope = url
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.into_owned());
        assert_eq!(scope.as_deref(), Some("a b"));
    }

    #[test]
    fn token_decoding_is_tolerant_but_strict_on_required_fields() {
        let token: OAuthToken = serde_json::from_str(
            r#"{"access_token":"AT","expires_in":3600,"extra":{"nested":true}}"#,
        )
        .unwrap();
        assert_eq!(token.access_token, "AT");
        assert_eq!(token.refresh_token, None);
        assert_eq!(token.token_type, "");

        assert!(serde_json::from_str::<OAuthToken>(r#"{"access_token":"AT"}"#).is_err());
        assert!(serde_json::from_str::<OAuthToken>(r#"{"expires_in":3600}"#).is_err());
    }

    #[test]
    fn lifetime_must_be_positive_and_bounded() {
        let with_expiry = |expires_in| OAuthToken {
            access_token: "AT".into(),
            token_type: String::new(),
            scope: String::new(),
            expires_in,
            refresh_token: None,
        };

        assert_eq!(
            with_expiry(3600).lifetime().unwrap(),
            chrono::Duration::seconds(3600)
        );
        assert!(with_expiry(MAX_EXPIRES_IN).lifetime().is_ok());

        for bad in [0, -1, MAX_EXPIRES_IN + 1, i64::MAX / 1000, i64::MAX, i64::MIN] {
            assert!(
                matches!(with_expiry(bad).lifetime(), Err(Error::UpstreamAuth(_))),
                "{bad} accepted"
            );
        }
    }
}
