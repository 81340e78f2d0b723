//! Cookie-backed OAuth session lifecycle.
//!
//! No session object lives on the server: every request rebuilds its view of
//! the session from four cookies (CSRF state, access token, access token
//! expiry marker, refresh token) and writes back whatever changed.

use crate::config::{AppConfig, CookieNames};
use crate::cookies::SessionCookies;
use crate::error::{Error, Result};
use crate::token::{OAuthToken, TokenEndpoint, authorization_url};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use url::Url;

/// Random bytes in a CSRF state value
pub const STATE_BYTES: usize = 16;

/// Where a browser session stands, derived from its cookies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session cookies
    Anonymous,
    /// Login started, awaiting the provider callback
    PendingCallback,
    /// Unexpired access token available
    Authenticated,
    /// Access token stale or gone, refresh token available
    Expired,
}

/// Query parameters the provider appends to the redirect URI.
#[derive(Debug, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl CallbackParams {
    /// Parse a raw callback query. Unknown keys are ignored; a repeated
    /// `code`, `state` or `error` is an [`Error::InvalidRequest`].
    pub fn from_query(query: Option<&str>) -> Result<Self> {
        let mut params = Self::default();
        let raw = query.unwrap_or_default();

        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                _ => continue,
            };
            if slot.replace(value.into_owned()).is_some() {
                return Err(Error::InvalidRequest(format!("duplicate {} parameter", key)));
            }
        }

        Ok(params)
    }
}

/// Issues and verifies CSRF state, stores tokens in cookies and renews
/// expired access tokens.
pub struct SessionManager<T>
where
    T: TokenEndpoint,
{
    token_endpoint: Arc<T>,
    client_id: String,
    authorize_url: Url,
    redirect_uri: Url,
    scopes: Vec<String>,
    names: CookieNames,
    state_ttl: Duration,
    refresh_ttl: Duration,
}

impl<T> SessionManager<T>
where
    T: TokenEndpoint,
{
    pub fn new(config: &AppConfig, client_id: impl Into<String>, token_endpoint: Arc<T>) -> Self {
        Self {
            token_endpoint,
            client_id: client_id.into(),
            authorize_url: config.auth.authorize_url.clone(),
            redirect_uri: config.auth.redirect.clone(),
            scopes: config.auth.scope.clone(),
            names: config.cookie.clone(),
            state_ttl: config.state_ttl(),
            refresh_ttl: config.refresh_ttl(),
        }
    }

    pub fn cookie_names(&self) -> &CookieNames {
        &self.names
    }

    pub fn state(&self, cookies: &SessionCookies) -> SessionState {
        if self.fresh_access_token(cookies, Utc::now()).is_some() {
            SessionState::Authenticated
        } else if cookies.get(&self.names.refresh_token).is_some() {
            SessionState::Expired
        } else if cookies.get(&self.names.auth_state).is_some() {
            SessionState::PendingCallback
        } else {
            SessionState::Anonymous
        }
    }

    /// Start a login: store a fresh CSRF state and return the provider URL
    /// to redirect the browser to.
    pub fn login(&self, cookies: &mut SessionCookies) -> Url {
        let state = generate_state();
        cookies.set(&self.names.auth_state, &state, Utc::now() + self.state_ttl);

        tracing::info!("starting login, redirecting to provider");
        authorization_url(
            &self.authorize_url,
            &self.client_id,
            self.redirect_uri.as_str(),
            &self.scopes,
            &state,
        )
    }

    /// Complete a login from the provider's redirect.
    ///
    /// The state cookie is consumed whatever the outcome. Token cookies are
    /// only written once the code exchange has succeeded.
    pub async fn callback(&self, cookies: &mut SessionCookies, params: &CallbackParams) -> Result<()> {
        let expected = cookies.get(&self.names.auth_state);
        self.discard_state(cookies);

        match (expected.as_deref(), params.state.as_deref()) {
            (Some(expected), Some(received)) if expected == received => {}
            _ => {
                tracing::warn!("callback state does not match the auth_state cookie");
                return Err(Error::CsrfMismatch);
            }
        }

        if let Some(error) = &params.error {
            tracing::warn!("provider denied authorization: {}", error);
            return Err(Error::UpstreamDenied(error.clone()));
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::InvalidRequest("missing code".to_string()))?;

        let token = self
            .token_endpoint
            .exchange_code(code, self.redirect_uri.as_str())
            .await?;

        let refresh_token = token
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::UpstreamAuth("token response missing refresh_token".into()))?;

        let now = Utc::now();
        let expires_at = access_expiry(&token, now)?;
        self.store_access_token(cookies, &token.access_token, expires_at, now);
        cookies.set(&self.names.refresh_token, refresh_token, now + self.refresh_ttl);

        tracing::info!("login complete, access token valid for {}s", token.expires_in);
        Ok(())
    }

    /// Return a usable access token, refreshing it when the cached one is
    /// stale. At most one refresh is attempted.
    pub async fn load_access_token(&self, cookies: &mut SessionCookies) -> Result<String> {
        let refresh_token = match self.state(cookies) {
            SessionState::Authenticated => {
                if let Some(token) = self.fresh_access_token(cookies, Utc::now()) {
                    return Ok(token);
                }
                cookies.get(&self.names.refresh_token)
            }
            SessionState::Expired => cookies.get(&self.names.refresh_token),
            state => {
                tracing::debug!("no usable session ({:?})", state);
                None
            }
        }
        .ok_or(Error::Unauthenticated)?;

        let token = self
            .token_endpoint
            .refresh_token(&refresh_token)
            .await
            .map_err(|e| {
                tracing::warn!("token refresh failed: {}", e);
                Error::Unauthenticated
            })?;

        let now = Utc::now();
        let expires_at = access_expiry(&token, now).map_err(|e| {
            tracing::warn!("refreshed token unusable: {}", e);
            Error::Unauthenticated
        })?;
        self.store_access_token(cookies, &token.access_token, expires_at, now);

        // Keep the old refresh token unless the provider rotated it
        if let Some(rotated) = token.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            tracing::debug!("provider rotated the refresh token");
            cookies.set(&self.names.refresh_token, rotated, now + self.refresh_ttl);
        }

        tracing::info!("access token refreshed");
        Ok(token.access_token)
    }

    /// Drop the CSRF state of a pending login.
    pub fn discard_state(&self, cookies: &mut SessionCookies) {
        cookies.clear(&self.names.auth_state);
    }

    /// Clear every session cookie. Safe to call without a session.
    pub fn logout(&self, cookies: &mut SessionCookies) {
        for name in [
            &self.names.auth_state,
            &self.names.access_token,
            &self.names.refresh_token,
            &self.names.token_expiry,
        ] {
            cookies.clear(name);
        }
        tracing::info!("session cookies cleared");
    }

    /// The access cookie counts only while the expiry marker lies in the future.
    fn fresh_access_token(&self, cookies: &SessionCookies, now: DateTime<Utc>) -> Option<String> {
        let token = cookies.get(&self.names.access_token)?;
        let expires_at = cookies
            .get(&self.names.token_expiry)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())?
            .with_timezone(&Utc);

        (expires_at > now).then_some(token)
    }

    fn store_access_token(
        &self,
        cookies: &mut SessionCookies,
        access_token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        cookies.set(&self.names.access_token, access_token, expires_at);
        cookies.set(
            &self.names.token_expiry,
            expires_at.to_rfc3339(),
            now + self.refresh_ttl,
        );
    }
}

fn access_expiry(token: &OAuthToken, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    now.checked_add_signed(token.lifetime()?)
        .ok_or_else(|| Error::UpstreamAuth("token expiry out of range".to_string()))
}

/// URL-safe random CSRF state value.
pub fn generate_state() -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let bytes: [u8; STATE_BYTES] = rng.r#gen();
    URL_SAFE_NO_PAD.encode(bytes)
}
