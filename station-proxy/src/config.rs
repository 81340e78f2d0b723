use crate::error::{Error, Result};
use cookie::Key;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Upper bound for `stateTtlSecs`
pub const MAX_STATE_TTL_SECS: i64 = 24 * 60 * 60;

/// Upper bound for `refreshTtlDays`
pub const MAX_REFRESH_TTL_DAYS: i64 = 10 * 365;

/// Configuration for the proxy, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Identity provider settings
    pub auth: AuthConfig,

    /// Names of the environment variables holding secrets
    pub env: EnvNames,

    /// Session cookie names
    pub cookie: CookieNames,

    /// Base URL of the upstream resource API
    #[serde(rename = "apiURL")]
    pub api_url: Url,

    /// Front-end home, target of the post-login and post-logout redirects
    #[serde(rename = "appURL")]
    pub app_url: Url,

    /// Station database location
    pub path: String,

    pub port: u16,

    /// Marks cookies `Secure`
    pub production: bool,

    /// Encrypt cookie values with the cookie key
    pub encrypt_cookies: bool,

    /// Timeout applied to every outbound request, in seconds
    pub request_timeout_secs: u64,

    /// Lifetime of the CSRF state cookie, in seconds
    pub state_ttl_secs: i64,

    /// Lifetime of the refresh token and expiry marker cookies, in days
    pub refresh_ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(rename = "authorizeURL")]
    pub authorize_url: Url,
    #[serde(rename = "tokenURL")]
    pub token_url: Url,
    pub redirect: Url,
    pub scope: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvNames {
    pub client_id: String,
    pub client_secret: String,
    pub cookie_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CookieNames {
    pub auth_state: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expiry: String,
}

/// OAuth client credentials resolved from the environment.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            env: EnvNames::default(),
            cookie: CookieNames::default(),
            api_url: Url::parse("https://api.spotify.com/v1").expect("valid url"),
            app_url: Url::parse("http://localhost:8080").expect("valid url"),
            path: "sqlite:stations.db".to_string(),
            port: 3000,
            production: false,
            encrypt_cookies: true,
            request_timeout_secs: 10,
            state_ttl_secs: 3600,
            refresh_ttl_days: 365,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authorize_url: Url::parse("https://accounts.spotify.com/authorize").expect("valid url"),
            token_url: Url::parse("https://accounts.spotify.com/api/token").expect("valid url"),
            redirect: Url::parse("http://localhost:3000/auth/callback").expect("valid url"),
            scope: [
                "user-modify-playback-state",
                "user-read-currently-playing",
                "user-read-playback-state",
                "user-read-recently-played",
                "user-follow-read",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl Default for EnvNames {
    fn default() -> Self {
        Self {
            client_id: "SPOTIFY_CLIENT_ID".into(),
            client_secret: "SPOTIFY_CLIENT_SECRET".into(),
            cookie_key: "COOKIE_KEY".into(),
        }
    }
}

impl Default for CookieNames {
    fn default() -> Self {
        Self {
            auth_state: "auth_state".into(),
            access_token: "access_token".into(),
            refresh_token: "refresh_token".into(),
            token_expiry: "token_expiry".into(),
        }
    }
}

impl AppConfig {
    /// Read a JSON config file. Missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the numeric settings are in range.
    pub fn validate(&self) -> Result<()> {
        let check = |name: &str, value: i64, max: i64| {
            if (1..=max).contains(&value) {
                Ok(())
            } else {
                Err(Error::Config(format!("{} must be between 1 and {}, got {}", name, max, value)))
            }
        };

        check("stateTtlSecs", self.state_ttl_secs, MAX_STATE_TTL_SECS)?;
        check("refreshTtlDays", self.refresh_ttl_days, MAX_REFRESH_TTL_DAYS)?;
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("requestTimeoutSecs must be positive".to_string()));
        }
        Ok(())
    }

    /// Lifetime of the CSRF state cookie, clamped to the accepted range.
    pub fn state_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.state_ttl_secs.clamp(1, MAX_STATE_TTL_SECS))
    }

    /// Lifetime of the refresh token and expiry marker cookies, clamped to
    /// the accepted range.
    pub fn refresh_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.refresh_ttl_days.clamp(1, MAX_REFRESH_TTL_DAYS))
    }

    /// Resolve client credentials from the process environment.
    pub fn credentials(&self) -> Result<ClientCredentials> {
        self.credentials_with(|name| std::env::var(name).ok())
    }

    pub fn credentials_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ClientCredentials> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::Config(format!("{} is required", name)))
        };

        Ok(ClientCredentials {
            client_id: required(&self.env.client_id)?,
            client_secret: required(&self.env.client_secret)?,
        })
    }

    /// Resolve the cookie encryption key from the process environment.
    pub fn cookie_key(&self) -> Result<Option<Key>> {
        self.cookie_key_with(|name| std::env::var(name).ok())
    }

    /// Returns `None` when cookie encryption is disabled. Without a configured
    /// key an ephemeral one is generated, so sessions end on restart.
    pub fn cookie_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Key>> {
        if !self.encrypt_cookies {
            return Ok(None);
        }

        match lookup(&self.env.cookie_key) {
            Some(raw) => Key::try_from(raw.as_bytes()).map(Some).map_err(|_| {
                Error::Config(format!(
                    "{} is set but invalid (must be at least 64 bytes)",
                    self.env.cookie_key
                ))
            }),
            None => {
                tracing::warn!(
                    "{} not set, generating ephemeral cookie key",
                    self.env.cookie_key
                );
                Ok(Some(Key::generate()))
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn with_api_url(mut self, url: Url) -> Self {
        self.api_url = url;
        self
    }

    pub fn with_app_url(mut self, url: Url) -> Self {
        self.app_url = url;
        self
    }

    pub fn with_authorize_url(mut self, url: Url) -> Self {
        self.auth.authorize_url = url;
        self
    }

    pub fn with_token_url(mut self, url: Url) -> Self {
        self.auth.token_url = url;
        self
    }

    pub fn with_redirect(mut self, url: Url) -> Self {
        self.auth.redirect = url;
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.auth.scope = scopes;
        self
    }

    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    pub fn with_encrypted_cookies(mut self, encrypt: bool) -> Self {
        self.encrypt_cookies = encrypt;
        self
    }
}
