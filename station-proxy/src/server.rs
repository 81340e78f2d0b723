use crate::{
    config::AppConfig,
    cookies::{CookieStore, SessionCookies},
    error::{Error, Result},
    gateway::{ResourceApi, fetch_profile},
    session::{CallbackParams, SessionManager},
    store::StationStore,
    token::TokenEndpoint,
};
use axum::{
    Json, Router,
    extract::{RawQuery, State},
    http::{HeaderMap, Method, StatusCode, Uri, header::LOCATION},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Backend-for-frontend: owns the login flow and proxies API calls with the
/// session's access token.
pub struct ProxyServer<T, R, S>
where
    T: TokenEndpoint,
    R: ResourceApi,
    S: StationStore,
{
    config: Arc<AppConfig>,
    cookie_store: CookieStore,
    sessions: Arc<SessionManager<T>>,
    resource_api: Arc<R>,
    station_store: Arc<S>,
}

impl<T, R, S> Clone for ProxyServer<T, R, S>
where
    T: TokenEndpoint,
    R: ResourceApi,
    S: StationStore,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            cookie_store: self.cookie_store.clone(),
            sessions: self.sessions.clone(),
            resource_api: self.resource_api.clone(),
            station_store: self.station_store.clone(),
        }
    }
}

impl<T, R, S> ProxyServer<T, R, S>
where
    T: TokenEndpoint + 'static,
    R: ResourceApi + 'static,
    S: StationStore + 'static,
{
    pub fn builder() -> ProxyServerBuilder<T, R, S> {
        ProxyServerBuilder::default()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager<T> {
        &self.sessions
    }

    /// Create the axum router with all endpoints.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/auth/login",
                get(handle_login::<T, R, S>).fallback(handle_unsupported_method),
            )
            .route(
                "/auth/logout",
                get(handle_logout::<T, R, S>).fallback(handle_unsupported_method),
            )
            .route(
                "/auth/callback",
                get(handle_callback::<T, R, S>).fallback(handle_unsupported_method),
            )
            .route("/me", get(handle_me::<T, R, S>).fallback(handle_unsupported_method))
            .route(
                "/station",
                get(handle_station_status::<T, R, S>)
                    .post(handle_station_on::<T, R, S>)
                    .delete(handle_station_off::<T, R, S>)
                    .fallback(handle_unsupported_method),
            )
            .fallback(handle_not_found)
            .with_state(self.clone())
    }

    async fn toggle_station(&self, cookies: &mut SessionCookies, active: bool) -> Result<StationStatus> {
        let access_token = self.sessions.load_access_token(cookies).await?;
        let profile = fetch_profile(self.resource_api.as_ref(), &access_token).await?;

        if active {
            self.station_store.turn_on(&profile.id).await?;
        } else {
            self.station_store.turn_off(&profile.id).await?;
        }

        Ok(StationStatus { active })
    }
}

/// Body of every `/station` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationStatus {
    pub active: bool,
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

// Handlers

async fn handle_login<T, R, S>(
    State(server): State<ProxyServer<T, R, S>>,
    headers: HeaderMap,
) -> Response
where
    T: TokenEndpoint + 'static,
    R: ResourceApi + 'static,
    S: StationStore + 'static,
{
    let mut cookies = server.cookie_store.load(&headers);
    let authorize_url = server.sessions.login(&mut cookies);

    (cookies, found(authorize_url.as_str())).into_response()
}

async fn handle_logout<T, R, S>(
    State(server): State<ProxyServer<T, R, S>>,
    headers: HeaderMap,
) -> Response
where
    T: TokenEndpoint + 'static,
    R: ResourceApi + 'static,
    S: StationStore + 'static,
{
    let mut cookies = server.cookie_store.load(&headers);
    server.sessions.logout(&mut cookies);

    (cookies, found(server.config.app_url.as_str())).into_response()
}

async fn handle_callback<T, R, S>(
    State(server): State<ProxyServer<T, R, S>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response
where
    T: TokenEndpoint + 'static,
    R: ResourceApi + 'static,
    S: StationStore + 'static,
{
    tracing::info!("handling auth callback");

    let mut cookies = server.cookie_store.load(&headers);
    let result = match CallbackParams::from_query(query.as_deref()) {
        Ok(params) => server.sessions.callback(&mut cookies, &params).await,
        Err(e) => {
            server.sessions.discard_state(&mut cookies);
            Err(e)
        }
    };

    match result {
        Ok(()) => (cookies, found(server.config.app_url.as_str())).into_response(),
        Err(e) => {
            tracing::warn!("auth callback failed: {}", e);
            (cookies, e).into_response()
        }
    }
}

async fn handle_me<T, R, S>(
    State(server): State<ProxyServer<T, R, S>>,
    headers: HeaderMap,
) -> Response
where
    T: TokenEndpoint + 'static,
    R: ResourceApi + 'static,
    S: StationStore + 'static,
{
    let mut cookies = server.cookie_store.load(&headers);
    let result = match server.sessions.load_access_token(&mut cookies).await {
        Ok(access_token) => server.resource_api.get("/me", &access_token).await,
        Err(e) => Err(e),
    };

    (cookies, result).into_response()
}

async fn handle_station_status<T, R, S>(
    State(server): State<ProxyServer<T, R, S>>,
    RawQuery(query): RawQuery,
) -> Result<Json<StationStatus>>
where
    T: TokenEndpoint + 'static,
    R: ResourceApi + 'static,
    S: StationStore + 'static,
{
    let user_id = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .find(|(key, _)| key == "id")
        .map(|(_, id)| id.into_owned())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::InvalidRequest("missing id".to_string()))?;

    let active = server.station_store.status(&user_id).await?;
    Ok(Json(StationStatus { active }))
}

async fn handle_station_on<T, R, S>(
    State(server): State<ProxyServer<T, R, S>>,
    headers: HeaderMap,
) -> Response
where
    T: TokenEndpoint + 'static,
    R: ResourceApi + 'static,
    S: StationStore + 'static,
{
    let mut cookies = server.cookie_store.load(&headers);
    let result = server.toggle_station(&mut cookies, true).await.map(Json);

    (cookies, result).into_response()
}

async fn handle_station_off<T, R, S>(
    State(server): State<ProxyServer<T, R, S>>,
    headers: HeaderMap,
) -> Response
where
    T: TokenEndpoint + 'static,
    R: ResourceApi + 'static,
    S: StationStore + 'static,
{
    let mut cookies = server.cookie_store.load(&headers);
    let result = server.toggle_station(&mut cookies, false).await.map(Json);

    (cookies, result).into_response()
}

async fn handle_unsupported_method(method: Method) -> Error {
    tracing::warn!("rejecting unsupported method {}", method);
    Error::InvalidRequest(format!("unsupported method {}", method))
}

async fn handle_not_found(uri: Uri) -> Error {
    Error::NotFound(uri.path().to_string())
}

// Builder for ProxyServer.
pub struct ProxyServerBuilder<T, R, S>
where
    T: TokenEndpoint,
    R: ResourceApi,
    S: StationStore,
{
    config: Option<AppConfig>,
    client_id: Option<String>,
    cookie_store: Option<CookieStore>,
    token_endpoint: Option<Arc<T>>,
    resource_api: Option<Arc<R>>,
    station_store: Option<Arc<S>>,
}

impl<T, R, S> Default for ProxyServerBuilder<T, R, S>
where
    T: TokenEndpoint,
    R: ResourceApi,
    S: StationStore,
{
    fn default() -> Self {
        Self {
            config: None,
            client_id: None,
            cookie_store: None,
            token_endpoint: None,
            resource_api: None,
            station_store: None,
        }
    }
}

impl<T, R, S> ProxyServerBuilder<T, R, S>
where
    T: TokenEndpoint + 'static,
    R: ResourceApi + 'static,
    S: StationStore + 'static,
{
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Defaults to a store keyed from the environment, see [`AppConfig::cookie_key`].
    pub fn cookie_store(mut self, store: CookieStore) -> Self {
        self.cookie_store = Some(store);
        self
    }

    pub fn token_endpoint(mut self, endpoint: Arc<T>) -> Self {
        self.token_endpoint = Some(endpoint);
        self
    }

    pub fn resource_api(mut self, api: Arc<R>) -> Self {
        self.resource_api = Some(api);
        self
    }

    pub fn station_store(mut self, store: Arc<S>) -> Self {
        self.station_store = Some(store);
        self
    }

    pub fn build(self) -> Result<ProxyServer<T, R, S>> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("config required".to_string()))?;
        config.validate()?;
        let client_id = self
            .client_id
            .ok_or_else(|| Error::Config("client_id required".to_string()))?;
        let token_endpoint = self
            .token_endpoint
            .ok_or_else(|| Error::Config("token_endpoint required".to_string()))?;
        let resource_api = self
            .resource_api
            .ok_or_else(|| Error::Config("resource_api required".to_string()))?;
        let station_store = self
            .station_store
            .ok_or_else(|| Error::Config("station_store required".to_string()))?;

        let cookie_store = match self.cookie_store {
            Some(store) => store,
            None => CookieStore::new(config.cookie_key()?, config.production),
        };

        let sessions = Arc::new(SessionManager::new(&config, client_id, token_endpoint));

        Ok(ProxyServer {
            config: Arc::new(config),
            cookie_store,
            sessions,
            resource_api,
            station_store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{gateway::ApiGateway, store::MemoryStationStore, token::OAuthClient};

    type Server = ProxyServer<OAuthClient, ApiGateway, MemoryStationStore>;

    #[test]
    fn builder_requires_every_component() {
        let err = Server::builder().build().err().unwrap();
        assert!(matches!(err, Error::Config(_)));

        let err = Server::builder()
            .config(AppConfig::default())
            .client_id("client-1")
            .station_store(Arc::new(MemoryStationStore::new()))
            .build()
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "config error: token_endpoint required");
    }
}
