use miette::{Context, IntoDiagnostic, Result};
use station_proxy::{ApiGateway, AppConfig, CookieStore, OAuthClient, ProxyServer, SqliteStationStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const DEFAULT_CONFIG_PATH: &str = "./config.json";

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=info,station_proxy=info,tower_http=info".into()),
        )
        .init();

    let config_path =
        std::env::var("STATION_PROXY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load(&config_path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to load config from {}", config_path))?;

    let credentials = config
        .credentials()
        .into_diagnostic()
        .wrap_err("missing client credentials")?;
    let client_id = credentials.client_id.clone();

    let cookie_store = CookieStore::new(
        config.cookie_key().into_diagnostic()?,
        config.production,
    );
    if !cookie_store.is_encrypted() {
        tracing::warn!("cookie encryption disabled, tokens are stored in the clear");
    }

    let token_endpoint = OAuthClient::from_config(&config, credentials).into_diagnostic()?;
    let resource_api = ApiGateway::from_config(&config).into_diagnostic()?;
    let station_store = SqliteStationStore::connect(&config.path)
        .await
        .into_diagnostic()
        .wrap_err("failed to open station database")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let proxy = ProxyServer::builder()
        .client_id(client_id)
        .cookie_store(cookie_store)
        .token_endpoint(Arc::new(token_endpoint))
        .resource_api(Arc::new(resource_api))
        .station_store(Arc::new(station_store))
        .config(config)
        .build()
        .into_diagnostic()
        .wrap_err("failed to build proxy server")?;

    let app = proxy.router().layer(TraceLayer::new_for_http());

    tracing::info!("station proxy listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()
        .wrap_err("failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()
        .wrap_err("server error")?;

    Ok(())
}
