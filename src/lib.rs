pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod issuer;
pub mod jwt;
pub mod notify;
pub mod secret;
pub mod service;
pub mod store;

use api::create_api_router;
use axum::Router;
use db::Database;
use issuer::{Issuer, IssuerConfig};
use notify::{LogNotifier, Notifier, WebhookNotifier};
use secret::HashCost;
use service::AuthService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use url::Url;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing access tokens
    pub jwt_secret: Vec<u8>,
    /// Access token lifetime
    pub access_ttl: Duration,
    /// Argon2 cost for refresh secret hashes
    pub hash_cost: HashCost,
    /// Receives IP change notifications. Without it they are only logged.
    pub webhook_url: Option<Url>,
    /// IP extraction strategy (requires running behind a proxy)
    pub ip_extractor: Option<cli::IpExtractor>,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("token issuer: {0}")]
    Token(#[from] jwt::TokenError),
    #[error("webhook client: {0}")]
    Webhook(#[from] reqwest::Error),
}

/// Wire the auth service to the database and the configured notifier.
pub fn build_service(config: &ServerConfig) -> Result<AuthService, StartupError> {
    let issuer = Issuer::new(&IssuerConfig {
        jwt_secret: config.jwt_secret.clone(),
        access_ttl: config.access_ttl,
        hash_cost: config.hash_cost,
    })?;

    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(url) => {
            info!(url = %url, "IP change notifications go to webhook");
            Arc::new(WebhookNotifier::new(url.clone())?)
        }
        None => Arc::new(LogNotifier),
    };

    Ok(AuthService::new(
        Arc::new(issuer),
        Arc::new(config.db.sessions()),
        Arc::new(config.db.users()),
        notifier,
    ))
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Result<Router, StartupError> {
    let service = build_service(config)?;
    Ok(create_api_router(service, config.ip_extractor.clone()))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config).map_err(std::io::Error::other)?;
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    init_cleanup(&config.db).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        run_server(config, listener).await.ok();
    });

    Ok((handle, local_addr))
}
