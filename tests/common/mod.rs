#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use guidauth::{
    ServerConfig,
    cli::{ClientIpHeader, IpExtractor},
    create_app,
    db::Database,
    issuer::{Issuer, IssuerConfig, TokenIssuer},
    jwt::{JwtConfig, SessionClaims, TokenError},
    notify::{IpChangeEvent, Notifier},
    secret::{HashCost, RefreshSecret},
    service::AuthService,
    store::{MemorySessionStore, MemoryUserDirectory},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const JWT_SECRET: &[u8] = b"integration-test-secret-of-32-bytes!";
pub const USER_AGENT: &str = "guidauth-tests/1.0";
pub const CLIENT_IP: &str = "203.0.113.7";

/// Cheap argon2 parameters so tests stay fast.
pub fn test_hash_cost() -> HashCost {
    HashCost {
        memory_kib: 256,
        iterations: 1,
        parallelism: 1,
    }
}

pub fn test_issuer() -> Issuer {
    issuer_with_secret(JWT_SECRET)
}

pub fn issuer_with_secret(secret: &[u8]) -> Issuer {
    Issuer::new(&IssuerConfig {
        jwt_secret: secret.to_vec(),
        access_ttl: Duration::from_secs(60),
        hash_cost: test_hash_cost(),
    })
    .expect("Failed to build issuer")
}

pub fn test_jwt() -> JwtConfig {
    JwtConfig::new(JWT_SECRET, Duration::from_secs(60))
}

/// Issuer whose hashing backend is down. Everything else works.
pub struct BrokenHashIssuer(pub Issuer);

impl TokenIssuer for BrokenHashIssuer {
    fn generate_access_token(&self, guid: Uuid, session_id: &str) -> Result<String, TokenError> {
        self.0.generate_access_token(guid, session_id)
    }

    fn validate_access_token(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.0.validate_access_token(token)
    }

    fn validate_signature_only(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.0.validate_signature_only(token)
    }

    fn generate_refresh_secret(&self) -> Result<RefreshSecret, TokenError> {
        self.0.generate_refresh_secret()
    }

    fn hash_refresh_secret(&self, _secret: &RefreshSecret) -> Result<String, TokenError> {
        Err(TokenError::Hashing("backend unavailable".to_string()))
    }

    fn compare_refresh_secret(&self, secret: &RefreshSecret, hash: &str) -> bool {
        self.0.compare_refresh_secret(secret, hash)
    }
}

/// Forwards every event into a channel the test can read.
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<IpChangeEvent>,
}

impl RecordingNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IpChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: IpChangeEvent) {
        let _ = self.tx.send(event);
    }
}

/// Service over in-memory stores, with handles to inspect them.
pub struct ServiceContext {
    pub service: AuthService,
    pub sessions: Arc<MemorySessionStore>,
    pub users: Arc<MemoryUserDirectory>,
    pub events: mpsc::UnboundedReceiver<IpChangeEvent>,
}

pub fn memory_service() -> ServiceContext {
    memory_service_with(Arc::new(test_issuer()))
}

pub fn memory_service_with(issuer: Arc<dyn TokenIssuer>) -> ServiceContext {
    let sessions = Arc::new(MemorySessionStore::new());
    let users = Arc::new(MemoryUserDirectory::new());
    let (notifier, events) = RecordingNotifier::new();

    let service = AuthService::new(
        issuer,
        sessions.clone(),
        users.clone(),
        Arc::new(notifier),
    );

    ServiceContext {
        service,
        sessions,
        users,
        events,
    }
}

/// Wait briefly for a notification from a detached task.
pub async fn next_event(
    events: &mut mpsc::UnboundedReceiver<IpChangeEvent>,
) -> Option<IpChangeEvent> {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .ok()
        .flatten()
}

/// Full app over an in-memory database. The client IP comes from X-Real-IP.
pub async fn create_test_app() -> (Router, Database) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let config = ServerConfig {
        db: db.clone(),
        jwt_secret: JWT_SECRET.to_vec(),
        access_ttl: Duration::from_secs(60),
        hash_cost: test_hash_cost(),
        webhook_url: None,
        ip_extractor: Some(IpExtractor::from(ClientIpHeader::XRealIp)),
    };
    let app = create_app(&config).expect("Failed to create app");
    (app, db)
}

pub fn get(uri: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::USER_AGENT, USER_AGENT)
        .header("x-real-ip", ip)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(
    uri: &str,
    access_token: &str,
    user_agent: &str,
    ip: &str,
    body: serde_json::Value,
) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, user_agent)
        .header("x-real-ip", ip)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_bearer(uri: &str, access_token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
        .header(header::USER_AGENT, USER_AGENT)
        .header("x-real-ip", CLIENT_IP)
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
