//! Tests for the token lifecycle against in-memory collaborators.
//!
//! Tests cover:
//! - Authorize for new and existing users
//! - Rotation on refresh and replay of rotated credentials
//! - Fail-closed revocation on session, secret and user agent mismatch
//! - IP change notification
//! - Deauthorize and session expiry

mod common;

use chrono::Duration;
use common::{
    BrokenHashIssuer, CLIENT_IP, USER_AGENT, memory_service, memory_service_with, next_event,
    test_issuer, test_jwt,
};
use guidauth::service::{AuthError, Missing, TokenPair, Violation};
use guidauth::store::{SessionStore, UserDirectory};
use std::sync::Arc;
use uuid::Uuid;

fn session_id(pair: &TokenPair) -> String {
    test_jwt()
        .validate_access_token(&pair.access_token)
        .expect("Access token should validate")
        .session_id
}

fn subject(pair: &TokenPair) -> Uuid {
    test_jwt()
        .validate_access_token(&pair.access_token)
        .expect("Access token should validate")
        .subject
}

/// Flip one bit in the decoded secret and re-encode it.
fn tamper(refresh_token: &str) -> String {
    use base64::{Engine, engine::general_purpose::STANDARD};
    let mut bytes = STANDARD.decode(refresh_token).unwrap();
    bytes[0] ^= 0x01;
    STANDARD.encode(bytes)
}

#[tokio::test]
async fn test_authorize_creates_user() {
    let ctx = memory_service();

    let pair = ctx.service.authorize(None, USER_AGENT, CLIENT_IP).await.unwrap();
    let guid = subject(&pair);

    assert!(ctx.users.exists(guid).await.unwrap());
    let stored = ctx.sessions.get(guid).await.unwrap().unwrap();
    assert_eq!(stored.session_id, session_id(&pair));
    assert_eq!(stored.fingerprint.user_agent, USER_AGENT);
    assert_eq!(stored.fingerprint.ip, CLIENT_IP);
    // Only the hash is stored
    assert_ne!(stored.token_hash, pair.refresh_token);
    assert_eq!(stored.expires_at - stored.created_at, Duration::hours(24));
}

#[tokio::test]
async fn test_authorize_unknown_guid_fails_without_creating() {
    let ctx = memory_service();
    let guid = Uuid::new_v4();

    let err = ctx
        .service
        .authorize(Some(guid), USER_AGENT, CLIENT_IP)
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::NotFound(Missing::User)));
    assert!(!ctx.users.exists(guid).await.unwrap());
    assert!(ctx.sessions.is_empty());
}

#[tokio::test]
async fn test_second_authorize_supersedes_first() {
    let ctx = memory_service();
    let first = ctx.service.authorize(None, USER_AGENT, CLIENT_IP).await.unwrap();
    let guid = subject(&first);

    let second = ctx
        .service
        .authorize(Some(guid), USER_AGENT, CLIENT_IP)
        .await
        .unwrap();
    assert_ne!(session_id(&first), session_id(&second));
    assert_eq!(ctx.sessions.len(), 1);

    let err = ctx
        .service
        .refresh(guid, &session_id(&first), &first.refresh_token, USER_AGENT, CLIENT_IP)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn test_refresh_rotates_and_rejects_replay() {
    let ctx = memory_service();
    let p1 = ctx.service.authorize(None, "ua1", "ip1").await.unwrap();
    let guid = subject(&p1);
    let s1 = session_id(&p1);

    let p2 = ctx
        .service
        .refresh(guid, &s1, &p1.refresh_token, "ua1", "ip1")
        .await
        .unwrap();
    let s2 = session_id(&p2);
    assert_ne!(s1, s2);
    assert_ne!(p1.refresh_token, p2.refresh_token);
    assert_eq!(ctx.sessions.get(guid).await.unwrap().unwrap().session_id, s2);

    // Replaying the first pair is a session mismatch and revokes everything
    let err = ctx
        .service
        .refresh(guid, &s1, &p1.refresh_token, "ua1", "ip1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::SecurityViolation(Violation::SessionMismatch)
    ));
    assert!(ctx.sessions.get(guid).await.unwrap().is_none());

    // The legitimate holder of the second pair is locked out too
    let err = ctx
        .service
        .refresh(guid, &s2, &p2.refresh_token, "ua1", "ip1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::NotFound(Missing::Session)));
}

#[tokio::test]
async fn test_refresh_with_wrong_session_id_revokes() {
    let ctx = memory_service();
    let pair = ctx.service.authorize(None, USER_AGENT, CLIENT_IP).await.unwrap();
    let guid = subject(&pair);

    let err = ctx
        .service
        .refresh(guid, "not-the-session", &pair.refresh_token, USER_AGENT, CLIENT_IP)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthError::SecurityViolation(Violation::SessionMismatch)
    ));
    assert!(ctx.sessions.get(guid).await.unwrap().is_none());
}

#[tokio::test]
async fn test_refresh_with_tampered_secret_revokes() {
    let ctx = memory_service();
    let pair = ctx.service.authorize(None, USER_AGENT, CLIENT_IP).await.unwrap();
    let guid = subject(&pair);

    let err = ctx
        .service
        .refresh(
            guid,
            &session_id(&pair),
            &tamper(&pair.refresh_token),
            USER_AGENT,
            CLIENT_IP,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthError::SecurityViolation(Violation::SecretMismatch)
    ));
    assert!(ctx.sessions.get(guid).await.unwrap().is_none());
}

#[tokio::test]
async fn test_refresh_with_undecodable_secret_revokes() {
    let ctx = memory_service();
    let pair = ctx.service.authorize(None, USER_AGENT, CLIENT_IP).await.unwrap();
    let guid = subject(&pair);

    let err = ctx
        .service
        .refresh(guid, &session_id(&pair), "%%%not base64%%%", USER_AGENT, CLIENT_IP)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthError::SecurityViolation(Violation::SecretMismatch)
    ));
    assert!(ctx.sessions.is_empty());
}

#[tokio::test]
async fn test_refresh_with_other_user_agent_revokes() {
    let ctx = memory_service();
    let pair = ctx.service.authorize(None, USER_AGENT, CLIENT_IP).await.unwrap();
    let guid = subject(&pair);

    let err = ctx
        .service
        .refresh(
            guid,
            &session_id(&pair),
            &pair.refresh_token,
            "some-other-browser/2.0",
            CLIENT_IP,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthError::SecurityViolation(Violation::UserAgentMismatch)
    ));
    assert!(ctx.sessions.get(guid).await.unwrap().is_none());
}

#[tokio::test]
async fn test_refresh_from_new_ip_notifies_once() {
    let mut ctx = memory_service();
    let pair = ctx.service.authorize(None, USER_AGENT, "10.0.0.1").await.unwrap();
    let guid = subject(&pair);

    let rotated = ctx
        .service
        .refresh(guid, &session_id(&pair), &pair.refresh_token, USER_AGENT, "10.0.0.2")
        .await
        .unwrap();
    assert_ne!(session_id(&rotated), session_id(&pair));

    let event = next_event(&mut ctx.events).await.expect("Expected a notification");
    assert_eq!(event.guid, guid);
    assert_eq!(event.old_ip, "10.0.0.1");
    assert_eq!(event.new_ip, "10.0.0.2");
    assert_eq!(event.user_agent, USER_AGENT);

    // The rotated session is bound to the new IP
    let stored = ctx.sessions.get(guid).await.unwrap().unwrap();
    assert_eq!(stored.fingerprint.ip, "10.0.0.2");

    // Exactly one
    assert!(ctx.events.try_recv().is_err());
}

#[tokio::test]
async fn test_refresh_from_same_ip_does_not_notify() {
    let mut ctx = memory_service();
    let pair = ctx.service.authorize(None, USER_AGENT, CLIENT_IP).await.unwrap();
    let guid = subject(&pair);

    ctx.service
        .refresh(guid, &session_id(&pair), &pair.refresh_token, USER_AGENT, CLIENT_IP)
        .await
        .unwrap();

    tokio::task::yield_now().await;
    assert!(ctx.events.try_recv().is_err());
}

#[tokio::test]
async fn test_deauthorize_then_refresh_fails() {
    let ctx = memory_service();
    let pair = ctx.service.authorize(None, USER_AGENT, CLIENT_IP).await.unwrap();
    let guid = subject(&pair);

    ctx.service.deauthorize(guid).await.unwrap();
    assert!(ctx.sessions.is_empty());

    let err = ctx
        .service
        .refresh(guid, &session_id(&pair), &pair.refresh_token, USER_AGENT, CLIENT_IP)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::NotFound(Missing::Session)));

    // Deauthorizing twice is fine
    ctx.service.deauthorize(guid).await.unwrap();
}

#[tokio::test]
async fn test_refresh_of_expired_session_fails() {
    let ctx = memory_service();
    let service = ctx.service.clone().with_session_ttl(Duration::seconds(-1));

    let pair = service.authorize(None, USER_AGENT, CLIENT_IP).await.unwrap();
    let guid = subject(&pair);

    let err = service
        .refresh(guid, &session_id(&pair), &pair.refresh_token, USER_AGENT, CLIENT_IP)
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::NotFound(Missing::Session)));
    assert!(ctx.sessions.is_empty());
}

#[tokio::test]
async fn test_concurrent_refresh_has_one_winner() {
    let ctx = memory_service();
    let pair = ctx.service.authorize(None, USER_AGENT, CLIENT_IP).await.unwrap();
    let guid = subject(&pair);
    let sid = session_id(&pair);

    let (a, b) = tokio::join!(
        ctx.service
            .refresh(guid, &sid, &pair.refresh_token, USER_AGENT, CLIENT_IP),
        ctx.service
            .refresh(guid, &sid, &pair.refresh_token, USER_AGENT, CLIENT_IP),
    );

    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one refresh may rotate the session");

    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(
        loser,
        Err(AuthError::SecurityViolation(Violation::SessionMismatch))
    ));
}

#[tokio::test]
async fn test_failed_authorize_creates_no_user() {
    let ctx = memory_service_with(Arc::new(BrokenHashIssuer(test_issuer())));

    let err = ctx
        .service
        .authorize(None, USER_AGENT, CLIENT_IP)
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Infrastructure(_)));
    assert!(ctx.users.is_empty());
    assert!(ctx.sessions.is_empty());
}

#[tokio::test]
async fn test_failed_refresh_keeps_session() {
    let healthy = memory_service();
    let pair = healthy
        .service
        .authorize(None, USER_AGENT, CLIENT_IP)
        .await
        .unwrap();
    let guid = subject(&pair);
    let before = healthy.sessions.get(guid).await.unwrap().unwrap();

    // Same stores, hashing now broken
    let broken = guidauth::service::AuthService::new(
        Arc::new(BrokenHashIssuer(test_issuer())),
        healthy.sessions.clone(),
        healthy.users.clone(),
        Arc::new(guidauth::notify::LogNotifier),
    );

    let err = broken
        .refresh(guid, &session_id(&pair), &pair.refresh_token, USER_AGENT, CLIENT_IP)
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Infrastructure(_)));
    assert_eq!(healthy.sessions.get(guid).await.unwrap().unwrap(), before);
}
