//! Tests for the authentication flow and liveness checks

use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use vts_rpc::{
    API_NAME, API_STATE_REQUEST, AUTHENTICATION_REQUEST, AUTHENTICATION_TOKEN_REQUEST,
    INVALID_TOKEN, ResponseEnvelope,
};

use super::fixtures::{
    Harness, RecordingStore, complete_handshake, expect_request, expect_status, next_request,
    respond_api_state, respond_authenticated, respond_error, respond_token, test_config,
};
use crate::config::Timings;
use crate::connection::{ConnectionOptions, HandshakePhase};
use crate::status::StatusText;

#[tokio::test(start_paused = true)]
async fn test_full_handshake_from_empty_store() {
    let mut h = Harness::new();
    let mut status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    assert_eq!(state.data, None);
    respond_api_state(&peer, &state, true);

    let token_request = expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;
    let data = token_request.data.clone().unwrap();
    assert_eq!(data["pluginName"], "Test Plugin");
    assert_eq!(data["pluginDeveloper"], "Test Developer");
    assert!(data.get("authenticationToken").is_none());
    respond_token(&peer, &token_request, "fresh-token");

    let auth = expect_request(&mut peer, AUTHENTICATION_REQUEST).await;
    assert_eq!(auth.data.clone().unwrap()["authenticationToken"], "fresh-token");
    respond_authenticated(&peer, &auth, true);

    let seen = expect_status(&mut status, StatusText::Ready).await;
    assert_eq!(
        seen,
        vec![
            StatusText::Connecting,
            StatusText::Connected,
            StatusText::Authenticating,
            StatusText::Authenticating,
            StatusText::Ready,
        ]
    );
    assert_eq!(h.store.writes(), vec![Some("fresh-token".to_string())]);
    assert_eq!(h.store.token().as_deref(), Some("fresh-token"));

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.handshake, HandshakePhase::Ready);
    assert_eq!(snapshot.pending_calls, 0);
    assert_eq!(snapshot.timers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_icon_is_sent_with_authentication() {
    let config = test_config("ws://vts.test:8001").with_icon("aWNvbg==");
    let mut h = Harness::build(config, ConnectionOptions::default(), RecordingStore::default());
    let _status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    respond_api_state(&peer, &state, true);
    let token_request = expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;
    assert_eq!(token_request.data.unwrap()["pluginIcon"], "aWNvbg==");
}

#[tokio::test(start_paused = true)]
async fn test_stored_token_skips_token_request() {
    let mut h = Harness::with_store(RecordingStore::with_token("saved"));
    let mut status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    respond_api_state(&peer, &state, true);
    let auth = expect_request(&mut peer, AUTHENTICATION_REQUEST).await;
    assert_eq!(auth.data.clone().unwrap()["authenticationToken"], "saved");
    respond_authenticated(&peer, &auth, true);

    expect_status(&mut status, StatusText::Ready).await;
    assert!(h.store.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_stored_token_counts_as_missing() {
    let mut h = Harness::with_store(RecordingStore::with_token(""));
    let _status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    respond_api_state(&peer, &state, true);
    expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;
}

#[tokio::test(start_paused = true)]
async fn test_inactive_api_is_rechecked_after_delay() {
    let mut h = Harness::new();
    let mut status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    respond_api_state(&peer, &state, false);
    expect_status(&mut status, StatusText::Inactive).await;

    let started = Instant::now();
    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    assert!(started.elapsed() >= Duration::from_secs(5));
    respond_api_state(&peer, &state, true);

    expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;
    expect_status(&mut status, StatusText::Authenticating).await;
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_state_check_reports_error_and_retries() {
    let mut h = Harness::new();
    let mut status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let started = Instant::now();
    expect_request(&mut peer, API_STATE_REQUEST).await;

    expect_status(&mut status, StatusText::Error).await;
    expect_request(&mut peer, API_STATE_REQUEST).await;
    // Request timeout plus liveness retry delay
    assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_token_is_cleared_and_replaced() {
    let mut h = Harness::with_store(RecordingStore::with_token("stale"));
    let mut status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    respond_api_state(&peer, &state, true);
    let auth = expect_request(&mut peer, AUTHENTICATION_REQUEST).await;
    respond_authenticated(&peer, &auth, false);

    let token_request = expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;
    assert_eq!(h.store.token(), None);
    respond_token(&peer, &token_request, "new");

    let auth = expect_request(&mut peer, AUTHENTICATION_REQUEST).await;
    assert_eq!(auth.data.clone().unwrap()["authenticationToken"], "new");
    respond_authenticated(&peer, &auth, true);

    expect_status(&mut status, StatusText::Ready).await;
    assert_eq!(h.store.writes(), vec![None, Some("new".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_denied_token_request_retries_after_backoff() {
    let mut h = Harness::new();
    let mut status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    respond_api_state(&peer, &state, true);
    let token_request = expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;
    respond_error(&peer, &token_request, 50, "User has denied API access for your plugin");

    expect_status(&mut status, StatusText::Unauthenticated).await;
    let started = Instant::now();
    expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert!(h.store.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_store_write_failure_counts_as_auth_failure() {
    let store = RecordingStore::default();
    store.fail_writes(true);
    let mut h = Harness::with_store(store);
    let mut status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    respond_api_state(&peer, &state, true);
    let token_request = expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;
    respond_token(&peer, &token_request, "unsaved");
    expect_status(&mut status, StatusText::Unauthenticated).await;

    h.store.fail_writes(false);
    let started = Instant::now();
    let token_request = expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;
    assert!(started.elapsed() >= Duration::from_secs(20));
    respond_token(&peer, &token_request, "saved");

    let auth = expect_request(&mut peer, AUTHENTICATION_REQUEST).await;
    respond_authenticated(&peer, &auth, true);
    expect_status(&mut status, StatusText::Ready).await;
    assert_eq!(h.store.writes(), vec![Some("saved".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_token_error_while_ready_reauthenticates() {
    let mut h = Harness::new();
    let (mut status, mut peer) = h.ready("a").await;

    let connection = h.connection.clone();
    let call = tokio::spawn(async move { connection.call("ItemListRequest", None).await });
    let request = expect_request(&mut peer, "ItemListRequest").await;

    let revoked_at = Instant::now();
    respond_error(&peer, &request, INVALID_TOKEN, "Token revoked");

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.code(), Some(INVALID_TOKEN));

    let seen = expect_status(&mut status, StatusText::Authenticating).await;
    assert_eq!(seen, vec![StatusText::Invalidated, StatusText::Authenticating]);

    // Straight back into authentication, no liveness check and no delay
    let auth = expect_request(&mut peer, AUTHENTICATION_REQUEST).await;
    assert!(revoked_at.elapsed() < Duration::from_secs(1));
    respond_authenticated(&peer, &auth, true);
    expect_status(&mut status, StatusText::Ready).await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_token_error_without_request_id_reauthenticates() {
    let mut h = Harness::new();
    let (mut status, mut peer) = h.ready("a").await;

    let frame = ResponseEnvelope::error(None, INVALID_TOKEN, "Token revoked");
    peer.send_text(serde_json::to_string(&frame).unwrap());

    expect_status(&mut status, StatusText::Invalidated).await;
    expect_request(&mut peer, AUTHENTICATION_REQUEST).await;
}

#[tokio::test(start_paused = true)]
async fn test_api_not_active_error_triggers_state_check() {
    let mut h = Harness::new();
    let (_status, mut peer) = h.ready("a").await;

    let connection = h.connection.clone();
    let call = tokio::spawn(async move { connection.call("ItemListRequest", None).await });
    let request = expect_request(&mut peer, "ItemListRequest").await;
    respond_error(&peer, &request, 1, "API is not active");

    assert_eq!(call.await.unwrap().unwrap_err().code(), Some(1));
    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    respond_api_state(&peer, &state, true);
    expect_request(&mut peer, AUTHENTICATION_REQUEST).await;
}

#[tokio::test(start_paused = true)]
async fn test_other_error_codes_leave_handshake_alone() {
    let mut h = Harness::new();
    let (_status, mut peer) = h.ready("a").await;

    let connection = h.connection.clone();
    let call = tokio::spawn(async move { connection.call("ItemListRequest", None).await });
    let request = expect_request(&mut peer, "ItemListRequest").await;
    respond_error(&peer, &request, 42, "Nope");

    assert_eq!(call.await.unwrap().unwrap_err().code(), Some(42));
    assert_eq!(h.snapshot().await.handshake, HandshakePhase::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_reentry_supersedes_in_flight_flow() {
    let mut h = Harness::new();
    let mut status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    respond_api_state(&peer, &state, true);
    let first = expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;

    // Token revoked while the user is still looking at the first prompt
    let frame = ResponseEnvelope::error(None, INVALID_TOKEN, "Token revoked");
    peer.send_text(serde_json::to_string(&frame).unwrap());
    let second = expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;
    assert_ne!(first.request_id, second.request_id);

    // The superseded answer is stored but does not advance the flow
    respond_token(&peer, &first, "old");
    respond_token(&peer, &second, "new");

    let auth = expect_request(&mut peer, AUTHENTICATION_REQUEST).await;
    assert_eq!(auth.data.clone().unwrap()["authenticationToken"], "new");
    respond_authenticated(&peer, &auth, true);
    expect_status(&mut status, StatusText::Ready).await;
    assert_eq!(
        h.store.writes(),
        vec![Some("old".to_string()), Some("new".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_token_granted_to_superseded_request_is_kept() {
    let mut h = Harness::new();
    let mut status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    respond_api_state(&peer, &state, true);
    let first = expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;

    let frame = ResponseEnvelope::error(None, INVALID_TOKEN, "Token revoked");
    peer.send_text(serde_json::to_string(&frame).unwrap());
    let second = expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;

    // The first prompt was approved, the second one is denied
    respond_token(&peer, &first, "approved");
    respond_error(&peer, &second, 50, "User has denied API access for your plugin");

    let seen = expect_status(&mut status, StatusText::Unauthenticated).await;
    assert_eq!(
        seen,
        vec![
            StatusText::Connecting,
            StatusText::Connected,
            StatusText::Authenticating,
            StatusText::Invalidated,
            StatusText::Authenticating,
            StatusText::Unauthenticated,
        ]
    );
    assert_eq!(h.store.token().as_deref(), Some("approved"));

    // The retry authenticates with it instead of prompting again
    let auth = expect_request(&mut peer, AUTHENTICATION_REQUEST).await;
    assert_eq!(auth.data.clone().unwrap()["authenticationToken"], "approved");
    respond_authenticated(&peer, &auth, true);
    expect_status(&mut status, StatusText::Ready).await;
    assert_eq!(h.store.writes(), vec![Some("approved".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_custom_timings_are_honoured() {
    let options = ConnectionOptions {
        timings: Timings {
            reconnect_ms: 100,
            liveness_retry_ms: 250,
            auth_retry_ms: 1000,
            requeue_ms: 1,
        },
        request_timeout: Duration::from_secs(1),
    };
    let mut h = Harness::build(test_config("ws://vts.test:8001"), options, RecordingStore::default());
    let mut status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    respond_api_state(&peer, &state, false);
    expect_status(&mut status, StatusText::Inactive).await;

    let started = Instant::now();
    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(250) && elapsed < Duration::from_secs(1));
    respond_api_state(&peer, &state, true);

    complete_after_state(&mut peer).await;
    expect_status(&mut status, StatusText::Ready).await;

    let closed_at = Instant::now();
    drop(peer);
    let mut peer = h.next_peer().await;
    let elapsed = closed_at.elapsed();
    assert!(elapsed >= Duration::from_millis(100) && elapsed < Duration::from_secs(1));
    complete_handshake(&mut peer, "t").await;
}

/// Finish a token-request flow whose state check was already answered.
async fn complete_after_state(peer: &mut vts_rpc::MemoryPeer) {
    let token_request = expect_request(peer, AUTHENTICATION_TOKEN_REQUEST).await;
    respond_token(peer, &token_request, "t");
    let auth = next_request(peer).await;
    assert_eq!(auth.message_type, AUTHENTICATION_REQUEST);
    respond_authenticated(peer, &auth, true);
}

#[tokio::test(start_paused = true)]
async fn test_frames_without_api_version_are_accepted() {
    let mut h = Harness::new();
    let mut status = h.connection.attach("a").await.unwrap();
    let mut peer = h.next_peer().await;

    let state = expect_request(&mut peer, API_STATE_REQUEST).await;
    let frame = json!({
        "apiName": API_NAME,
        "messageType": "APIStateResponse",
        "requestID": state.request_id,
        "data": { "active": true, "vTubeStudioVersion": "1.28.0" }
    });
    peer.send_text(frame.to_string());

    expect_request(&mut peer, AUTHENTICATION_TOKEN_REQUEST).await;
    expect_status(&mut status, StatusText::Authenticating).await;
}
