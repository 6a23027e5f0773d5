use super::harness::{Engine, RefreshMode, StubIdentityProvider, VALID_OTP};
use crate::{LogoutScope, RefreshFailure, RefreshOutcome, RefreshTrigger, SessionStatus};
use futures_util::future::join_all;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_concurrent_refreshes_share_one_network_call() {
    let engine = Engine::new();
    engine.stub.set_refresh_delay(Duration::from_millis(200));

    let calls = (0..8).map(|_| engine.coordinator.refresh());
    let outcomes = join_all(calls).await;

    assert_eq!(engine.stub.refresh_calls(), 1);
    assert!(outcomes.iter().all(RefreshOutcome::is_ok));
    assert!(outcomes.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(engine.store.status(), SessionStatus::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_failed_attempt_is_shared_and_then_cleared() {
    let engine = Engine::new();
    engine.stub.set_refresh_delay(Duration::from_millis(100));
    engine.stub.set_refresh_mode(RefreshMode::Reject(401));

    let outcomes = join_all((0..3).map(|_| engine.coordinator.refresh())).await;
    assert_eq!(engine.stub.refresh_calls(), 1);
    for outcome in &outcomes {
        assert_eq!(
            *outcome,
            RefreshOutcome::Failed {
                reason: RefreshFailure::Rejected { status: 401 }
            }
        );
    }
    assert!(!engine.coordinator.is_refreshing());

    // A later call starts a new attempt.
    engine.stub.set_refresh_mode(RefreshMode::Succeed);
    let outcome = engine.coordinator.refresh().await;
    assert!(outcome.is_ok());
    assert_eq!(engine.stub.refresh_calls(), 2);
}

#[tokio::test]
async fn test_success_updates_session() {
    let engine = Engine::new();
    engine.stub.set_expires_in(600);

    let outcome = engine.coordinator.refresh().await;

    let session = engine.store.snapshot();
    assert_eq!(session.status, SessionStatus::Authenticated);
    assert!(session.access_token_present);
    assert!(session.refresh_attempted);
    assert!(session.last_refreshed_at.is_some());
    assert!(session.access_deadline.is_some());
    match outcome {
        RefreshOutcome::Ok { expires_at } => {
            assert_eq!(Some(expires_at), session.access_expires_at);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_network_failure_leaves_session_anonymous() {
    let engine = Engine::new();
    engine.stub.set_refresh_mode(RefreshMode::NetworkDown);

    let outcome = engine.coordinator.refresh().await;

    assert!(matches!(
        outcome,
        RefreshOutcome::Failed {
            reason: RefreshFailure::Network(_)
        }
    ));
    let session = engine.store.snapshot();
    assert_eq!(session.status, SessionStatus::Anonymous);
    assert!(session.refresh_attempted);
    assert!(!engine.coordinator.is_refreshing());
}

#[tokio::test]
async fn test_no_credential_is_a_failure() {
    let engine = Engine::new();
    engine.stub.set_refresh_mode(RefreshMode::NoCredential);

    let outcome = engine.coordinator.refresh().await;

    assert_eq!(
        outcome,
        RefreshOutcome::Failed {
            reason: RefreshFailure::NoCredential
        }
    );
    assert_eq!(engine.store.status(), SessionStatus::Anonymous);
}

#[tokio::test]
async fn test_panicking_attempt_moves_to_error_and_releases_slot() {
    let engine = Engine::new();
    engine.stub.set_refresh_mode(RefreshMode::Panic);

    let outcome = engine.coordinator.refresh().await;

    assert!(matches!(
        outcome,
        RefreshOutcome::Failed {
            reason: RefreshFailure::Internal(_)
        }
    ));
    assert_eq!(engine.store.status(), SessionStatus::Error);
    assert!(!engine.coordinator.is_refreshing());

    engine.stub.set_refresh_mode(RefreshMode::Succeed);
    assert!(engine.coordinator.refresh().await.is_ok());
    assert_eq!(engine.store.status(), SessionStatus::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_logout_during_refresh_discards_result() {
    let engine = Engine::new();
    engine.stub.set_refresh_delay(Duration::from_secs(1));

    let coordinator = engine.coordinator.clone();
    let pending = tokio::spawn(async move { coordinator.refresh().await });
    tokio::task::yield_now().await;
    assert_eq!(engine.store.status(), SessionStatus::Refreshing);

    engine.coordinator.logout(LogoutScope::Current).await.unwrap();
    assert_eq!(engine.store.status(), SessionStatus::Anonymous);

    let outcome = pending.await.unwrap();
    assert_eq!(
        outcome,
        RefreshOutcome::Failed {
            reason: RefreshFailure::Superseded
        }
    );
    assert_eq!(engine.store.status(), SessionStatus::Anonymous);
    assert!(!engine.store.snapshot().access_token_present);
}

#[tokio::test]
async fn test_logout_scopes() {
    let engine = Engine::new();
    engine.coordinator.refresh().await;

    engine.coordinator.logout(LogoutScope::Others).await.unwrap();
    assert_eq!(engine.store.status(), SessionStatus::Authenticated);
    assert_eq!(engine.stub.upstream_calls("/logout/others"), 1);

    engine
        .coordinator
        .logout(LogoutScope::Session("abc".into()))
        .await
        .unwrap();
    assert_eq!(engine.store.status(), SessionStatus::Authenticated);
    assert_eq!(engine.stub.upstream_calls("/logout/session/abc"), 1);

    engine.coordinator.logout(LogoutScope::All).await.unwrap();
    assert_eq!(engine.store.status(), SessionStatus::Anonymous);
    assert_eq!(engine.stub.upstream_calls("/logout/all"), 1);
}

#[tokio::test]
async fn test_logout_goes_anonymous_even_when_call_fails() {
    let engine = Engine::new();
    engine.coordinator.refresh().await;

    // No CSRF cookie and no way to prime one: the call is refused locally.
    engine.stub.set_issue_csrf(false);
    engine.stub.remove_cookie(csrf_guard::CSRF_COOKIE_NAME);

    let result = engine.coordinator.logout(LogoutScope::Current).await;
    assert!(result.is_err());
    assert_eq!(engine.store.status(), SessionStatus::Anonymous);
}

#[tokio::test]
async fn test_challenge_then_verify() {
    let engine = Engine::new();
    engine.stub.set_refresh_mode(RefreshMode::Challenge);

    let outcome = engine.coordinator.refresh().await;
    assert_eq!(
        outcome,
        RefreshOutcome::Failed {
            reason: RefreshFailure::ChallengeRequired
        }
    );
    let session = engine.store.snapshot();
    assert_eq!(session.status, SessionStatus::OtpPending);
    assert_eq!(session.challenge_id.as_deref(), Some("challenge-1"));
    assert_eq!(session.masked_phone.as_deref(), Some("***-***-1234"));

    // While the challenge is pending no refresh reaches the network.
    let calls_before = engine.stub.refresh_calls();
    let outcome = engine.coordinator.refresh().await;
    assert!(!outcome.is_ok());
    assert_eq!(engine.stub.refresh_calls(), calls_before);

    assert!(engine.coordinator.verify_otp("000000").await.is_err());
    assert_eq!(engine.store.status(), SessionStatus::OtpPending);

    let verified = engine.coordinator.verify_otp(VALID_OTP).await.unwrap();
    assert!(verified.is_ok());
    let session = engine.store.snapshot();
    assert_eq!(session.status, SessionStatus::Authenticated);
    assert!(session.challenge_id.is_none());
}

#[tokio::test]
async fn test_resend_otp_keeps_challenge_pending() {
    let engine = Engine::new();
    engine.stub.set_refresh_mode(RefreshMode::Challenge);
    engine.coordinator.refresh().await;

    let client = device_identity::ClientInfo {
        ip_address: "203.0.113.9".into(),
        user_agent: "test".into(),
        cached_at: chrono::Utc::now(),
    };
    let masked = engine.coordinator.resend_otp(&client).await.unwrap();

    assert_eq!(masked.as_deref(), Some("***-***-9876"));
    let session = engine.store.snapshot();
    assert_eq!(session.status, SessionStatus::OtpPending);
    assert_eq!(session.masked_phone.as_deref(), Some("***-***-9876"));
}

#[tokio::test]
async fn test_otp_calls_require_pending_challenge() {
    let engine = Engine::new();
    assert!(matches!(
        engine.coordinator.verify_otp(VALID_OTP).await,
        Err(crate::AuthError::ChallengeMissing)
    ));
}

#[tokio::test]
async fn test_silent_refresh_runs_once() {
    let engine = Engine::new();

    let first = engine.coordinator.silent_refresh().await;
    let second = engine.coordinator.silent_refresh().await;

    assert!(first.is_some_and(|outcome| outcome.is_ok()));
    assert!(second.is_none());
    assert_eq!(engine.stub.refresh_calls(), 1);
}

#[tokio::test]
async fn test_ended_session_only_refreshes_on_explicit_request() {
    let engine = Engine::new();
    engine.stub.set_refresh_mode(RefreshMode::Reject(401));
    engine.coordinator.refresh().await;
    assert_eq!(engine.store.status(), SessionStatus::Anonymous);

    let outcome = engine
        .coordinator
        .refresh_for(RefreshTrigger::AccessRejected)
        .await;
    assert_eq!(
        outcome,
        RefreshOutcome::Failed {
            reason: RefreshFailure::SessionEnded
        }
    );
    assert_eq!(engine.stub.refresh_calls(), 1);

    engine.stub.set_refresh_mode(RefreshMode::Succeed);
    assert!(engine.coordinator.refresh().await.is_ok());
    assert_eq!(engine.stub.refresh_calls(), 2);
}

#[tokio::test]
async fn test_silent_refresh_from_authenticated_skips_refreshing() {
    let engine = Engine::new();
    engine.coordinator.refresh().await;

    let mut changes = engine.store.changes();
    let outcome = engine
        .coordinator
        .refresh_for(RefreshTrigger::Proactive)
        .await;

    assert!(outcome.is_ok());
    assert!(changes.try_recv().is_err());
    assert_eq!(engine.store.status(), SessionStatus::Authenticated);
}

#[tokio::test]
async fn test_silent_refresh_failure_drops_to_anonymous() {
    let stub = StubIdentityProvider::new();
    let engine = Engine::with_stub(stub);
    engine.coordinator.refresh().await;

    engine.stub.set_refresh_mode(RefreshMode::Challenge);
    let outcome = engine
        .coordinator
        .refresh_for(RefreshTrigger::Proactive)
        .await;

    assert!(!outcome.is_ok());
    assert_eq!(engine.store.status(), SessionStatus::Anonymous);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_lifetime_falls_back_on_refresh() {
    let engine = Engine::new();
    engine.stub.set_expires_in(u64::MAX);
    let before = tokio::time::Instant::now();

    let outcome = engine.coordinator.refresh().await;

    assert!(outcome.is_ok());
    let session = engine.store.snapshot();
    assert_eq!(session.status, SessionStatus::Authenticated);
    assert_eq!(
        session.access_deadline,
        Some(before + Duration::from_secs(900))
    );
}

#[tokio::test(start_paused = true)]
async fn test_oversized_lifetime_falls_back_on_verify() {
    let engine = Engine::new();
    engine.stub.set_refresh_mode(RefreshMode::Challenge);
    engine.coordinator.refresh().await;
    engine.stub.set_expires_in(u64::MAX);
    let before = tokio::time::Instant::now();

    let outcome = engine.coordinator.verify_otp(VALID_OTP).await.unwrap();

    assert!(outcome.is_ok());
    let session = engine.store.snapshot();
    assert_eq!(session.status, SessionStatus::Authenticated);
    assert_eq!(
        session.access_deadline,
        Some(before + Duration::from_secs(900))
    );
}
