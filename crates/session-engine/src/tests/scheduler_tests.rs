use super::harness::{run_pending, settle, Engine, RefreshMode};
use crate::{
    BackgroundMessage, BackgroundRefreshWorker, LogoutScope, ProactiveRefreshScheduler,
    SessionStatus, Visibility,
};
use std::time::Duration;
use tokio::time::{advance, Instant};

const MARGIN: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn test_fires_at_expiry_minus_margin_reschedules_and_cancels_on_logout() {
    let engine = Engine::new();
    engine.stub.set_expires_in(600);
    let worker = BackgroundRefreshWorker::spawn(engine.coordinator.clone());

    let start = Instant::now();
    assert!(engine.coordinator.refresh().await.is_ok());

    let scheduler = ProactiveRefreshScheduler::spawn(
        engine.coordinator.clone(),
        &engine.store,
        worker.handle(),
        MARGIN,
    );
    assert!(settle(|| scheduler.next_fire_at().is_some()).await);
    assert_eq!(scheduler.next_fire_at(), Some(start + Duration::from_secs(540)));

    advance(Duration::from_secs(530)).await;
    run_pending().await;
    assert_eq!(engine.stub.refresh_calls(), 1);

    advance(Duration::from_secs(20)).await;
    assert!(settle(|| engine.stub.refresh_calls() == 2).await);

    // Rescheduled from the new expiry: refreshed at 550s, fires at 550 + 540.
    let rescheduled = start + Duration::from_secs(1090);
    assert!(settle(|| scheduler.next_fire_at() == Some(rescheduled)).await);
    assert_eq!(engine.store.status(), SessionStatus::Authenticated);

    engine.coordinator.logout(LogoutScope::Current).await.unwrap();
    assert!(settle(|| scheduler.next_fire_at().is_none()).await);

    advance(Duration::from_secs(2_000)).await;
    run_pending().await;
    assert_eq!(engine.stub.refresh_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unauthenticated_session_is_never_scheduled() {
    let engine = Engine::new();
    let worker = BackgroundRefreshWorker::spawn(engine.coordinator.clone());
    let scheduler = ProactiveRefreshScheduler::spawn(
        engine.coordinator.clone(),
        &engine.store,
        worker.handle(),
        MARGIN,
    );

    run_pending().await;
    assert!(scheduler.next_fire_at().is_none());

    engine.stub.set_refresh_mode(RefreshMode::Reject(401));
    engine.coordinator.refresh().await;
    run_pending().await;
    assert!(scheduler.next_fire_at().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_margin_longer_than_lifetime_fires_at_half_life() {
    let engine = Engine::new();
    engine.stub.set_expires_in(30);
    let worker = BackgroundRefreshWorker::spawn(engine.coordinator.clone());
    let start = Instant::now();
    engine.coordinator.refresh().await;

    let scheduler = ProactiveRefreshScheduler::spawn(
        engine.coordinator.clone(),
        &engine.store,
        worker.handle(),
        MARGIN,
    );
    assert!(settle(|| scheduler.next_fire_at().is_some()).await);
    assert_eq!(scheduler.next_fire_at(), Some(start + Duration::from_secs(15)));

    advance(Duration::from_secs(10)).await;
    run_pending().await;
    assert_eq!(engine.stub.refresh_calls(), 1);

    advance(Duration::from_secs(6)).await;
    assert!(settle(|| engine.stub.refresh_calls() == 2).await);
    run_pending().await;
    assert_eq!(engine.stub.refresh_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_background_visibility_hands_refresh_to_worker() {
    let engine = Engine::new();
    engine.stub.set_expires_in(600);
    let worker = BackgroundRefreshWorker::spawn(engine.coordinator.clone());
    let mut messages = worker.subscribe();
    engine.coordinator.refresh().await;

    let scheduler = ProactiveRefreshScheduler::spawn(
        engine.coordinator.clone(),
        &engine.store,
        worker.handle(),
        MARGIN,
    );
    assert!(settle(|| scheduler.next_fire_at().is_some()).await);

    scheduler.set_visibility(Visibility::Background);
    assert!(settle(|| scheduler.next_fire_at().is_none()).await);
    run_pending().await;

    advance(Duration::from_secs(545)).await;
    let message = messages.recv().await.unwrap();

    assert!(matches!(message, BackgroundMessage::RefreshSucceeded { .. }));
    assert_eq!(engine.stub.refresh_calls(), 2);
    assert_eq!(engine.store.status(), SessionStatus::Authenticated);

    // Back in the foreground the local timer takes over again.
    scheduler.set_visibility(Visibility::Foreground);
    assert!(settle(|| scheduler.next_fire_at().is_some()).await);
}

#[tokio::test(start_paused = true)]
async fn test_fire_time_is_fixed_per_expiry() {
    let engine = Engine::new();
    engine.stub.set_expires_in(30);
    let worker = BackgroundRefreshWorker::spawn(engine.coordinator.clone());
    let start = Instant::now();
    engine.coordinator.refresh().await;

    let scheduler = ProactiveRefreshScheduler::spawn(
        engine.coordinator.clone(),
        &engine.store,
        worker.handle(),
        MARGIN,
    );
    let planned = start + Duration::from_secs(15);
    assert!(settle(|| scheduler.next_fire_at() == Some(planned)).await);

    // Unrelated wakeups must not push the timer toward the deadline.
    advance(Duration::from_secs(10)).await;
    scheduler.set_visibility(Visibility::Foreground);
    run_pending().await;
    scheduler.set_visibility(Visibility::Foreground);
    run_pending().await;

    assert_eq!(scheduler.next_fire_at(), Some(planned));
    assert_eq!(engine.stub.refresh_calls(), 1);
}
