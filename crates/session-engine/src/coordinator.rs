//! Single-flight credential refresh.
//!
//! All concurrent callers share one in-flight attempt and observe the same
//! outcome. The attempt runs as its own task so a caller dropping its future
//! cannot strand the others, and the in-flight slot is cleared when the task
//! finishes, whether it succeeded, failed or panicked.

use crate::identity_provider::{IdentityProviderClient, LogoutScope, RefreshGrant};
use crate::session_fsm::{SessionInput, SessionStatus};
use crate::store::SessionStateStore;
use crate::{AuthError, AuthResult};
use chrono::{DateTime, Utc};
use csrf_guard::cookies::REFRESH_TOKEN_TTL_SECS;
use device_identity::ClientInfo;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why a refresh did not produce a usable credential.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RefreshFailure {
    #[error("network error: {0}")]
    Network(String),

    #[error("rejected with HTTP {status}")]
    Rejected { status: u16 },

    #[error("no credential issued")]
    NoCredential,

    #[error("verification challenge required")]
    ChallengeRequired,

    #[error("CSRF check failed")]
    Csrf,

    /// Anonymous after a failed attempt; only an explicit refresh retries.
    #[error("session ended")]
    SessionEnded,

    /// A logout happened while the attempt was in flight.
    #[error("superseded by logout")]
    Superseded,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<&AuthError> for RefreshFailure {
    fn from(err: &AuthError) -> Self {
        match err {
            AuthError::Network(inner) => RefreshFailure::Network(inner.to_string()),
            AuthError::Http(inner) => RefreshFailure::Network(inner.to_string()),
            AuthError::RefreshExhausted { status } => RefreshFailure::Rejected { status: *status },
            AuthError::UnexpectedStatus { status, .. } => {
                RefreshFailure::Rejected { status: *status }
            }
            AuthError::CsrfMismatch(_) => RefreshFailure::Csrf,
            other => RefreshFailure::Internal(other.to_string()),
        }
    }
}

/// Result of a refresh attempt. Never an error: callers branch on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Ok { expires_at: DateTime<Utc> },
    Failed { reason: RefreshFailure },
}

impl RefreshOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, RefreshOutcome::Ok { .. })
    }

    fn failed(reason: RefreshFailure) -> Self {
        RefreshOutcome::Failed { reason }
    }
}

/// Who asked for the refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTrigger {
    Explicit,
    /// A protected call came back 401.
    AccessRejected,
    Proactive,
    Background,
    Startup,
}

/// An access credential never outlives the refresh credential.
const MAX_ACCESS_LIFETIME: Duration = Duration::from_secs(REFRESH_TOKEN_TTL_SECS as u64);

type SharedOutcome = Shared<BoxFuture<'static, RefreshOutcome>>;

struct RefreshAttempt {
    id: u64,
    started_at: Instant,
    trigger: RefreshTrigger,
    outcome: SharedOutcome,
}

type AttemptSlot = Arc<Mutex<Option<RefreshAttempt>>>;

/// Clears the in-flight slot when the attempt task ends, even by panic.
struct ClearInFlight {
    slot: AttemptSlot,
    id: u64,
}

impl Drop for ClearInFlight {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|attempt| attempt.id == self.id) {
            if let Some(attempt) = slot.take() {
                debug!(
                    attempt = attempt.id,
                    trigger = ?attempt.trigger,
                    elapsed_ms = attempt.started_at.elapsed().as_millis() as u64,
                    "Refresh attempt cleared"
                );
            }
        }
    }
}

/// State an attempt task needs once it leaves the caller.
struct AttemptContext {
    provider: Arc<IdentityProviderClient>,
    store: Arc<SessionStateStore>,
    epoch: u64,
    /// Started from `Authenticated`; no `Refreshing` state is shown.
    silent: bool,
    trigger: RefreshTrigger,
    fallback_ttl: Duration,
}

/// Owns the refresh path and the session writes that follow from it.
pub struct RefreshCoordinator {
    provider: Arc<IdentityProviderClient>,
    store: Arc<SessionStateStore>,
    in_flight: AttemptSlot,
    next_attempt_id: AtomicU64,
    startup_attempted: AtomicBool,
    fallback_ttl: Duration,
}

impl RefreshCoordinator {
    /// `fallback_ttl` is assumed when the provider does not report a lifetime.
    pub fn new(
        provider: Arc<IdentityProviderClient>,
        store: Arc<SessionStateStore>,
        fallback_ttl: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            in_flight: Arc::new(Mutex::new(None)),
            next_attempt_id: AtomicU64::new(1),
            startup_attempted: AtomicBool::new(false),
            fallback_ttl,
        }
    }

    pub fn store(&self) -> &Arc<SessionStateStore> {
        &self.store
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        self.refresh_for(RefreshTrigger::Explicit).await
    }

    /// Join the in-flight attempt or start a new one.
    pub async fn refresh_for(&self, trigger: RefreshTrigger) -> RefreshOutcome {
        let outcome = {
            let mut slot = self.in_flight.lock();
            let existing = slot
                .as_ref()
                .map(|attempt| (attempt.id, attempt.outcome.clone()));
            match existing {
                Some((id, outcome)) => {
                    debug!(attempt = id, trigger = ?trigger, "Joining in-flight refresh");
                    outcome
                }
                None => {
                    let (epoch, silent) = match self.begin(trigger) {
                        Ok(started) => started,
                        Err(outcome) => return outcome,
                    };
                    let id = self.next_attempt_id.fetch_add(1, Ordering::SeqCst);
                    let outcome = self.spawn_attempt(id, epoch, silent, trigger);
                    *slot = Some(RefreshAttempt {
                        id,
                        started_at: Instant::now(),
                        trigger,
                        outcome: outcome.clone(),
                    });
                    outcome
                }
            }
        };

        outcome.await
    }

    /// Start-up refresh. Runs at most once per coordinator; later calls
    /// return `None` without touching the network.
    pub async fn silent_refresh(&self) -> Option<RefreshOutcome> {
        if self.startup_attempted.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(self.refresh_for(RefreshTrigger::Startup).await)
    }

    /// Complete a pending challenge with a one-time code.
    pub async fn verify_otp(&self, code: &str) -> AuthResult<RefreshOutcome> {
        let session = self.store.snapshot();
        let challenge_id = match (session.status, session.challenge_id) {
            (SessionStatus::OtpPending, Some(id)) => id,
            _ => return Err(AuthError::ChallengeMissing),
        };
        let epoch = self.store.epoch();

        match self.provider.verify_otp(&challenge_id, code).await? {
            RefreshGrant::Credential { expires_in } => {
                let (expires_at, deadline) = access_window(expires_in, self.fallback_ttl);
                let applied = self.store.transition_in_epoch(
                    epoch,
                    &SessionInput::ChallengeVerified,
                    |session| {
                        session.clear_credentials();
                        session.access_token_present = true;
                        session.last_refreshed_at = Some(Utc::now());
                        session.access_expires_at = Some(expires_at);
                        session.access_deadline = Some(deadline);
                        session.refresh_attempted = true;
                    },
                )?;
                if !applied {
                    return Ok(RefreshOutcome::failed(RefreshFailure::Superseded));
                }
                info!("Verification challenge completed");
                Ok(RefreshOutcome::Ok { expires_at })
            }
            RefreshGrant::Challenge { .. } => {
                Ok(RefreshOutcome::failed(RefreshFailure::ChallengeRequired))
            }
            RefreshGrant::NoCredential => Ok(RefreshOutcome::failed(RefreshFailure::NoCredential)),
        }
    }

    /// Ask the provider to send a fresh code for the pending challenge.
    pub async fn resend_otp(&self, client: &ClientInfo) -> AuthResult<Option<String>> {
        let session = self.store.snapshot();
        let challenge_id = match (session.status, session.challenge_id) {
            (SessionStatus::OtpPending, Some(id)) => id,
            _ => return Err(AuthError::ChallengeMissing),
        };
        let epoch = self.store.epoch();

        let dispatch = self.provider.send_otp(&challenge_id, client).await?;
        let masked_phone = dispatch.masked_phone.clone();
        self.store
            .transition_in_epoch(epoch, &SessionInput::ChallengeResent, |session| {
                if dispatch.masked_phone.is_some() {
                    session.masked_phone = dispatch.masked_phone;
                }
            })?;
        Ok(masked_phone)
    }

    /// End sessions on the provider.
    ///
    /// `Current` and `All` always leave this client `Anonymous`, even when the
    /// network call fails; the error is still returned.
    pub async fn logout(&self, scope: LogoutScope) -> AuthResult<()> {
        let result = self.provider.logout(&scope).await;
        if scope.ends_local_session() {
            let epoch = self.store.logout();
            info!(scope = ?scope, epoch, "Logged out");
        }
        if let Err(err) = &result {
            warn!(scope = ?scope, error = %err, "Logout call failed");
        }
        result
    }

    /// Decide whether a new attempt may start, and move the session into it.
    fn begin(&self, trigger: RefreshTrigger) -> Result<(u64, bool), RefreshOutcome> {
        let session = self.store.snapshot();
        match session.status {
            SessionStatus::OtpPending => {
                debug!(trigger = ?trigger, "Refresh skipped while a challenge is pending");
                Err(RefreshOutcome::failed(RefreshFailure::ChallengeRequired))
            }
            SessionStatus::Anonymous
                if session.refresh_attempted && trigger != RefreshTrigger::Explicit =>
            {
                debug!(trigger = ?trigger, "Refresh skipped for ended session");
                Err(RefreshOutcome::failed(RefreshFailure::SessionEnded))
            }
            SessionStatus::Authenticated if trigger != RefreshTrigger::AccessRejected => {
                Ok((self.store.epoch(), true))
            }
            SessionStatus::Authenticated => self.enter(&SessionInput::AccessRejected),
            SessionStatus::Refreshing => Ok((self.store.epoch(), false)),
            SessionStatus::Uninitialized | SessionStatus::Anonymous | SessionStatus::Error => {
                self.enter(&SessionInput::RefreshStarted)
            }
        }
    }

    fn enter(&self, input: &SessionInput) -> Result<(u64, bool), RefreshOutcome> {
        self.store
            .transition(input, |_| {})
            .map(|epoch| (epoch, false))
            .map_err(|err| RefreshOutcome::failed(RefreshFailure::Internal(err.to_string())))
    }

    fn spawn_attempt(
        &self,
        id: u64,
        epoch: u64,
        silent: bool,
        trigger: RefreshTrigger,
    ) -> SharedOutcome {
        let ctx = AttemptContext {
            provider: self.provider.clone(),
            store: self.store.clone(),
            epoch,
            silent,
            trigger,
            fallback_ttl: self.fallback_ttl,
        };
        let guard = ClearInFlight {
            slot: self.in_flight.clone(),
            id,
        };

        let task = tokio::spawn(async move {
            let _guard = guard;
            let store = ctx.store.clone();
            let epoch = ctx.epoch;
            match AssertUnwindSafe(run_attempt(ctx)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(attempt = id, "Refresh attempt panicked");
                    let _ = store.transition_in_epoch(epoch, &SessionInput::RefreshFaulted, |s| {
                        s.clear_credentials();
                        s.refresh_attempted = true;
                    });
                    RefreshOutcome::failed(RefreshFailure::Internal(
                        "refresh attempt panicked".to_string(),
                    ))
                }
            }
        });

        async move {
            task.await.unwrap_or_else(|err| {
                RefreshOutcome::failed(RefreshFailure::Internal(format!(
                    "refresh task ended: {}",
                    err
                )))
            })
        }
        .boxed()
        .shared()
    }
}

async fn run_attempt(ctx: AttemptContext) -> RefreshOutcome {
    info!(trigger = ?ctx.trigger, silent = ctx.silent, "Refreshing session");

    match ctx.provider.refresh().await {
        Ok(RefreshGrant::Credential { expires_in }) => {
            let (expires_at, deadline) = access_window(expires_in, ctx.fallback_ttl);
            let applied =
                ctx.store
                    .transition_in_epoch(ctx.epoch, &SessionInput::RefreshSucceeded, |session| {
                        session.clear_credentials();
                        session.access_token_present = true;
                        session.last_refreshed_at = Some(Utc::now());
                        session.access_expires_at = Some(expires_at);
                        session.access_deadline = Some(deadline);
                        session.refresh_attempted = true;
                    });
            match applied {
                Ok(true) => {
                    info!(expires_at = %expires_at, "Session refreshed");
                    RefreshOutcome::Ok { expires_at }
                }
                Ok(false) => RefreshOutcome::failed(RefreshFailure::Superseded),
                Err(err) => RefreshOutcome::failed(RefreshFailure::Internal(err.to_string())),
            }
        }
        Ok(RefreshGrant::Challenge {
            challenge_id,
            masked_phone,
        }) if !ctx.silent => {
            let applied =
                ctx.store
                    .transition_in_epoch(ctx.epoch, &SessionInput::ChallengeIssued, |session| {
                        session.clear_credentials();
                        session.challenge_id = Some(challenge_id);
                        session.masked_phone = masked_phone;
                        session.refresh_attempted = true;
                    });
            match applied {
                Ok(true) => {
                    info!("Refresh requires verification challenge");
                    RefreshOutcome::failed(RefreshFailure::ChallengeRequired)
                }
                Ok(false) => RefreshOutcome::failed(RefreshFailure::Superseded),
                Err(err) => RefreshOutcome::failed(RefreshFailure::Internal(err.to_string())),
            }
        }
        Ok(RefreshGrant::Challenge { .. }) => fail(&ctx, RefreshFailure::ChallengeRequired),
        Ok(RefreshGrant::NoCredential) => fail(&ctx, RefreshFailure::NoCredential),
        Err(err) => fail(&ctx, RefreshFailure::from(&err)),
    }
}

fn fail(ctx: &AttemptContext, reason: RefreshFailure) -> RefreshOutcome {
    warn!(trigger = ?ctx.trigger, reason = %reason, "Session refresh failed");
    let applied = ctx
        .store
        .transition_in_epoch(ctx.epoch, &SessionInput::RefreshFailed, |session| {
            session.clear_credentials();
            session.refresh_attempted = true;
        });
    match applied {
        Ok(true) => RefreshOutcome::failed(reason),
        Ok(false) => RefreshOutcome::failed(RefreshFailure::Superseded),
        Err(err) => RefreshOutcome::failed(RefreshFailure::Internal(err.to_string())),
    }
}

/// Wall-clock expiry and monotonic deadline for a newly issued credential.
///
/// A reported lifetime longer than the refresh credential's is not trusted;
/// `fallback` is used instead.
fn access_window(reported: Option<Duration>, fallback: Duration) -> (DateTime<Utc>, Instant) {
    let lifetime = match reported {
        Some(lifetime) if lifetime <= MAX_ACCESS_LIFETIME => lifetime,
        Some(lifetime) => {
            warn!(
                reported_secs = lifetime.as_secs(),
                fallback_secs = fallback.as_secs(),
                "Ignoring implausible access lifetime"
            );
            fallback
        }
        None => fallback,
    };
    let now = Instant::now();
    let deadline = now
        .checked_add(lifetime)
        .or_else(|| now.checked_add(MAX_ACCESS_LIFETIME))
        .unwrap_or(now);
    (expiry_from_now(lifetime), deadline)
}

fn expiry_from_now(lifetime: Duration) -> DateTime<Utc> {
    let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(lifetime)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
