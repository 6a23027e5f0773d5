//! Proactive refresh ahead of access expiry.

use crate::background::BackgroundHandle;
use crate::coordinator::{RefreshCoordinator, RefreshTrigger};
use crate::session_fsm::{Session, SessionStatus};
use crate::store::SessionStateStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Whether the application is in the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Foreground,
    Background,
}

#[derive(Debug)]
enum SchedulerCommand {
    Visibility(Visibility),
}

/// Fires a refresh at `expiry - margin`, re-arming from every new expiry.
///
/// The timer follows the session store: a successful refresh publishes a new
/// deadline and re-arms it, a logout clears it. In the background the timer is
/// handed to the [`BackgroundHandle`] instead of firing locally.
pub struct ProactiveRefreshScheduler {
    commands: mpsc::Sender<SchedulerCommand>,
    next_fire: Arc<Mutex<Option<Instant>>>,
    task: JoinHandle<()>,
}

impl ProactiveRefreshScheduler {
    pub fn spawn(
        coordinator: Arc<RefreshCoordinator>,
        store: &SessionStateStore,
        background: BackgroundHandle,
        margin: Duration,
    ) -> Self {
        let (commands, receiver) = mpsc::channel(8);
        let next_fire = Arc::new(Mutex::new(None));
        let task = tokio::spawn(
            SchedulerLoop {
                coordinator,
                background,
                margin,
                next_fire: next_fire.clone(),
                visibility: Visibility::Foreground,
                fired_for: None,
                registered: None,
                planned: None,
            }
            .run(store.subscribe(), receiver),
        );

        Self {
            commands,
            next_fire,
            task,
        }
    }

    /// When the local timer will fire, if armed.
    pub fn next_fire_at(&self) -> Option<Instant> {
        *self.next_fire.lock()
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        if let Err(err) = self
            .commands
            .try_send(SchedulerCommand::Visibility(visibility))
        {
            warn!(error = %err, "Visibility change dropped");
        }
    }

    pub fn shutdown(&self) {
        self.task.abort();
        *self.next_fire.lock() = None;
    }
}

impl Drop for ProactiveRefreshScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct SchedulerLoop {
    coordinator: Arc<RefreshCoordinator>,
    background: BackgroundHandle,
    margin: Duration,
    next_fire: Arc<Mutex<Option<Instant>>>,
    visibility: Visibility,
    /// Deadline the last proactive refresh was fired for.
    fired_for: Option<Instant>,
    /// Fire time currently registered with the background worker.
    registered: Option<Instant>,
    /// Fire time planned for a deadline, fixed when the deadline is first seen.
    planned: Option<(Instant, Instant)>,
}

impl SchedulerLoop {
    async fn run(
        mut self,
        mut session: watch::Receiver<Session>,
        mut commands: mpsc::Receiver<SchedulerCommand>,
    ) {
        loop {
            let target = {
                let current = session.borrow_and_update();
                self.fire_time(&current)
            };
            let armed = self.arm(target).await;

            tokio::select! {
                changed = session.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                command = commands.recv() => match command {
                    Some(SchedulerCommand::Visibility(visibility)) => {
                        debug!(visibility = ?visibility, "Visibility changed");
                        self.visibility = visibility;
                    }
                    None => break,
                },
                _ = sleep_until(armed.unwrap_or_else(Instant::now)), if armed.is_some() => {
                    self.fired_for = session.borrow().access_deadline;
                    *self.next_fire.lock() = None;
                    info!("Proactive refresh firing");
                    let outcome = self.coordinator.refresh_for(RefreshTrigger::Proactive).await;
                    debug!(outcome = ?outcome, "Proactive refresh finished");
                }
            }
        }

        *self.next_fire.lock() = None;
    }

    /// `deadline - margin` for an authenticated session not yet refreshed for.
    ///
    /// The lead never exceeds half the lifetime remaining when the deadline
    /// is first seen, so a margin longer than the token lifetime cannot fire
    /// back to back. Later wakeups reuse the planned time.
    fn fire_time(&mut self, session: &Session) -> Option<Instant> {
        if session.status != SessionStatus::Authenticated {
            return None;
        }
        let deadline = session.access_deadline?;
        if self.fired_for == Some(deadline) {
            return None;
        }
        if let Some((planned_for, at)) = self.planned {
            if planned_for == deadline {
                return Some(at);
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        let lead = self.margin.min(remaining / 2);
        let at = deadline.checked_sub(lead).unwrap_or(deadline);
        self.planned = Some((deadline, at));
        Some(at)
    }

    /// Publish the target, hand it to the background worker when hidden, and
    /// return the local timer to wait on.
    async fn arm(&mut self, target: Option<Instant>) -> Option<Instant> {
        match self.visibility {
            Visibility::Foreground => {
                if self.registered.take().is_some() {
                    self.background.cancel().await;
                }
                let mut next_fire = self.next_fire.lock();
                if *next_fire != target {
                    if let Some(at) = target {
                        debug!(
                            in_secs = at.saturating_duration_since(Instant::now()).as_secs(),
                            "Proactive refresh scheduled"
                        );
                    } else if next_fire.is_some() {
                        debug!("Proactive refresh cancelled");
                    }
                    *next_fire = target;
                }
                target
            }
            Visibility::Background => {
                *self.next_fire.lock() = None;
                if self.registered != target {
                    match target {
                        Some(at) => self.background.register(at).await,
                        None => self.background.cancel().await,
                    }
                    self.registered = target;
                }
                None
            }
        }
    }
}
