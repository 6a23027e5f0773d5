//! Single-writer session store.
//!
//! The FSM and the published [`Session`] change together under one lock, so
//! subscribers never observe a status the machine did not reach. Writes are
//! crate-private: only the refresh coordinator and the logout action mutate.

use crate::session_fsm::{Session, SessionInput, SessionMachine, SessionStatus};
use crate::{AuthError, AuthResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::debug;

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// One status change, in the order it was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub epoch: u64,
}

pub struct SessionStateStore {
    machine: Mutex<SessionMachine>,
    session: watch::Sender<Session>,
    changes: broadcast::Sender<StatusChange>,
    /// Bumped on every logout. Refresh results from an older epoch are dropped.
    epoch: AtomicU64,
}

impl Default for SessionStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateStore {
    pub fn new() -> Self {
        let (session, _) = watch::channel(Session::default());
        let (changes, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            machine: Mutex::new(SessionMachine::new()),
            session,
            changes,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.session.borrow().status
    }

    /// Latest-value subscription to the whole session.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    /// Every status change, in order.
    pub fn changes(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Apply `input` and `update`, returning the epoch the change landed in.
    pub(crate) fn transition(
        &self,
        input: &SessionInput,
        update: impl FnOnce(&mut Session),
    ) -> AuthResult<u64> {
        let mut machine = self.machine.lock();
        let epoch = self.epoch();
        self.apply(&mut machine, input, epoch, update)?;
        Ok(epoch)
    }

    /// Like [`transition`](Self::transition), but only if no logout happened
    /// since `epoch`. Returns `false` when the change was discarded.
    pub(crate) fn transition_in_epoch(
        &self,
        epoch: u64,
        input: &SessionInput,
        update: impl FnOnce(&mut Session),
    ) -> AuthResult<bool> {
        let mut machine = self.machine.lock();
        if self.epoch() != epoch {
            debug!(
                input = ?input,
                stale_epoch = epoch,
                current_epoch = self.epoch(),
                "Discarding session update from before logout"
            );
            return Ok(false);
        }
        self.apply(&mut machine, input, epoch, update)?;
        Ok(true)
    }

    /// Explicit logout: always lands in `Anonymous` and starts a new epoch.
    pub(crate) fn logout(&self) -> u64 {
        let mut machine = self.machine.lock();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.apply(&mut machine, &SessionInput::LogoutRequested, epoch, |session| {
            session.clear_credentials();
        });
        if let Err(err) = result {
            // Every state has a logout edge; reaching this means the table changed.
            debug!(error = %err, "Logout transition rejected");
        }
        epoch
    }

    fn apply(
        &self,
        machine: &mut SessionMachine,
        input: &SessionInput,
        epoch: u64,
        update: impl FnOnce(&mut Session),
    ) -> AuthResult<()> {
        let old_status = SessionStatus::from(machine.state());
        machine.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                machine.state()
            ))
        })?;
        let new_status = SessionStatus::from(machine.state());

        self.session.send_modify(|session| {
            session.status = new_status;
            update(session);
        });

        if old_status != new_status {
            debug!(
                old_status = %old_status,
                new_status = %new_status,
                epoch,
                "Session state transition"
            );
            let _ = self.changes.send(StatusChange {
                from: old_status,
                to: new_status,
                epoch,
            });
        }

        Ok(())
    }
}
