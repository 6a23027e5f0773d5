//! Background refresh worker.
//!
//! Runs as its own task, reached only through messages. It refreshes through
//! the same [`RefreshCoordinator`] as the foreground, so the session store is
//! the single place results land, and broadcasts each outcome to listeners.

use crate::coordinator::{RefreshCoordinator, RefreshFailure, RefreshOutcome, RefreshTrigger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

const REQUEST_CHANNEL_CAPACITY: usize = 16;
const MESSAGE_CHANNEL_CAPACITY: usize = 32;

/// Outcome notices sent to every foreground listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackgroundMessage {
    RefreshSucceeded {
        #[serde(rename = "expiresAt")]
        expires_at: DateTime<Utc>,
    },
    RefreshFailed {
        reason: String,
    },
    RefreshError {
        message: String,
    },
}

impl From<&RefreshOutcome> for BackgroundMessage {
    fn from(outcome: &RefreshOutcome) -> Self {
        match outcome {
            RefreshOutcome::Ok { expires_at } => BackgroundMessage::RefreshSucceeded {
                expires_at: *expires_at,
            },
            RefreshOutcome::Failed {
                reason: RefreshFailure::Internal(message),
            } => BackgroundMessage::RefreshError {
                message: message.clone(),
            },
            RefreshOutcome::Failed { reason } => BackgroundMessage::RefreshFailed {
                reason: reason.to_string(),
            },
        }
    }
}

#[derive(Debug)]
enum BackgroundRequest {
    Register { due_at: Instant },
    Cancel,
}

/// Cloneable sender used to schedule work on the background worker.
#[derive(Clone)]
pub struct BackgroundHandle {
    requests: mpsc::Sender<BackgroundRequest>,
}

impl BackgroundHandle {
    /// Ask for a refresh at `due_at`, replacing any earlier registration.
    pub async fn register(&self, due_at: Instant) {
        if self
            .requests
            .send(BackgroundRequest::Register { due_at })
            .await
            .is_err()
        {
            debug!("Background worker gone, registration dropped");
        }
    }

    pub async fn cancel(&self) {
        let _ = self.requests.send(BackgroundRequest::Cancel).await;
    }
}

pub struct BackgroundRefreshWorker {
    handle: BackgroundHandle,
    messages: broadcast::Sender<BackgroundMessage>,
    task: JoinHandle<()>,
}

impl BackgroundRefreshWorker {
    pub fn spawn(coordinator: Arc<RefreshCoordinator>) -> Self {
        let (requests, receiver) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (messages, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let task = tokio::spawn(run_worker(coordinator, receiver, messages.clone()));

        Self {
            handle: BackgroundHandle { requests },
            messages,
            task,
        }
    }

    pub fn handle(&self) -> BackgroundHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackgroundMessage> {
        self.messages.subscribe()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for BackgroundRefreshWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_worker(
    coordinator: Arc<RefreshCoordinator>,
    mut requests: mpsc::Receiver<BackgroundRequest>,
    messages: broadcast::Sender<BackgroundMessage>,
) {
    let mut due: Option<Instant> = None;

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(BackgroundRequest::Register { due_at }) => {
                    debug!("Background refresh registered");
                    due = Some(due_at);
                }
                Some(BackgroundRequest::Cancel) => {
                    if due.take().is_some() {
                        debug!("Background refresh cancelled");
                    }
                }
                None => break,
            },
            _ = sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                due = None;
                let outcome = coordinator.refresh_for(RefreshTrigger::Background).await;
                let message = BackgroundMessage::from(&outcome);
                info!(message = ?message, "Background refresh finished");
                // No listeners is fine; the session store already has the result.
                let _ = messages.send(message);
            }
        }
    }
}
