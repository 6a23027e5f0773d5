//! Route gating driven by session status.

use crate::session_fsm::{Session, SessionStatus};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Current location inside the application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub pathname: String,
    /// Query string including the leading `?`, or empty.
    pub search: String,
}

impl Location {
    pub fn new(pathname: impl Into<String>, search: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            search: search.into(),
        }
    }
}

/// Performs navigation on behalf of the gate.
pub trait Navigator: Send + Sync {
    fn redirect(&self, target: &str);
}

/// What a protected route should render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateView {
    Loading,
    Protected,
    /// Hand over to the verification flow.
    Verification { masked_phone: Option<String> },
    Redirecting { target: String },
}

/// Read-only consumer of session state for protected routes.
///
/// An anonymous or failed session triggers one redirect to the login entry
/// point per pathname; the guard resets when the pathname changes.
pub struct ProtectedRouteGate {
    login_path: String,
    navigator: Arc<dyn Navigator>,
    redirected_for: Option<String>,
}

impl ProtectedRouteGate {
    pub fn new(login_path: impl Into<String>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            login_path: login_path.into(),
            navigator,
            redirected_for: None,
        }
    }

    pub fn evaluate(&mut self, session: &Session, location: &Location) -> GateView {
        if self
            .redirected_for
            .as_ref()
            .is_some_and(|pathname| *pathname != location.pathname)
        {
            self.redirected_for = None;
        }

        match session.status {
            SessionStatus::Uninitialized | SessionStatus::Refreshing => GateView::Loading,
            SessionStatus::Authenticated => GateView::Protected,
            SessionStatus::OtpPending => GateView::Verification {
                masked_phone: session.masked_phone.clone(),
            },
            SessionStatus::Anonymous | SessionStatus::Error => {
                let target = self.login_target(location);
                if self.redirected_for.is_none() {
                    info!(pathname = %location.pathname, "Redirecting to login");
                    self.navigator.redirect(&target);
                    self.redirected_for = Some(location.pathname.clone());
                } else {
                    debug!(pathname = %location.pathname, "Redirect already issued");
                }
                GateView::Redirecting { target }
            }
        }
    }

    /// `<login>?returnTo=<encoded path and query>`.
    pub fn login_target(&self, location: &Location) -> String {
        let return_to = format!("{}{}", location.pathname, location.search);
        let encoded: String = url::form_urlencoded::byte_serialize(return_to.as_bytes()).collect();
        format!("{}?returnTo={}", self.login_path, encoded)
    }

    /// Re-evaluate on every session or location change, publishing views,
    /// until either source closes.
    pub async fn drive(
        mut self,
        mut session: watch::Receiver<Session>,
        mut location: watch::Receiver<Location>,
        views: watch::Sender<GateView>,
    ) {
        loop {
            let view = {
                let current_session = session.borrow_and_update().clone();
                let current_location = location.borrow_and_update().clone();
                self.evaluate(&current_session, &current_location)
            };
            views.send_replace(view);

            tokio::select! {
                changed = session.changed() => if changed.is_err() { break },
                changed = location.changed() => if changed.is_err() { break },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingNavigator {
        redirects: Mutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn redirect(&self, target: &str) {
            self.redirects.lock().push(target.to_string());
        }
    }

    fn session(status: SessionStatus) -> Session {
        Session {
            status,
            ..Session::default()
        }
    }

    #[test]
    fn test_pending_states_render_loading_without_navigation() {
        let navigator = Arc::new(RecordingNavigator::default());
        let mut gate = ProtectedRouteGate::new("/login", navigator.clone());
        let here = Location::new("/bills", "");

        assert_eq!(gate.evaluate(&session(SessionStatus::Uninitialized), &here), GateView::Loading);
        assert_eq!(gate.evaluate(&session(SessionStatus::Refreshing), &here), GateView::Loading);
        assert!(navigator.redirects.lock().is_empty());
    }

    #[test]
    fn test_anonymous_redirects_once_per_pathname() {
        let navigator = Arc::new(RecordingNavigator::default());
        let mut gate = ProtectedRouteGate::new("/login", navigator.clone());
        let anonymous = session(SessionStatus::Anonymous);
        let here = Location::new("/bills/42", "?tab=open");

        gate.evaluate(&anonymous, &here);
        gate.evaluate(&anonymous, &here);
        gate.evaluate(&anonymous, &Location::new("/bills/42", "?tab=paid"));

        assert_eq!(
            *navigator.redirects.lock(),
            vec!["/login?returnTo=%2Fbills%2F42%3Ftab%3Dopen".to_string()]
        );

        gate.evaluate(&anonymous, &Location::new("/facilities", ""));
        assert_eq!(navigator.redirects.lock().len(), 2);
    }

    #[test]
    fn test_other_states_do_not_redirect() {
        let navigator = Arc::new(RecordingNavigator::default());
        let mut gate = ProtectedRouteGate::new("/login", navigator.clone());
        let here = Location::new("/wallet", "");

        assert_eq!(gate.evaluate(&session(SessionStatus::Authenticated), &here), GateView::Protected);

        let mut pending = session(SessionStatus::OtpPending);
        pending.masked_phone = Some("***-1234".into());
        assert_eq!(
            gate.evaluate(&pending, &here),
            GateView::Verification {
                masked_phone: Some("***-1234".into())
            }
        );
        assert!(navigator.redirects.lock().is_empty());
    }

    #[test]
    fn test_failed_session_redirects_once() {
        let navigator = Arc::new(RecordingNavigator::default());
        let mut gate = ProtectedRouteGate::new("/login", navigator.clone());
        let here = Location::new("/surveys", "?id=7");

        let view = gate.evaluate(&session(SessionStatus::Error), &here);
        assert_eq!(
            view,
            GateView::Redirecting {
                target: "/login?returnTo=%2Fsurveys%3Fid%3D7".to_string()
            }
        );
        gate.evaluate(&session(SessionStatus::Error), &here);
        gate.evaluate(&session(SessionStatus::Anonymous), &here);

        assert_eq!(navigator.redirects.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_drive_follows_session_changes() {
        let navigator = Arc::new(RecordingNavigator::default());
        let gate = ProtectedRouteGate::new("/login", navigator.clone());
        let (session_tx, session_rx) = watch::channel(session(SessionStatus::Refreshing));
        let (location_tx, location_rx) = watch::channel(Location::new("/tours", ""));
        let (views_tx, mut views_rx) = watch::channel(GateView::Loading);

        let task = tokio::spawn(gate.drive(session_rx, location_rx, views_tx));

        session_tx.send_replace(session(SessionStatus::Anonymous));
        views_rx
            .wait_for(|view| matches!(view, GateView::Redirecting { .. }))
            .await
            .unwrap();
        assert_eq!(
            *navigator.redirects.lock(),
            vec!["/login?returnTo=%2Ftours".to_string()]
        );

        drop(session_tx);
        drop(location_tx);
        task.await.unwrap();
    }
}
