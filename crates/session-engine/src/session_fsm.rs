//! Session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//!   Uninitialized ──RefreshStarted──► Refreshing ◄──RefreshStarted── Anonymous / Faulted
//!                                         │
//!        ┌────────────────┬───────────────┼──────────────────┐
//!        │ RefreshSucceeded│ RefreshFailed │ ChallengeIssued  │ RefreshFaulted
//!        ▼                ▼               ▼                  ▼
//!   Authenticated      Anonymous      OtpPending          Faulted
//!        │                                │
//!        │ AccessRejected ──► Refreshing  │ ChallengeVerified ──► Authenticated
//!
//!   any state ──LogoutRequested──► Anonymous
//! ```
//!
//! A refresh started while already `Authenticated` (proactive, background or
//! explicit) runs silently and never passes through `Refreshing`: success
//! loops back to `Authenticated`, failure drops to `Anonymous`. A challenge
//! returned by a silent refresh also drops to `Anonymous`; there is no
//! `Authenticated -> OtpPending` edge.

use chrono::{DateTime, Utc};
use rust_fsm::*;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Uninitialized)

    Uninitialized => {
        RefreshStarted => Refreshing,
        LogoutRequested => Anonymous
    },
    Refreshing => {
        RefreshSucceeded => Authenticated,
        RefreshFailed => Anonymous,
        ChallengeIssued => OtpPending,
        RefreshFaulted => Faulted,
        LogoutRequested => Anonymous
    },
    Authenticated => {
        // A protected call came back 401
        AccessRejected => Refreshing,
        // Silent refresh outcomes
        RefreshSucceeded => Authenticated,
        RefreshFailed => Anonymous,
        LogoutRequested => Anonymous
    },
    OtpPending => {
        ChallengeVerified => Authenticated,
        ChallengeResent => OtpPending,
        LogoutRequested => Anonymous
    },
    Anonymous => {
        RefreshStarted => Refreshing,
        LogoutRequested => Anonymous
    },
    Faulted => {
        RefreshStarted => Refreshing,
        LogoutRequested => Anonymous
    }
}

pub use session_machine::Input as SessionInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session status as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Uninitialized,
    Refreshing,
    Authenticated,
    Anonymous,
    OtpPending,
    Error,
}

impl SessionStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionStatus::Authenticated)
    }

    /// Status is still being determined; gates show a neutral loading view.
    pub fn is_pending(&self) -> bool {
        matches!(self, SessionStatus::Uninitialized | SessionStatus::Refreshing)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::Refreshing => "refreshing",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Anonymous => "anonymous",
            SessionStatus::OtpPending => "otp_pending",
            SessionStatus::Error => "error",
        };
        f.write_str(label)
    }
}

impl From<&SessionMachineState> for SessionStatus {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Uninitialized => SessionStatus::Uninitialized,
            SessionMachineState::Refreshing => SessionStatus::Refreshing,
            SessionMachineState::Authenticated => SessionStatus::Authenticated,
            SessionMachineState::Anonymous => SessionStatus::Anonymous,
            SessionMachineState::OtpPending => SessionStatus::OtpPending,
            SessionMachineState::Faulted => SessionStatus::Error,
        }
    }
}

/// Current authentication session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub status: SessionStatus,
    pub access_token_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refreshed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_expires_at: Option<DateTime<Utc>>,
    /// Set once any refresh attempt has finished, so gates do not loop.
    pub refresh_attempted: bool,
    /// Monotonic access expiry, used for scheduling.
    #[serde(skip)]
    pub access_deadline: Option<Instant>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            access_token_present: false,
            challenge_id: None,
            masked_phone: None,
            last_refreshed_at: None,
            access_expires_at: None,
            refresh_attempted: false,
            access_deadline: None,
        }
    }
}

impl Session {
    pub(crate) fn clear_credentials(&mut self) {
        self.access_token_present = false;
        self.access_expires_at = None;
        self.access_deadline = None;
        self.challenge_id = None;
        self.masked_phone = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(path: &[SessionInput]) -> SessionMachine {
        let mut machine = SessionMachine::new();
        for input in path {
            machine.consume(input).unwrap();
        }
        machine
    }

    #[test]
    fn test_initial_state_is_uninitialized() {
        let machine = SessionMachine::new();
        assert_eq!(*machine.state(), SessionMachineState::Uninitialized);
    }

    #[test]
    fn test_refresh_success_flow() {
        let machine = machine_in(&[SessionInput::RefreshStarted, SessionInput::RefreshSucceeded]);
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_refresh_failure_flow() {
        let machine = machine_in(&[SessionInput::RefreshStarted, SessionInput::RefreshFailed]);
        assert_eq!(*machine.state(), SessionMachineState::Anonymous);
    }

    #[test]
    fn test_challenge_flow() {
        let mut machine = machine_in(&[SessionInput::RefreshStarted, SessionInput::ChallengeIssued]);
        assert_eq!(*machine.state(), SessionMachineState::OtpPending);

        machine.consume(&SessionInput::ChallengeResent).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::OtpPending);

        machine.consume(&SessionInput::ChallengeVerified).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_access_rejected_reenters_refreshing() {
        let mut machine =
            machine_in(&[SessionInput::RefreshStarted, SessionInput::RefreshSucceeded]);
        machine.consume(&SessionInput::AccessRejected).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Refreshing);
    }

    #[test]
    fn test_anonymous_is_not_terminal() {
        let mut machine = machine_in(&[SessionInput::RefreshStarted, SessionInput::RefreshFailed]);
        machine.consume(&SessionInput::RefreshStarted).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Refreshing);
    }

    #[test]
    fn test_logout_from_every_state() {
        let paths: Vec<Vec<SessionInput>> = vec![
            vec![],
            vec![SessionInput::RefreshStarted],
            vec![SessionInput::RefreshStarted, SessionInput::RefreshSucceeded],
            vec![SessionInput::RefreshStarted, SessionInput::RefreshFailed],
            vec![SessionInput::RefreshStarted, SessionInput::ChallengeIssued],
            vec![SessionInput::RefreshStarted, SessionInput::RefreshFaulted],
        ];

        for path in paths {
            let mut machine = machine_in(&path);
            machine.consume(&SessionInput::LogoutRequested).unwrap();
            assert_eq!(*machine.state(), SessionMachineState::Anonymous);
        }
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut machine = SessionMachine::new();
        assert!(machine.consume(&SessionInput::RefreshSucceeded).is_err());
        assert!(machine.consume(&SessionInput::ChallengeVerified).is_err());
        assert!(machine.consume(&SessionInput::AccessRejected).is_err());

        let mut machine = machine_in(&[SessionInput::RefreshStarted, SessionInput::ChallengeIssued]);
        assert!(machine.consume(&SessionInput::RefreshSucceeded).is_err());
    }

    #[test]
    fn test_silent_refresh_edges() {
        let authenticated = [SessionInput::RefreshStarted, SessionInput::RefreshSucceeded];

        let mut machine = machine_in(&authenticated);
        machine.consume(&SessionInput::RefreshSucceeded).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);

        let mut machine = machine_in(&authenticated);
        assert!(machine.consume(&SessionInput::ChallengeIssued).is_err());
        machine.consume(&SessionInput::RefreshFailed).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Anonymous);
    }

    #[test]
    fn test_status_conversion() {
        assert_eq!(
            SessionStatus::from(&SessionMachineState::Faulted),
            SessionStatus::Error
        );
        assert_eq!(
            SessionStatus::from(&SessionMachineState::OtpPending),
            SessionStatus::OtpPending
        );
        assert!(SessionStatus::Refreshing.is_pending());
        assert!(!SessionStatus::Anonymous.is_pending());
        assert!(SessionStatus::Authenticated.is_authenticated());
    }

    #[test]
    fn test_session_serializes_camel_case() {
        let session = Session::default();
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["status"], "uninitialized");
        assert_eq!(json["accessTokenPresent"], false);
        assert!(json.get("challengeId").is_none());
    }
}
