//! Connection state machine.
//!
//! Disconnected → Connecting → Connected → {Error, Alarm} → {Disconnected, Connecting}.
//! Connecting may also fall to Error on a failed open, or back to Alarm when a
//! recovery command is refused. An explicit close is accepted from any state.

use serde::Serialize;
use std::fmt;

/// Link connection state. Owned by the supervisor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
    Alarm,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
            ConnectionState::Alarm => "alarm",
        };
        f.write_str(s)
    }
}

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    Ok(ConnectionState),
    Rejected(&'static str),
}

/// Events that drive the connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Port open requested (first connect or reconnect attempt).
    Open,
    /// Port opened and configured.
    Opened,
    /// Port could not be opened.
    OpenFailed,
    /// Read/write failure or liveness lost.
    IoFailure,
    /// `ALARM:N`, an Alarm status report, or emergency stop.
    AlarmRaised,
    /// `$X` / `$H` written while in Alarm.
    RecoveryRequested,
    /// Controller acknowledged the recovery command.
    RecoveryAcked,
    /// Reconnect budget exhausted.
    GiveUp,
    /// Explicit disconnect.
    Close,
}

#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl ConnectionStateMachine {
    pub const fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }

    #[inline]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) -> TransitionResult {
        use ConnectionState::*;
        use ConnectionEvent::*;

        let next = match (self.state, event) {
            (Disconnected | Error, Open) => Connecting,

            (Connecting, Opened) => Connected,
            (Connecting, OpenFailed) => Error,

            (Connected | Connecting, IoFailure) => Error,
            // The controller answered nothing after an alarm; start over.
            (Alarm, IoFailure) => Disconnected,

            (Connected | Connecting | Alarm, AlarmRaised) => Alarm,

            (Alarm, RecoveryRequested) => Connecting,
            (Connecting, RecoveryAcked) => Connected,

            (Error, GiveUp) => Disconnected,

            (_, Close) => Disconnected,

            _ => return TransitionResult::Rejected(invalid_transition_reason(self.state)),
        };

        self.state = next;
        TransitionResult::Ok(next)
    }

    /// Commands other than recovery are accepted only here.
    #[inline]
    pub const fn accepts_commands(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// `$X` / `$H` are also accepted in Alarm.
    #[inline]
    pub const fn accepts_recovery(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Alarm
        )
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_transition_reason(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "Disconnected: only Open allowed",
        ConnectionState::Connecting => "Connecting: waiting for open or acknowledgement",
        ConnectionState::Connected => "Connected: invalid event for current state",
        ConnectionState::Error => "Error: only Open, GiveUp or Close allowed",
        ConnectionState::Alarm => "Alarm: only recovery, IoFailure or Close allowed",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;
    use ConnectionEvent::*;

    fn at(state: ConnectionState) -> ConnectionStateMachine {
        ConnectionStateMachine { state }
    }

    #[test]
    fn initial_state_is_disconnected() {
        assert_eq!(ConnectionStateMachine::new().state(), Disconnected);
    }

    #[test]
    fn normal_connect() {
        let mut sm = ConnectionStateMachine::new();
        assert_eq!(sm.handle_event(Open), TransitionResult::Ok(Connecting));
        assert_eq!(sm.handle_event(Opened), TransitionResult::Ok(Connected));
        assert!(sm.accepts_commands());
    }

    #[test]
    fn failed_open_goes_to_error() {
        let mut sm = ConnectionStateMachine::new();
        sm.handle_event(Open);
        assert_eq!(sm.handle_event(OpenFailed), TransitionResult::Ok(Error));
    }

    #[test]
    fn reconnect_cycle() {
        let mut sm = at(Connected);
        assert_eq!(sm.handle_event(IoFailure), TransitionResult::Ok(Error));
        assert_eq!(sm.handle_event(Open), TransitionResult::Ok(Connecting));
        assert_eq!(sm.handle_event(Opened), TransitionResult::Ok(Connected));
    }

    #[test]
    fn give_up_after_error() {
        let mut sm = at(Error);
        assert_eq!(sm.handle_event(GiveUp), TransitionResult::Ok(Disconnected));
    }

    #[test]
    fn alarm_recovery() {
        let mut sm = at(Connected);
        assert_eq!(sm.handle_event(AlarmRaised), TransitionResult::Ok(Alarm));
        assert!(!sm.accepts_commands());
        assert!(sm.accepts_recovery());
        assert_eq!(sm.handle_event(RecoveryRequested), TransitionResult::Ok(Connecting));
        assert_eq!(sm.handle_event(RecoveryAcked), TransitionResult::Ok(Connected));
    }

    #[test]
    fn refused_recovery_returns_to_alarm() {
        let mut sm = at(Connecting);
        assert_eq!(sm.handle_event(AlarmRaised), TransitionResult::Ok(Alarm));
    }

    #[test]
    fn close_from_any_state() {
        for initial in [Disconnected, Connecting, Connected, Error, Alarm] {
            let mut sm = at(initial);
            assert_eq!(
                sm.handle_event(Close),
                TransitionResult::Ok(Disconnected),
                "Close from {initial:?} should → Disconnected"
            );
        }
    }

    #[test]
    fn invalid_transitions_rejected() {
        assert!(matches!(at(Disconnected).handle_event(Opened), TransitionResult::Rejected(_)));
        assert!(matches!(at(Connected).handle_event(Open), TransitionResult::Rejected(_)));
        assert!(matches!(at(Error).handle_event(AlarmRaised), TransitionResult::Rejected(_)));
        assert!(matches!(at(Connected).handle_event(RecoveryAcked), TransitionResult::Rejected(_)));
        assert!(matches!(at(Disconnected).handle_event(IoFailure), TransitionResult::Rejected(_)));
    }
}
