//! Connector lifecycle states and their atomic storage.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a source connector.
///
/// Exactly one state exists per connector instance. The delivery loop owns
/// the transitions once the connector is started; the lifecycle surface
/// drives `Created -> Starting -> Running` and the terminal edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectorState {
    /// Constructed, never started.
    Created = 0,
    /// `start()` accepted; opening the subscription.
    Starting = 1,
    /// Receiving, decoding, and emitting messages.
    Running = 2,
    /// Gate closed; the loop is parked and not receiving.
    Paused = 3,
    /// Connection lost; the loop is re-establishing the subscription.
    Reconnecting = 4,
    /// Stopped by request. Terminal.
    Stopped = 5,
    /// Startup failed or the reconnect budget was exhausted. Terminal.
    Failed = 6,
}

impl ConnectorState {
    /// Returns `true` for states that no transition can leave.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Reconnecting,
            5 => Self::Stopped,
            6 => Self::Failed,
            _ => Self::Created,
        }
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Atomically-observed state variable shared between the delivery loop and
/// the control surface.
///
/// Plain loads and stores; no lock is involved, so control-side reads never
/// contend with the loop's receive cycle.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Creates a cell in [`ConnectorState::Created`].
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnectorState::Created as u8))
    }

    /// Returns the current state.
    #[must_use]
    pub fn get(&self) -> ConnectorState {
        ConnectorState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Stores a new state unconditionally.
    pub fn set(&self, state: ConnectorState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Transitions from `expected` to `next` if the cell still holds
    /// `expected`. Returns the state found on failure.
    ///
    /// # Errors
    ///
    /// Returns the observed state when it differs from `expected`.
    pub fn transition(
        &self,
        expected: ConnectorState,
        next: ConnectorState,
    ) -> Result<(), ConnectorState> {
        self.0
            .compare_exchange(
                expected as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(ConnectorState::from_u8)
    }

    /// Moves the cell into the terminal state `next` unless it already
    /// holds a terminal state. Returns `true` when this call made the
    /// transition; racing callers observe `false`, so work tied to the
    /// terminal edge runs at most once.
    #[must_use]
    pub fn enter_terminal(&self, next: ConnectorState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if ConnectorState::from_u8(current).is_terminal() {
                    None
                } else {
                    Some(next as u8)
                }
            })
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_created() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ConnectorState::Created);
    }

    #[test]
    fn test_set_and_get() {
        let cell = StateCell::new();
        cell.set(ConnectorState::Running);
        assert_eq!(cell.get(), ConnectorState::Running);
    }

    #[test]
    fn test_transition_succeeds_from_expected() {
        let cell = StateCell::new();
        assert!(cell
            .transition(ConnectorState::Created, ConnectorState::Starting)
            .is_ok());
        assert_eq!(cell.get(), ConnectorState::Starting);
    }

    #[test]
    fn test_transition_reports_actual_state() {
        let cell = StateCell::new();
        cell.set(ConnectorState::Stopped);
        let err = cell
            .transition(ConnectorState::Created, ConnectorState::Starting)
            .unwrap_err();
        assert_eq!(err, ConnectorState::Stopped);
        assert_eq!(cell.get(), ConnectorState::Stopped);
    }

    #[test]
    fn test_enter_terminal_first_caller_wins() {
        let cell = StateCell::new();
        cell.set(ConnectorState::Running);
        assert!(cell.enter_terminal(ConnectorState::Stopped));
        assert!(!cell.enter_terminal(ConnectorState::Stopped));
        assert_eq!(cell.get(), ConnectorState::Stopped);
    }

    #[test]
    fn test_enter_terminal_keeps_existing_terminal_state() {
        let cell = StateCell::new();
        cell.set(ConnectorState::Failed);
        assert!(!cell.enter_terminal(ConnectorState::Stopped));
        assert_eq!(cell.get(), ConnectorState::Failed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConnectorState::Stopped.is_terminal());
        assert!(ConnectorState::Failed.is_terminal());
        assert!(!ConnectorState::Running.is_terminal());
        assert!(!ConnectorState::Paused.is_terminal());
        assert!(!ConnectorState::Reconnecting.is_terminal());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectorState::Created.to_string(), "created");
        assert_eq!(ConnectorState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectorState::Failed.to_string(), "failed");
    }
}
