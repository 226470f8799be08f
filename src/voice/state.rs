//! Conversational turn state
//!
//! The backend drives most transitions through `state` events; the client
//! only moves on connect, disconnect, disable and manual activation.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Turn-taking state shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Voice feature off or not connected
    #[default]
    Disabled,
    /// Connected, waiting for the wake trigger
    Listening,
    /// Live two-way audio exchange
    Active,
    /// Backend computing a response
    Processing,
}

impl TurnState {
    /// Wire name of the state
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Listening => "listening",
            Self::Active => "active",
            Self::Processing => "processing",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend state value outside the known set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl FromStr for TurnState {
    type Err = UnknownState;

    /// Parse a backend-reported state
    ///
    /// Only the three states the backend may announce are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listening" => Ok(Self::Listening),
            "active" => Ok(Self::Active),
            "processing" => Ok(Self::Processing),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// A recorded state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the change
    pub from: TurnState,
    /// State after the change
    pub to: TurnState,
}

/// Tracks the current [`TurnState`]
#[derive(Debug, Default)]
pub struct TurnStateMachine {
    state: TurnState,
}

impl TurnStateMachine {
    /// Start in [`TurnState::Disabled`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Socket opened
    pub fn on_connected(&mut self) -> Option<Transition> {
        self.set(TurnState::Listening)
    }

    /// Socket closed; the connection may still be desired
    pub fn on_disconnected(&mut self) -> Option<Transition> {
        self.set(TurnState::Disabled)
    }

    /// Feature turned off
    pub fn disable(&mut self) -> Option<Transition> {
        self.set(TurnState::Disabled)
    }

    /// Apply a backend `state` event
    ///
    /// Every known value is accepted regardless of the current state.
    /// Unknown values are logged and leave the state untouched.
    pub fn apply_backend_state(&mut self, raw: &str) -> Option<Transition> {
        match raw.parse::<TurnState>() {
            Ok(next) => self.set(next),
            Err(UnknownState(value)) => {
                tracing::warn!(
                    state = %value,
                    current = %self.state,
                    "ignoring unknown backend state"
                );
                None
            }
        }
    }

    /// Local wake trigger
    ///
    /// Only moves `listening -> active`; returns `None` from any other state.
    pub fn activate(&mut self) -> Option<Transition> {
        if self.state == TurnState::Listening {
            self.set(TurnState::Active)
        } else {
            tracing::debug!(current = %self.state, "activation ignored");
            None
        }
    }

    fn set(&mut self, next: TurnState) -> Option<Transition> {
        if self.state == next {
            return None;
        }
        let transition = Transition {
            from: self.state,
            to: next,
        };
        tracing::debug!(from = %transition.from, to = %transition.to, "turn state changed");
        self.state = next;
        Some(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listening() -> TurnStateMachine {
        let mut sm = TurnStateMachine::new();
        sm.on_connected();
        sm
    }

    #[test]
    fn starts_disabled() {
        assert_eq!(TurnStateMachine::new().state(), TurnState::Disabled);
    }

    #[test]
    fn connect_moves_to_listening() {
        let mut sm = TurnStateMachine::new();
        let t = sm.on_connected().unwrap();
        assert_eq!(t.from, TurnState::Disabled);
        assert_eq!(t.to, TurnState::Listening);
    }

    #[test]
    fn full_turn_cycle() {
        let mut sm = listening();
        sm.apply_backend_state("active");
        assert_eq!(sm.state(), TurnState::Active);
        sm.apply_backend_state("processing");
        assert_eq!(sm.state(), TurnState::Processing);
        sm.apply_backend_state("listening");
        assert_eq!(sm.state(), TurnState::Listening);
    }

    #[test]
    fn processing_can_return_to_active() {
        let mut sm = listening();
        sm.apply_backend_state("processing");
        sm.apply_backend_state("active");
        assert_eq!(sm.state(), TurnState::Active);
    }

    #[test]
    fn backend_may_skip_active() {
        let mut sm = listening();
        let t = sm.apply_backend_state("processing").unwrap();
        assert_eq!(t.from, TurnState::Listening);
        assert_eq!(sm.state(), TurnState::Processing);
    }

    #[test]
    fn unknown_backend_state_is_ignored() {
        let mut sm = listening();
        sm.apply_backend_state("active");
        assert!(sm.apply_backend_state("dancing").is_none());
        assert!(sm.apply_backend_state("disabled").is_none());
        assert_eq!(sm.state(), TurnState::Active);
    }

    #[test]
    fn manual_activation_only_from_listening() {
        let mut sm = TurnStateMachine::new();
        assert!(sm.activate().is_none());

        let mut sm = listening();
        assert_eq!(sm.activate().unwrap().to, TurnState::Active);
        assert!(sm.activate().is_none());
    }

    #[test]
    fn disable_from_any_state() {
        let mut sm = listening();
        sm.apply_backend_state("processing");
        sm.disable();
        assert_eq!(sm.state(), TurnState::Disabled);
    }

    #[test]
    fn repeated_state_is_not_a_transition() {
        let mut sm = listening();
        assert!(sm.apply_backend_state("listening").is_none());
    }
}
