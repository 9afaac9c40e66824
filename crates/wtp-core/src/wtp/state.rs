//! WTP supervisory states.

use std::fmt;

/// State of the WTP control plane. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WtpState {
    /// Not started
    #[default]
    Idle,
    /// Looking for an AC
    Discovery,
    /// Backing off after fruitless discovery
    Sulking,
    /// Opening the security session with the selected AC
    SecuritySetup,
    /// Security handshake in flight
    SecurityConnect,
    /// Joining the AC
    Join,
    /// Exchanging configuration
    Configure,
    /// Confirming the data channel
    DataCheck,
    /// Steady state
    Run,
    /// Tearing down a failed session
    Reset,
    /// Terminal
    Dead,
}

impl WtpState {
    /// Whether the state machine may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use WtpState::{
            Configure, DataCheck, Dead, Discovery, Idle, Join, Reset, Run, SecurityConnect,
            SecuritySetup, Sulking,
        };

        if matches!(next, Dead) {
            return !matches!(self, Dead);
        }
        matches!(
            (self, next),
            (Idle, Discovery)
                | (Discovery, SecuritySetup | Sulking)
                | (Sulking, Discovery)
                | (SecuritySetup, SecurityConnect | Discovery)
                | (SecurityConnect, Join | SecuritySetup | Discovery)
                | (Join, Configure | Discovery | Reset)
                | (Configure | DataCheck, Reset)
                | (Configure, DataCheck)
                | (DataCheck, Run)
                | (Run, Reset)
                | (Reset, Discovery)
        )
    }

    /// Whether a control session with the AC exists in this state.
    #[must_use]
    pub const fn has_control_session(self) -> bool {
        matches!(self, Self::Join | Self::Configure | Self::DataCheck | Self::Run)
    }
}

impl fmt::Display for WtpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let path = [
            WtpState::Idle,
            WtpState::Discovery,
            WtpState::SecuritySetup,
            WtpState::SecurityConnect,
            WtpState::Join,
            WtpState::Configure,
            WtpState::DataCheck,
            WtpState::Run,
            WtpState::Reset,
            WtpState::Discovery,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!WtpState::Idle.can_transition_to(WtpState::Run));
        assert!(!WtpState::Discovery.can_transition_to(WtpState::Join));
        assert!(!WtpState::Run.can_transition_to(WtpState::Discovery));
        assert!(!WtpState::Dead.can_transition_to(WtpState::Discovery));
        assert!(!WtpState::Dead.can_transition_to(WtpState::Dead));
    }

    #[test]
    fn test_dead_from_anywhere() {
        for state in [WtpState::Idle, WtpState::Sulking, WtpState::Run, WtpState::Reset] {
            assert!(state.can_transition_to(WtpState::Dead));
        }
    }

    #[test]
    fn test_control_session_states() {
        assert!(WtpState::Run.has_control_session());
        assert!(!WtpState::SecurityConnect.has_control_session());
    }
}
