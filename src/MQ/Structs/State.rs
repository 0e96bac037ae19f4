use std::fmt;

/// Lifecycle of a local queue.
///
/// `Active -> Closing -> Closed`, with `Destroying` reachable from any state.
/// Nothing leaves `Closed` or `Destroying` except a move to `Destroying`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MqMachineState {
    Active,
    Closing,
    Closed,
    Destroying,
}

impl MqMachineState {
    pub fn name(self) -> &'static str {
        match self {
            MqMachineState::Active => "ACTIVE",
            MqMachineState::Closing => "CLOSING",
            MqMachineState::Closed => "CLOSED",
            MqMachineState::Destroying => "DESTROYING",
        }
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition(self, next: MqMachineState) -> bool {
        use MqMachineState::*;
        matches!(
            (self, next),
            (Active, Closing) | (Closing, Closed) | (Active | Closing | Closed, Destroying)
        )
    }

    /// A terminal state never changes again except to `Destroying`.
    pub fn is_finished(self) -> bool {
        matches!(self, MqMachineState::Closed | MqMachineState::Destroying)
    }
}

impl fmt::Display for MqMachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
