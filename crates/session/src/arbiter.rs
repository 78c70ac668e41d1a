use protocol::Command;
use types::LoadRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadDecision {
    SendOn,
    SendOff,
    #[default]
    NoAction,
}

impl LoadDecision {
    pub fn command(self) -> Option<Command> {
        match self {
            LoadDecision::SendOn => Some(Command::LoadOn),
            LoadDecision::SendOff => Some(Command::LoadOff),
            LoadDecision::NoAction => None,
        }
    }
}

/// Turns the requested load state into a command, skipping writes the
/// controller does not need. An unknown observed state is treated as off.
pub fn decide(requested: LoadRequest, observed_load_on: Option<bool>) -> LoadDecision {
    match (requested, observed_load_on) {
        (LoadRequest::TurnOn, Some(true)) => LoadDecision::NoAction,
        (LoadRequest::TurnOn, _) => LoadDecision::SendOn,
        (LoadRequest::TurnOff, Some(true)) => LoadDecision::SendOff,
        (LoadRequest::TurnOff, _) | (LoadRequest::None, _) => LoadDecision::NoAction,
    }
}
