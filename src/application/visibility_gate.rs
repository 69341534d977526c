// Visibility gate - Suspends acquisition while the page is hidden
use serde::{Deserialize, Serialize};

/// Something with a start/stop lifecycle the gate can drive.
pub trait Pollable {
    fn start(&self);
    fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

impl Visibility {
    pub fn from_hidden(hidden: bool) -> Self {
        if hidden { Self::Hidden } else { Self::Visible }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    Active,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    Start,
    Stop,
}

impl GateState {
    pub fn initial(visibility: Visibility) -> Self {
        match visibility {
            Visibility::Visible => Self::Active,
            Visibility::Hidden => Self::Suspended,
        }
    }

    /// Next state for a visibility signal; repeated signals are no-ops.
    pub fn transition(self, visibility: Visibility) -> (GateState, Option<GateAction>) {
        match (self, visibility) {
            (GateState::Active, Visibility::Hidden) => (GateState::Suspended, Some(GateAction::Stop)),
            (GateState::Suspended, Visibility::Visible) => (GateState::Active, Some(GateAction::Start)),
            (state, _) => (state, None),
        }
    }
}

/// Throttled background timers fire late and break bucket alignment, so
/// acquisition is stopped entirely while hidden rather than left running.
#[derive(Debug, Clone, Copy)]
pub struct VisibilityGate {
    state: GateState,
}

impl VisibilityGate {
    pub fn new(initial: Visibility) -> Self {
        Self {
            state: GateState::initial(initial),
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == GateState::Active
    }

    /// Apply a visibility signal, driving `target` when the state changes.
    pub fn signal(&mut self, visibility: Visibility, target: Option<&dyn Pollable>) -> Option<GateAction> {
        let (next, action) = self.state.transition(visibility);
        self.state = next;
        if let (Some(action), Some(target)) = (action, target) {
            Self::apply(action, target);
        }
        if action.is_some() {
            tracing::info!(state = ?next, "visibility gate transition");
        }
        action
    }

    /// Bring a freshly built target in line with the current state.
    pub fn attach(&self, target: &dyn Pollable) {
        match self.state {
            GateState::Active => target.start(),
            GateState::Suspended => target.stop(),
        }
    }

    fn apply(action: GateAction, target: &dyn Pollable) {
        match action {
            GateAction::Start => target.start(),
            GateAction::Stop => target.stop(),
        }
    }
}
