//! The six cycle stages and their fixed order.

use serde::{Deserialize, Serialize};

/// One step of the Chorus Cycle.
///
/// The order is fixed: Action → Experience → Intention → Observation →
/// Update → Yield, with a single conditional back-edge from Update to Action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Action,
    Experience,
    Intention,
    Observation,
    Update,
    Yield,
}

impl Stage {
    /// Every stage in pipeline order.
    pub const ORDER: [Stage; 6] = [
        Stage::Action,
        Stage::Experience,
        Stage::Intention,
        Stage::Observation,
        Stage::Update,
        Stage::Yield,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Experience => "experience",
            Self::Intention => "intention",
            Self::Observation => "observation",
            Self::Update => "update",
            Self::Yield => "yield",
        }
    }

    /// 1-based position in the pipeline, as shown to the model.
    pub fn number(&self) -> usize {
        match self {
            Self::Action => 1,
            Self::Experience => 2,
            Self::Intention => 3,
            Self::Observation => 4,
            Self::Update => 5,
            Self::Yield => 6,
        }
    }

    /// The stage immediately after this one in the fixed order.
    pub fn successor(&self) -> Option<Stage> {
        match self {
            Self::Action => Some(Self::Experience),
            Self::Experience => Some(Self::Intention),
            Self::Intention => Some(Self::Observation),
            Self::Observation => Some(Self::Update),
            Self::Update => Some(Self::Yield),
            Self::Yield => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Yield)
    }

    /// Whether `self → to` is an edge of the cycle graph.
    pub fn can_transition_to(&self, to: Stage) -> bool {
        self.successor() == Some(to) || (*self == Self::Update && to == Self::Action)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure transition function.
///
/// Returns the stage that follows `current` given the stage's loop decision,
/// or `None` once Yield has run. Only Update looks at `loop_decision`; a
/// missing decision counts as `false`.
pub fn next_stage(current: Stage, loop_decision: Option<bool>) -> Option<Stage> {
    match current {
        Stage::Update if loop_decision == Some(true) => Some(Stage::Action),
        other => other.successor(),
    }
}
