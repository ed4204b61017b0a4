//! The five-phase daily cycle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::SchedulerError;

/// One stage of the daily cycle.
///
/// Declaration order is cycle order; `nighttime_planning` wraps back to
/// `morning_planning`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    MorningPlanning,
    MorningCheckin,
    MiddayCheckin,
    EveningCheckin,
    NighttimePlanning,
}

impl Phase {
    /// All phases in cycle order.
    pub const ALL: [Phase; 5] = [
        Phase::MorningPlanning,
        Phase::MorningCheckin,
        Phase::MiddayCheckin,
        Phase::EveningCheckin,
        Phase::NighttimePlanning,
    ];

    /// The first phase of the cycle.
    pub const FIRST: Phase = Phase::MorningPlanning;

    /// Position in the cycle, starting at 0.
    pub fn index(self) -> usize {
        match self {
            Phase::MorningPlanning => 0,
            Phase::MorningCheckin => 1,
            Phase::MiddayCheckin => 2,
            Phase::EveningCheckin => 3,
            Phase::NighttimePlanning => 4,
        }
    }

    /// Phase at a cycle position, wrapping past the end.
    pub fn from_index(index: usize) -> Phase {
        Self::ALL[index % Self::ALL.len()]
    }

    /// The next phase in the cycle.
    pub fn successor(self) -> Phase {
        Self::from_index(self.index() + 1)
    }

    /// Successor of a phase given by name.
    ///
    /// Unknown names resolve to the first phase of the cycle rather than an
    /// error. Do not use this for validation.
    pub fn successor_of(name: &str) -> Phase {
        match name.parse::<Phase>() {
            Ok(phase) => phase.successor(),
            Err(_) => {
                warn!(phase = %name, fallback = %Self::FIRST, "unknown phase name, using first phase");
                Self::FIRST
            }
        }
    }

    /// Parse a phase name, falling back to the first phase when unknown.
    pub fn parse_lenient(name: &str) -> Phase {
        name.parse().unwrap_or_else(|_| {
            warn!(phase = %name, fallback = %Self::FIRST, "unknown phase name, using first phase");
            Self::FIRST
        })
    }

    /// Number of forward steps from `self` to `target`, in `0..5`.
    pub fn steps_to(self, target: Phase) -> usize {
        let len = Self::ALL.len();
        (target.index() + len - self.index()) % len
    }

    /// Phases strictly between `self` and `target`, walking forward.
    pub fn phases_between(self, target: Phase) -> Vec<Phase> {
        (1..self.steps_to(target))
            .map(|step| Self::from_index(self.index() + step))
            .collect()
    }

    /// Whether walking forward from `self` to `target` passes the first phase.
    pub fn wraps_to(self, target: Phase) -> bool {
        target.index() < self.index()
    }

    /// Whether this is one of the three daytime check-ins.
    pub fn is_check_in(self) -> bool {
        matches!(
            self,
            Phase::MorningCheckin | Phase::MiddayCheckin | Phase::EveningCheckin
        )
    }

    /// Wire name, e.g. `midday_checkin`.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::MorningPlanning => "morning_planning",
            Phase::MorningCheckin => "morning_checkin",
            Phase::MiddayCheckin => "midday_checkin",
            Phase::EveningCheckin => "evening_checkin",
            Phase::NighttimePlanning => "nighttime_planning",
        }
    }

    /// Human label, e.g. `midday checkin`.
    pub fn label(self) -> String {
        self.as_str().replace('_', " ")
    }

    /// Deserialize a phase name leniently (see [`Phase::parse_lenient`]).
    pub(crate) fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Phase, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Phase::parse_lenient(&name))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| SchedulerError::UnknownPhase(s.to_string()))
    }
}
