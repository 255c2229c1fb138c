use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of practice a session part asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PartType {
    /// Working problems on a physical abacus.
    Abacus,
    /// Mental abacus: beads are imagined.
    Visualization,
    /// Problems written as a single line equation.
    Linear,
}

impl PartType {
    pub const ALL: [PartType; 3] = [PartType::Abacus, PartType::Visualization, PartType::Linear];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PartType::Abacus => "abacus",
            PartType::Visualization => "visualization",
            PartType::Linear => "linear",
        }
    }
}

impl fmt::Display for PartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a slot is in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Purpose {
    Focus,
    Reinforce,
    Review,
    Challenge,
}

impl Purpose {
    pub const ALL: [Purpose; 4] = [
        Purpose::Focus,
        Purpose::Reinforce,
        Purpose::Review,
        Purpose::Challenge,
    ];
}

/// Per-part value table, used for weights and config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerPart<T> {
    pub abacus: T,
    pub visualization: T,
    pub linear: T,
}

impl<T> PerPart<T> {
    #[must_use]
    pub fn get(&self, part: PartType) -> &T {
        match part {
            PartType::Abacus => &self.abacus,
            PartType::Visualization => &self.visualization,
            PartType::Linear => &self.linear,
        }
    }

    pub fn get_mut(&mut self, part: PartType) -> &mut T {
        match part {
            PartType::Abacus => &mut self.abacus,
            PartType::Visualization => &mut self.visualization,
            PartType::Linear => &mut self.linear,
        }
    }
}

/// Per-purpose value table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerPurpose<T> {
    pub focus: T,
    pub reinforce: T,
    pub review: T,
    pub challenge: T,
}

impl<T> PerPurpose<T> {
    #[must_use]
    pub fn get(&self, purpose: Purpose) -> &T {
        match purpose {
            Purpose::Focus => &self.focus,
            Purpose::Reinforce => &self.reinforce,
            Purpose::Review => &self.review,
            Purpose::Challenge => &self.challenge,
        }
    }
}
