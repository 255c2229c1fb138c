use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

use crate::model::ids::{PhaseId, SkillId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CurriculumError {
    #[error("phase `{0}` appears more than once")]
    DuplicatePhase(PhaseId),
}

/// One step of the curriculum: the skill it introduces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub id: PhaseId,
    pub primary_skill_id: SkillId,
    #[serde(default)]
    pub name: Option<String>,
}

impl Phase {
    #[must_use]
    pub fn new(id: PhaseId, primary_skill_id: SkillId) -> Self {
        Self {
            id,
            primary_skill_id,
            name: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Human label, falling back to the primary skill id.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.primary_skill_id.as_str())
    }
}

/// Ordered curriculum phases. Prerequisite edges live in the `SkillCatalog`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Phase>", into = "Vec<Phase>")]
pub struct CurriculumGraph {
    phases: Vec<Phase>,
}

impl CurriculumGraph {
    /// # Errors
    ///
    /// Returns `CurriculumError::DuplicatePhase` when two phases share an id.
    pub fn new(phases: Vec<Phase>) -> Result<Self, CurriculumError> {
        let mut seen = HashSet::with_capacity(phases.len());
        for phase in &phases {
            if !seen.insert(&phase.id) {
                return Err(CurriculumError::DuplicatePhase(phase.id.clone()));
            }
        }
        Ok(Self { phases })
    }

    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    #[must_use]
    pub fn phase(&self, id: &PhaseId) -> Option<&Phase> {
        self.phases.iter().find(|p| &p.id == id)
    }

    #[must_use]
    pub fn position(&self, id: &PhaseId) -> Option<usize> {
        self.phases.iter().position(|p| &p.id == id)
    }

    /// First phase, in curriculum order, whose primary skill is not practiced yet.
    #[must_use]
    pub fn next_unlearned(&self, practicing: &BTreeSet<SkillId>) -> Option<(usize, &Phase)> {
        self.phases
            .iter()
            .enumerate()
            .find(|(_, phase)| !practicing.contains(&phase.primary_skill_id))
    }
}

impl TryFrom<Vec<Phase>> for CurriculumGraph {
    type Error = CurriculumError;

    fn try_from(value: Vec<Phase>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CurriculumGraph> for Vec<Phase> {
    fn from(value: CurriculumGraph) -> Self {
        value.phases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(id: &str, skill: &str) -> Phase {
        Phase::new(PhaseId::new(id).unwrap(), SkillId::new(skill).unwrap())
    }

    #[test]
    fn next_unlearned_skips_practiced() {
        let graph = CurriculumGraph::new(vec![
            phase("p1", "basic.directAddition"),
            phase("p2", "basic.heavenBead"),
        ])
        .unwrap();

        let mut practicing = BTreeSet::new();
        assert_eq!(graph.next_unlearned(&practicing).unwrap().0, 0);

        practicing.insert(SkillId::new("basic.directAddition").unwrap());
        let (index, next) = graph.next_unlearned(&practicing).unwrap();
        assert_eq!(index, 1);
        assert_eq!(next.label(), "basic.heavenBead");

        practicing.insert(SkillId::new("basic.heavenBead").unwrap());
        assert!(graph.next_unlearned(&practicing).is_none());
    }

    #[test]
    fn duplicate_phase_rejected() {
        let err = CurriculumGraph::new(vec![
            phase("p1", "basic.directAddition"),
            phase("p1", "basic.heavenBead"),
        ])
        .unwrap_err();
        assert!(matches!(err, CurriculumError::DuplicatePhase(_)));
    }
}
