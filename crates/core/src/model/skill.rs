use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use thiserror::Error;

use crate::model::ids::SkillId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SkillError {
    #[error("skill `{0}` is defined more than once")]
    Duplicate(SkillId),

    #[error("skill `{skill}` depends on unknown skill `{missing}`")]
    UnknownPrerequisite { skill: SkillId, missing: SkillId },

    #[error("skill `{0}` lists itself as a prerequisite")]
    SelfPrerequisite(SkillId),

    #[error("prerequisite cycle through: {0:?}")]
    Cycle(Vec<SkillId>),
}

//
// ─── DEFINITIONS ───────────────────────────────────────────────────────────────
//

/// Declared shape of a skill before catalog validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub id: SkillId,
    #[serde(default)]
    pub prerequisites: Vec<SkillId>,
    #[serde(default)]
    pub has_tutorial: bool,
}

impl SkillDefinition {
    #[must_use]
    pub fn new(id: SkillId) -> Self {
        Self {
            id,
            prerequisites: Vec::new(),
            has_tutorial: false,
        }
    }

    #[must_use]
    pub fn with_prerequisites(mut self, prerequisites: impl IntoIterator<Item = SkillId>) -> Self {
        self.prerequisites = prerequisites.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_tutorial(mut self, has_tutorial: bool) -> Self {
        self.has_tutorial = has_tutorial;
        self
    }
}

/// Dense index of a skill inside a `SkillCatalog`.
///
/// Only the catalog that issued a `SkillRef` can resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SkillRef(usize);

impl SkillRef {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    id: SkillId,
    prerequisites: Vec<SkillRef>,
    has_tutorial: bool,
}

//
// ─── CATALOG ───────────────────────────────────────────────────────────────────
//

/// Validated prerequisite DAG of every known skill.
///
/// Built once at startup; every later lookup goes through a `SkillRef` so no
/// code branches on raw strings after construction.
#[derive(Debug, Clone)]
pub struct SkillCatalog {
    entries: Vec<CatalogEntry>,
    by_id: HashMap<SkillId, SkillRef>,
    topo: Vec<SkillRef>,
}

impl SkillCatalog {
    /// Resolve and validate skill definitions.
    ///
    /// # Errors
    ///
    /// - `Duplicate` if two definitions share an id
    /// - `SelfPrerequisite` / `UnknownPrerequisite` for bad edges
    /// - `Cycle` if the prerequisite graph is not acyclic
    pub fn new(definitions: impl IntoIterator<Item = SkillDefinition>) -> Result<Self, SkillError> {
        let definitions: Vec<SkillDefinition> = definitions.into_iter().collect();

        let mut by_id = HashMap::with_capacity(definitions.len());
        for (index, def) in definitions.iter().enumerate() {
            if by_id.insert(def.id.clone(), SkillRef(index)).is_some() {
                return Err(SkillError::Duplicate(def.id.clone()));
            }
        }

        let mut entries = Vec::with_capacity(definitions.len());
        for def in definitions {
            let mut prerequisites = Vec::with_capacity(def.prerequisites.len());
            for prereq in &def.prerequisites {
                if *prereq == def.id {
                    return Err(SkillError::SelfPrerequisite(def.id.clone()));
                }
                let Some(r) = by_id.get(prereq) else {
                    return Err(SkillError::UnknownPrerequisite {
                        skill: def.id.clone(),
                        missing: prereq.clone(),
                    });
                };
                if !prerequisites.contains(r) {
                    prerequisites.push(*r);
                }
            }
            entries.push(CatalogEntry {
                id: def.id,
                prerequisites,
                has_tutorial: def.has_tutorial,
            });
        }

        let topo = topological_order(&entries)?;
        Ok(Self {
            entries,
            by_id,
            topo,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn resolve(&self, id: &SkillId) -> Option<SkillRef> {
        self.by_id.get(id).copied()
    }

    #[must_use]
    pub fn contains(&self, id: &SkillId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Id for a reference issued by this catalog.
    ///
    /// # Panics
    ///
    /// Panics if `skill` came from a different catalog with more entries.
    #[must_use]
    pub fn id(&self, skill: SkillRef) -> &SkillId {
        &self.entries[skill.0].id
    }

    #[must_use]
    pub fn has_tutorial(&self, skill: SkillRef) -> bool {
        self.entries[skill.0].has_tutorial
    }

    /// Direct prerequisites of a skill.
    pub fn prerequisites(&self, skill: SkillRef) -> impl Iterator<Item = SkillRef> + '_ {
        self.entries[skill.0].prerequisites.iter().copied()
    }

    /// Direct prerequisite ids of a skill, or an empty list for unknown ids.
    #[must_use]
    pub fn prerequisite_ids(&self, id: &SkillId) -> Vec<SkillId> {
        self.resolve(id)
            .map(|r| self.prerequisites(r).map(|p| self.id(p).clone()).collect())
            .unwrap_or_default()
    }

    /// True when every direct prerequisite of `id` is in `available`.
    ///
    /// Unknown skills are never satisfied.
    #[must_use]
    pub fn prerequisites_satisfied(&self, id: &SkillId, available: &BTreeSet<SkillId>) -> bool {
        match self.resolve(id) {
            Some(r) => self
                .prerequisites(r)
                .all(|p| available.contains(self.id(p))),
            None => false,
        }
    }

    /// Skills ordered so every prerequisite precedes its dependents.
    pub fn topological_order(&self) -> impl Iterator<Item = &SkillId> + '_ {
        self.topo.iter().map(|r| self.id(*r))
    }

    pub fn iter(&self) -> impl Iterator<Item = (SkillRef, &SkillId)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (SkillRef(index), &entry.id))
    }
}

// Kahn's algorithm; leftovers after the queue drains sit on a cycle.
fn topological_order(entries: &[CatalogEntry]) -> Result<Vec<SkillRef>, SkillError> {
    let mut indegree = vec![0_usize; entries.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    for (index, entry) in entries.iter().enumerate() {
        indegree[index] = entry.prerequisites.len();
        for prereq in &entry.prerequisites {
            dependents[prereq.0].push(index);
        }
    }

    let mut queue: VecDeque<usize> = (0..entries.len()).filter(|i| indegree[*i] == 0).collect();
    let mut order = Vec::with_capacity(entries.len());
    while let Some(next) = queue.pop_front() {
        order.push(SkillRef(next));
        for dependent in &dependents[next] {
            indegree[*dependent] -= 1;
            if indegree[*dependent] == 0 {
                queue.push_back(*dependent);
            }
        }
    }

    if order.len() == entries.len() {
        Ok(order)
    } else {
        let stuck = entries
            .iter()
            .enumerate()
            .filter(|(i, _)| indegree[*i] > 0)
            .map(|(_, entry)| entry.id.clone())
            .collect();
        Err(SkillError::Cycle(stuck))
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
