//! Session mode decision: remediation, progression or maintenance.
//!
//! Recomputed from scratch for every planning request; the result is only
//! ever stored as an informational snapshot on a plan.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

use crate::bkt::SkillPriors;
use crate::history::MasterySnapshot;
use crate::model::{CurriculumGraph, Phase, PhaseId, SkillCatalog, SkillId};
use crate::readiness::{ReadinessEvaluator, ReadinessResult};

//
// ─── CONFIG ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSelectorConfig {
    /// A non-solid skill below this `p_known` forces remediation.
    pub severity_floor: f64,
    /// Most weak skills carried by a remediation mode.
    pub max_weak_skills: usize,
    /// Tutorial skips allowed before the tutorial becomes mandatory.
    pub max_tutorial_skips: u32,
}

impl Default for ModeSelectorConfig {
    fn default() -> Self {
        Self {
            severity_floor: 0.5,
            max_weak_skills: 3,
            max_tutorial_skips: 3,
        }
    }
}

//
// ─── LEARNER INPUTS ────────────────────────────────────────────────────────────
//

/// What the caller knows about a learner besides their history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerProfile {
    /// Skills enabled for practice.
    pub practicing: BTreeSet<SkillId>,
    pub current_phase: Option<PhaseId>,
    /// Progression skills the learner chose to put off.
    pub deferred: BTreeSet<SkillId>,
    /// Tutorial-completion store.
    pub tutorials_completed: BTreeSet<SkillId>,
    /// Times the learner skipped each skill's tutorial.
    pub skip_counts: BTreeMap<SkillId, u32>,
}

impl LearnerProfile {
    #[must_use]
    pub fn practicing(skills: impl IntoIterator<Item = SkillId>) -> Self {
        Self {
            practicing: skills.into_iter().collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn skip_count(&self, skill: &SkillId) -> u32 {
        self.skip_counts.get(skill).copied().unwrap_or(0)
    }
}

//
// ─── MODE ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRef {
    pub id: PhaseId,
    pub index: usize,
    pub label: String,
}

impl PhaseRef {
    fn from_phase(index: usize, phase: &Phase) -> Self {
        Self {
            id: phase.id.clone(),
            index,
            label: phase.label().to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeakSkill {
    pub skill_id: SkillId,
    pub p_known: f64,
    pub mastery_percent: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedPromotion {
    pub next_skill: SkillId,
    pub phase: PhaseRef,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredProgression {
    pub next_skill: SkillId,
    pub readiness: ReadinessResult,
    pub phase: PhaseRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModeKind {
    Remediation,
    Progression,
    Maintenance,
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModeKind::Remediation => "remediation",
            ModeKind::Progression => "progression",
            ModeKind::Maintenance => "maintenance",
        })
    }
}

/// Pedagogical strategy for one session. Exactly one variant applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionMode {
    Remediation {
        weak_skills: Vec<WeakSkill>,
        focus_description: String,
        blocked_promotion: Option<BlockedPromotion>,
    },
    Progression {
        next_skill: SkillId,
        phase: PhaseRef,
        tutorial_required: bool,
        skip_count: u32,
        can_skip_tutorial: bool,
    },
    Maintenance {
        focus_description: String,
        skill_count: usize,
        deferred_progression: Option<DeferredProgression>,
    },
}

impl SessionMode {
    #[must_use]
    pub fn kind(&self) -> ModeKind {
        match self {
            SessionMode::Remediation { .. } => ModeKind::Remediation,
            SessionMode::Progression { .. } => ModeKind::Progression,
            SessionMode::Maintenance { .. } => ModeKind::Maintenance,
        }
    }

    /// Skills the mode puts front and centre. Empty for maintenance.
    #[must_use]
    pub fn headline_skills(&self) -> Vec<SkillId> {
        match self {
            SessionMode::Remediation { weak_skills, .. } => {
                weak_skills.iter().map(|w| w.skill_id.clone()).collect()
            }
            SessionMode::Progression { next_skill, .. } => vec![next_skill.clone()],
            SessionMode::Maintenance { .. } => Vec::new(),
        }
    }

    fn maintenance(skill_count: usize, deferred: Option<DeferredProgression>) -> Self {
        let focus_description = if skill_count == 0 {
            "Building fluency".to_owned()
        } else if skill_count == 1 {
            "Maintaining 1 skill".to_owned()
        } else {
            format!("Maintaining {skill_count} skills")
        };
        SessionMode::Maintenance {
            focus_description,
            skill_count,
            deferred_progression: deferred,
        }
    }
}

//
// ─── SELECTOR ──────────────────────────────────────────────────────────────────
//

/// Everything the selector reads. All borrowed, nothing mutated.
#[derive(Clone, Copy)]
pub struct ModeInputs<'a> {
    pub catalog: &'a SkillCatalog,
    pub curriculum: &'a CurriculumGraph,
    pub profile: &'a LearnerProfile,
    pub snapshot: &'a MasterySnapshot,
    pub priors: &'a SkillPriors,
    pub readiness: &'a ReadinessEvaluator,
}

struct NextSkill<'a> {
    index: usize,
    phase: &'a Phase,
    prerequisites: Vec<SkillId>,
    prerequisites_solid: bool,
}

fn join_skills<'s>(skills: impl IntoIterator<Item = &'s SkillId>) -> String {
    skills
        .into_iter()
        .map(SkillId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Decide the session mode. First match wins: remediation, progression,
/// maintenance.
///
/// A malformed curriculum (current phase missing from the graph, or a phase
/// pointing at a skill the catalog does not know) fails closed to
/// maintenance instead of erroring.
#[must_use]
pub fn select_mode(inputs: ModeInputs<'_>, config: &ModeSelectorConfig) -> SessionMode {
    let ModeInputs {
        catalog,
        curriculum,
        profile,
        snapshot,
        priors,
        readiness,
    } = inputs;

    let results: Vec<ReadinessResult> = profile
        .practicing
        .iter()
        .map(|skill| readiness.evaluate_in(skill, snapshot, priors))
        .collect();
    let solid_count = results.iter().filter(|r| r.is_solid).count();

    if let Some(current) = &profile.current_phase {
        if curriculum.phase(current).is_none() {
            warn!(phase = %current, "current phase missing from curriculum; using maintenance");
            return SessionMode::maintenance(solid_count, None);
        }
    }
    if let Some(phase) = curriculum
        .phases()
        .iter()
        .find(|p| !catalog.contains(&p.primary_skill_id))
    {
        warn!(
            phase = %phase.id,
            skill = %phase.primary_skill_id,
            "phase skill unknown to catalog; using maintenance"
        );
        return SessionMode::maintenance(solid_count, None);
    }

    let next = curriculum
        .next_unlearned(&profile.practicing)
        .map(|(index, phase)| {
            let prerequisites = catalog.prerequisite_ids(&phase.primary_skill_id);
            let prerequisites_solid = readiness.set_is_solid(&prerequisites, snapshot, priors);
            NextSkill {
                index,
                phase,
                prerequisites,
                prerequisites_solid,
            }
        });

    // 1. Remediation
    // A practicing skill with no answers sits at its prior and is not weak.
    let mut weak: Vec<WeakSkill> = results
        .iter()
        .filter(|r| !r.is_solid)
        .filter_map(|r| {
            let state = snapshot
                .state(r.skills.first()?)
                .filter(|st| st.opportunities > 0 && st.p_known < config.severity_floor)?;
            Some(WeakSkill {
                skill_id: state.skill_id.clone(),
                p_known: state.p_known,
                mastery_percent: state.mastery_percent(),
            })
        })
        .collect();
    if !weak.is_empty() {
        weak.sort_by(|a, b| {
            a.p_known
                .total_cmp(&b.p_known)
                .then_with(|| a.skill_id.cmp(&b.skill_id))
        });
        weak.truncate(config.max_weak_skills.max(1));
        let names = join_skills(weak.iter().map(|w| &w.skill_id));
        let blocked_promotion = next
            .as_ref()
            .filter(|n| n.prerequisites_solid)
            .map(|n| BlockedPromotion {
                next_skill: n.phase.primary_skill_id.clone(),
                phase: PhaseRef::from_phase(n.index, n.phase),
                reason: format!(
                    "Strengthen {names} before starting {}",
                    n.phase.label()
                ),
            });
        debug!(weak = %names, blocked = blocked_promotion.is_some(), "remediation selected");
        return SessionMode::Remediation {
            focus_description: format!("Strengthening {names}"),
            weak_skills: weak,
            blocked_promotion,
        };
    }

    // 2. Progression
    if let Some(n) = next.as_ref().filter(|n| n.prerequisites_solid) {
        let skill = &n.phase.primary_skill_id;
        if !profile.deferred.contains(skill) {
            let tutorial_required = catalog
                .resolve(skill)
                .is_some_and(|r| catalog.has_tutorial(r))
                && !profile.tutorials_completed.contains(skill);
            let skip_count = profile.skip_count(skill);
            debug!(skill = %skill, tutorial_required, "progression selected");
            return SessionMode::Progression {
                next_skill: skill.clone(),
                phase: PhaseRef::from_phase(n.index, n.phase),
                tutorial_required,
                skip_count,
                can_skip_tutorial: skip_count < config.max_tutorial_skips,
            };
        }
    }

    // 3. Maintenance
    let deferred = next
        .filter(|n| n.prerequisites_solid && profile.deferred.contains(&n.phase.primary_skill_id))
        .map(|n| {
            let skill = n.phase.primary_skill_id.clone();
            let readiness = readiness
                .evaluate_set(&n.prerequisites, snapshot, priors)
                .unwrap_or_else(|| readiness.evaluate_in(&skill, snapshot, priors));
            DeferredProgression {
                next_skill: skill,
                readiness,
                phase: PhaseRef::from_phase(n.index, n.phase),
            }
        });
    debug!(solid = solid_count, deferred = deferred.is_some(), "maintenance selected");
    SessionMode::maintenance(solid_count, deferred)
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryOptions, compute_mastery};
    use crate::model::{ProblemRecord, SkillDefinition};
    use crate::time::fixed_now;
    use chrono::Duration;

    fn sid(raw: &str) -> SkillId {
        SkillId::new(raw).unwrap()
    }

    fn pid(raw: &str) -> PhaseId {
        PhaseId::new(raw).unwrap()
    }

    struct World {
        catalog: SkillCatalog,
        curriculum: CurriculumGraph,
        priors: SkillPriors,
        readiness: ReadinessEvaluator,
    }

    fn world() -> World {
        let catalog = SkillCatalog::new(vec![
            SkillDefinition::new(sid("basic.directAddition")),
            SkillDefinition::new(sid("basic.heavenBead"))
                .with_prerequisites([sid("basic.directAddition")]),
            SkillDefinition::new(sid("fiveComplements.4=5-1"))
                .with_prerequisites([sid("basic.directAddition")])
                .with_tutorial(true),
        ])
        .unwrap();
        let curriculum = CurriculumGraph::new(vec![
            Phase::new(pid("p1"), sid("basic.directAddition")),
            Phase::new(pid("p2"), sid("basic.heavenBead")),
            Phase::new(pid("p3"), sid("fiveComplements.4=5-1")),
        ])
        .unwrap();
        World {
            catalog,
            curriculum,
            priors: SkillPriors::default(),
            readiness: ReadinessEvaluator::default(),
        }
    }

    // `count` timed answers for `skill`, correct unless listed in `wrong`.
    fn answers(skill: &str, count: usize, wrong: &[usize], start: i64) -> Vec<ProblemRecord> {
        (0..count)
            .map(|i| {
                let answer = if wrong.contains(&i) { 0 } else { 3 };
                ProblemRecord::new(
                    vec![1, 2],
                    answer,
                    vec![sid(skill)],
                    4_000,
                    false,
                    fixed_now() + Duration::minutes(start + i as i64),
                )
                .unwrap()
            })
            .collect()
    }

    fn select(w: &World, profile: &LearnerProfile, snapshot: &MasterySnapshot) -> SessionMode {
        select_mode(
            ModeInputs {
                catalog: &w.catalog,
                curriculum: &w.curriculum,
                profile,
                snapshot,
                priors: &w.priors,
                readiness: &w.readiness,
            },
            &ModeSelectorConfig::default(),
        )
    }

    fn solid_snapshot(w: &World, skills: &[&str]) -> MasterySnapshot {
        let mut history = Vec::new();
        for (i, skill) in skills.iter().enumerate() {
            history.extend(answers(skill, 30, &[], i as i64 * 100));
        }
        compute_mastery(&history, &w.priors, &HistoryOptions::default()).unwrap()
    }

    #[test]
    fn fresh_learner_progresses_to_first_phase() {
        let w = world();
        let mode = select(&w, &LearnerProfile::default(), &MasterySnapshot::default());
        match mode {
            SessionMode::Progression {
                next_skill,
                tutorial_required,
                phase,
                ..
            } => {
                assert_eq!(next_skill, sid("basic.directAddition"));
                assert!(!tutorial_required);
                assert_eq!(phase.index, 0);
            }
            other => panic!("expected progression, got {other:?}"),
        }
    }

    #[test]
    fn weak_skill_forces_remediation_even_when_next_is_unlocked() {
        let w = world();
        // Solid on the prerequisite, terrible on heavenBead.
        let mut history = answers("basic.directAddition", 30, &[], 0);
        history.extend(answers("basic.heavenBead", 10, &[2, 3, 4, 5, 6, 7, 8, 9], 100));
        let snapshot = compute_mastery(&history, &w.priors, &HistoryOptions::default()).unwrap();

        let heaven = snapshot.state(&sid("basic.heavenBead")).unwrap();
        assert!(heaven.p_known < 0.5);
        assert!((heaven.confidence - 0.4).abs() < 1e-12);

        let profile = LearnerProfile::practicing([sid("basic.directAddition"), sid("basic.heavenBead")]);
        match select(&w, &profile, &snapshot) {
            SessionMode::Remediation {
                weak_skills,
                blocked_promotion,
                focus_description,
            } => {
                assert_eq!(weak_skills.len(), 1);
                assert_eq!(weak_skills[0].skill_id, sid("basic.heavenBead"));
                assert!(focus_description.contains("basic.heavenBead"));
                let blocked = blocked_promotion.expect("next skill prerequisites are solid");
                assert_eq!(blocked.next_skill, sid("fiveComplements.4=5-1"));
                assert!(blocked.reason.contains("basic.heavenBead"));
            }
            other => panic!("expected remediation, got {other:?}"),
        }
    }

    #[test]
    fn just_started_skill_without_answers_is_not_weak() {
        let w = world();
        let snapshot = solid_snapshot(&w, &["basic.directAddition"]);
        let profile = LearnerProfile {
            current_phase: Some(pid("p2")),
            ..LearnerProfile::practicing([sid("basic.directAddition"), sid("basic.heavenBead")])
        };
        assert!(snapshot.state(&sid("basic.heavenBead")).is_none());

        let mode = select(&w, &profile, &snapshot);
        assert_ne!(mode.kind(), ModeKind::Remediation);
        assert!(mode.headline_skills().iter().all(|s| *s != sid("basic.heavenBead")));
    }

    #[test]
    fn weak_skill_reports_rounded_percent() {
        let w = world();
        let history = answers("basic.heavenBead", 4, &[0, 1, 2, 3], 0);
        let snapshot = compute_mastery(&history, &w.priors, &HistoryOptions::default()).unwrap();
        let state = snapshot.state(&sid("basic.heavenBead")).unwrap().clone();
        let profile = LearnerProfile::practicing([sid("basic.heavenBead")]);
        let SessionMode::Remediation { weak_skills, .. } = select(&w, &profile, &snapshot) else {
            panic!("expected remediation");
        };
        assert_eq!(weak_skills[0].mastery_percent, state.mastery_percent());
        assert_eq!(weak_skills[0].p_known, state.p_known);
    }

    #[test]
    fn remediation_keeps_three_weakest() {
        let w = world();
        let mut history = Vec::new();
        let all = ["basic.directAddition", "basic.heavenBead", "fiveComplements.4=5-1", "extra.one"];
        for (i, skill) in all.iter().enumerate() {
            history.extend(answers(skill, 3 + i, &[0, 1, 2, 3, 4, 5], i as i64 * 50));
        }
        let snapshot = compute_mastery(&history, &w.priors, &HistoryOptions::default()).unwrap();
        let profile = LearnerProfile::practicing(all.iter().map(|s| sid(s)));
        let SessionMode::Remediation { weak_skills, .. } = select(&w, &profile, &snapshot) else {
            panic!("expected remediation");
        };
        assert_eq!(weak_skills.len(), 3);
        assert!(weak_skills.windows(2).all(|p| p[0].p_known <= p[1].p_known));
    }

    #[test]
    fn progression_reports_tutorial_and_skips() {
        let w = world();
        let snapshot = solid_snapshot(&w, &["basic.directAddition", "basic.heavenBead"]);
        let mut profile =
            LearnerProfile::practicing([sid("basic.directAddition"), sid("basic.heavenBead")]);
        profile.skip_counts.insert(sid("fiveComplements.4=5-1"), 3);

        match select(&w, &profile, &snapshot) {
            SessionMode::Progression {
                next_skill,
                tutorial_required,
                skip_count,
                can_skip_tutorial,
                ..
            } => {
                assert_eq!(next_skill, sid("fiveComplements.4=5-1"));
                assert!(tutorial_required);
                assert_eq!(skip_count, 3);
                assert!(!can_skip_tutorial);
            }
            other => panic!("expected progression, got {other:?}"),
        }

        profile.tutorials_completed.insert(sid("fiveComplements.4=5-1"));
        let SessionMode::Progression { tutorial_required, .. } = select(&w, &profile, &snapshot)
        else {
            panic!("expected progression");
        };
        assert!(!tutorial_required);
    }

    #[test]
    fn unsolid_prerequisites_fall_back_to_maintenance() {
        let w = world();
        // Developing but not weak: above the severity floor, below readiness.
        let history = answers("basic.directAddition", 8, &[], 0);
        let snapshot = compute_mastery(&history, &w.priors, &HistoryOptions::default()).unwrap();
        assert!(snapshot.state(&sid("basic.directAddition")).unwrap().p_known >= 0.5);

        let profile = LearnerProfile::practicing([sid("basic.directAddition")]);
        match select(&w, &profile, &snapshot) {
            SessionMode::Maintenance {
                skill_count,
                deferred_progression,
                ..
            } => {
                assert_eq!(skill_count, 0);
                assert!(deferred_progression.is_none());
            }
            other => panic!("expected maintenance, got {other:?}"),
        }
    }

    #[test]
    fn deferred_progression_is_attached_to_maintenance() {
        let w = world();
        let snapshot = solid_snapshot(&w, &["basic.directAddition"]);
        let mut profile = LearnerProfile::practicing([sid("basic.directAddition")]);
        profile.deferred.insert(sid("basic.heavenBead"));

        match select(&w, &profile, &snapshot) {
            SessionMode::Maintenance {
                skill_count,
                deferred_progression: Some(deferred),
                ..
            } => {
                assert_eq!(skill_count, 1);
                assert_eq!(deferred.next_skill, sid("basic.heavenBead"));
                assert!(deferred.readiness.is_solid);
            }
            other => panic!("expected maintenance with deferral, got {other:?}"),
        }
    }

    #[test]
    fn missing_phase_fails_closed() {
        let w = world();
        let mut profile = LearnerProfile::practicing([sid("basic.directAddition")]);
        profile.current_phase = Some(pid("gone"));
        let mode = select(&w, &profile, &MasterySnapshot::default());
        assert_eq!(mode.kind(), ModeKind::Maintenance);
    }

    #[test]
    fn phase_with_unknown_skill_fails_closed() {
        let mut w = world();
        w.curriculum = CurriculumGraph::new(vec![Phase::new(pid("p9"), sid("ghost.skill"))]).unwrap();
        let mode = select(&w, &LearnerProfile::default(), &MasterySnapshot::default());
        assert_eq!(mode.kind(), ModeKind::Maintenance);
    }

    #[test]
    fn mode_serializes_as_tagged_variant() {
        let mode = SessionMode::maintenance(2, None);
        let json = serde_json::to_value(&mode).unwrap();
        assert_eq!(json["type"], "maintenance");
        assert_eq!(json["skill_count"], 2);
        assert!(mode.headline_skills().is_empty());
    }
}
