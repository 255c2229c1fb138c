use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use curriculum_core::config::{ConfigError, EngineConfig, PacingConfig};
use curriculum_core::history::{HistoryOptions, MasteryLevel, MasterySnapshot};
use curriculum_core::mode::{LearnerProfile, SessionMode};
use curriculum_core::model::{
    GameBreak, LearnerId, Part, PartType, PerPart, PerPurpose, PlanId, Purpose, SessionPlan,
    SkillCatalog, SkillId, Slot,
};
use curriculum_core::term_count::{
    self, LengthPreference, TermCountRange, TermCountScalingConfig,
};

use crate::error::ComposeError;

//
// ─── REQUEST ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameBreakSettings {
    pub enabled: bool,
    /// Active minutes that must accumulate before a break is offered.
    pub trigger_minutes: u32,
    pub duration_minutes: u32,
}

impl Default for GameBreakSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_minutes: 5,
            duration_minutes: 2,
        }
    }
}

/// What the learner (or instructor) asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanRequest {
    pub duration_minutes: u32,
    /// Relative time per part; 0 disables a part.
    pub part_weights: PerPart<u32>,
    /// Relative share of slots per purpose.
    pub purpose_weights: PerPurpose<u32>,
    /// Spread purposes within each part instead of grouping them.
    pub shuffle_purposes: bool,
    pub length_preference: LengthPreference,
    pub game_break: GameBreakSettings,
}

impl Default for PlanRequest {
    fn default() -> Self {
        Self {
            duration_minutes: 10,
            part_weights: PerPart {
                abacus: 2,
                visualization: 1,
                linear: 1,
            },
            purpose_weights: PerPurpose {
                focus: 6,
                reinforce: 2,
                review: 1,
                challenge: 1,
            },
            shuffle_purposes: true,
            length_preference: LengthPreference::Recommended,
            game_break: GameBreakSettings::default(),
        }
    }
}

/// Learner-specific inputs. The mode is decided before composing.
#[derive(Clone, Copy)]
pub struct ComposeContext<'a> {
    pub learner: LearnerId,
    pub catalog: &'a SkillCatalog,
    pub profile: &'a LearnerProfile,
    pub snapshot: &'a MasterySnapshot,
    pub mode: &'a SessionMode,
    /// The learner's open plan, if the caller found one.
    pub active_plan: Option<&'a SessionPlan>,
    pub now: DateTime<Utc>,
}

//
// ─── PROBLEM GENERATION ────────────────────────────────────────────────────────
//

/// Produces the terms of one problem.
pub trait ProblemGenerator: Send + Sync {
    fn generate(&self, skill: &SkillId, terms: u32, rng: &mut dyn RngCore) -> Vec<i64>;
}

/// Single-digit additions and subtractions whose running total never drops
/// below zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigitProblemGenerator;

impl ProblemGenerator for DigitProblemGenerator {
    fn generate(&self, _skill: &SkillId, terms: u32, rng: &mut dyn RngCore) -> Vec<i64> {
        let mut out = Vec::with_capacity(terms as usize);
        let mut total = 0_i64;
        for i in 0..terms {
            let digit: i64 = rng.random_range(1..=9);
            let term = if i > 0 && digit <= total && rng.random_bool(0.4) {
                -digit
            } else {
                digit
            };
            total += term;
            out.push(term);
        }
        out
    }
}

//
// ─── HELPERS ───────────────────────────────────────────────────────────────────
//

/// Split `slots` across purposes by largest remainder. All-zero weights put
/// everything on focus.
pub(crate) fn apportion(slots: usize, weights: &PerPurpose<u32>) -> Vec<Purpose> {
    let total: u64 = Purpose::ALL.iter().map(|p| u64::from(*weights.get(*p))).sum();
    if total == 0 {
        return vec![Purpose::Focus; slots];
    }
    let n = slots as u64;
    let mut counts: Vec<(Purpose, u64, u64)> = Purpose::ALL
        .iter()
        .map(|p| {
            let scaled = n * u64::from(*weights.get(*p));
            (*p, scaled / total, scaled % total)
        })
        .collect();
    let assigned: u64 = counts.iter().map(|(_, c, _)| c).sum();
    let mut order: Vec<usize> = (0..counts.len()).collect();
    // Stable sort keeps focus-first on ties.
    order.sort_by(|a, b| counts[*b].2.cmp(&counts[*a].2));
    for i in order.into_iter().take((n - assigned) as usize) {
        counts[i].1 += 1;
    }
    counts
        .into_iter()
        .flat_map(|(p, c, _)| std::iter::repeat_n(p, c as usize))
        .collect()
}

// Candidate skills per purpose, each rotated round-robin.
struct SkillPools {
    pools: PerPurpose<Vec<SkillId>>,
    eligible: Vec<SkillId>,
    cursors: [usize; 4],
}

impl SkillPools {
    fn next(&mut self, purpose: Purpose) -> Option<SkillId> {
        let idx = Purpose::ALL.iter().position(|p| *p == purpose).unwrap_or(0);
        let pool = [
            self.pools.get(purpose),
            &self.pools.focus,
            &self.eligible,
        ]
        .into_iter()
        .find(|p| !p.is_empty())?;
        let skill = pool[self.cursors[idx] % pool.len()].clone();
        self.cursors[idx] += 1;
        Some(skill)
    }
}

//
// ─── COMPOSER ──────────────────────────────────────────────────────────────────
//

/// Turns a session mode and learner state into a time-boxed plan.
pub struct PlanComposer<G = DigitProblemGenerator> {
    term_counts: TermCountScalingConfig,
    pacing: PacingConfig,
    history: HistoryOptions,
    generator: G,
}

impl PlanComposer<DigitProblemGenerator> {
    /// # Errors
    ///
    /// Returns the first `ConfigError` found in `config`.
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::with_generator(config, DigitProblemGenerator)
    }
}

impl<G: ProblemGenerator> PlanComposer<G> {
    /// # Errors
    ///
    /// Returns the first `ConfigError` found in `config`.
    pub fn with_generator(config: &EngineConfig, generator: G) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            term_counts: config.term_counts,
            pacing: config.pacing.clone(),
            history: config.history.clone(),
            generator,
        })
    }

    // Practicing (and headline) skills whose prerequisites are practicing.
    fn eligible_skills(&self, ctx: &ComposeContext<'_>) -> Vec<SkillId> {
        let practicing = &ctx.profile.practicing;
        let candidates: BTreeSet<SkillId> = practicing
            .iter()
            .cloned()
            .chain(ctx.mode.headline_skills())
            .collect();
        candidates
            .into_iter()
            .filter(|s| ctx.catalog.prerequisites_satisfied(s, practicing))
            .collect()
    }

    // `current` is the learner's mean mastery over the eligible skills.
    fn pools(&self, ctx: &ComposeContext<'_>, eligible: Vec<SkillId>, current: f64) -> SkillPools {
        let p_known = |s: &SkillId| ctx.snapshot.state(s).map_or(0.0, |st| st.p_known);
        let settled_strong = |s: &SkillId| {
            ctx.snapshot
                .classify(s, &self.history)
                .is_some_and(|c| c.level == MasteryLevel::Strong && !c.provisional)
        };

        let focus: Vec<SkillId> = ctx
            .mode
            .headline_skills()
            .into_iter()
            .filter(|s| eligible.contains(s))
            .collect();

        // Weak, developing, provisional or unseen.
        let mut reinforce: Vec<SkillId> = eligible
            .iter()
            .filter(|s| ctx.profile.practicing.contains(*s) && !settled_strong(*s))
            .cloned()
            .collect();
        reinforce.sort_by(|a, b| p_known(a).total_cmp(&p_known(b)));

        let mut review: Vec<SkillId> = eligible
            .iter()
            .filter(|s| settled_strong(*s))
            .cloned()
            .collect();
        review.sort_by_key(|s| ctx.snapshot.state(s).map(|st| st.last_practiced_at));

        // Closest above the learner's current mastery first.
        let challenge: Vec<SkillId> = match ctx.mode {
            SessionMode::Progression { next_skill, .. } if eligible.contains(next_skill) => {
                vec![next_skill.clone()]
            }
            _ => {
                let mut above: Vec<SkillId> = eligible
                    .iter()
                    .filter(|s| p_known(*s) > current)
                    .cloned()
                    .collect();
                above.sort_by(|a, b| p_known(a).total_cmp(&p_known(b)));
                above
            }
        };

        SkillPools {
            pools: PerPurpose {
                focus,
                reinforce,
                review,
                challenge,
            },
            eligible,
            cursors: [0; 4],
        }
    }

    fn term_count(purpose: Purpose, range: TermCountRange, rng: &mut impl Rng) -> u32 {
        match purpose {
            Purpose::Focus | Purpose::Review => rng.random_range(range.min..=range.max),
            Purpose::Reinforce => range.min,
            Purpose::Challenge => range.max,
        }
    }

    /// Compose a draft plan.
    ///
    /// # Errors
    ///
    /// * `ActiveSessionExists` if the context carries an open plan.
    /// * `InvalidDuration` for a zero-minute request.
    /// * `NoSkillsEnabled` if every part weight is zero or no skill can be
    ///   practiced.
    pub fn compose(
        &self,
        request: &PlanRequest,
        ctx: &ComposeContext<'_>,
        rng: &mut impl Rng,
    ) -> Result<SessionPlan, ComposeError> {
        if let Some(existing) = ctx.active_plan.filter(|p| p.status().is_open()) {
            return Err(ComposeError::ActiveSessionExists {
                existing: Box::new(existing.clone()),
            });
        }
        if request.duration_minutes == 0 {
            return Err(ComposeError::InvalidDuration);
        }

        let enabled: Vec<(PartType, u32)> = PartType::ALL
            .into_iter()
            .map(|p| (p, *request.part_weights.get(p)))
            .filter(|(_, w)| *w > 0)
            .collect();
        if enabled.is_empty() {
            return Err(ComposeError::NoSkillsEnabled);
        }
        let eligible = self.eligible_skills(ctx);
        if eligible.is_empty() {
            return Err(ComposeError::NoSkillsEnabled);
        }

        let base = term_count::base_comfort(ctx.snapshot, &eligible);
        let comfort = term_count::comfort_level(base, ctx.mode.kind(), request.length_preference);
        let mut pools = self.pools(ctx, eligible, base);

        let total_seconds = f64::from(request.duration_minutes) * 60.0;
        let total_weight: f64 = enabled.iter().map(|(_, w)| f64::from(*w)).sum();
        let mut parts = Vec::with_capacity(enabled.len());

        for (part_type, weight) in enabled {
            let share = total_seconds * f64::from(weight) / total_weight;
            let range = term_count::range(part_type, comfort, &self.term_counts);
            let seconds_per_problem = self.pacing.seconds_per_problem(part_type, range.midpoint());
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let count = ((share / seconds_per_problem).floor() as usize).max(1);

            let mut purposes = apportion(count, &request.purpose_weights);
            if request.shuffle_purposes {
                purposes.shuffle(rng);
            }

            let mut slots = Vec::with_capacity(count);
            for purpose in purposes {
                let Some(skill_id) = pools.next(purpose) else {
                    return Err(ComposeError::NoSkillsEnabled);
                };
                let terms_wanted = Self::term_count(purpose, range, rng);
                let terms = self.generator.generate(&skill_id, terms_wanted, rng);
                let answer = terms.iter().sum();
                slots.push(Slot {
                    skill_id,
                    purpose,
                    terms,
                    answer,
                });
            }

            #[allow(clippy::cast_precision_loss)]
            let estimated_minutes = slots.len() as f64 * seconds_per_problem / 60.0;
            debug!(
                part = %part_type,
                slots = slots.len(),
                min_terms = range.min,
                max_terms = range.max,
                "part composed"
            );
            parts.push(Part {
                part_type,
                slots,
                estimated_minutes,
                game_break: None,
            });
        }

        let settings = request.game_break;
        if settings.enabled {
            let last = parts.len() - 1;
            let mut since_break = 0.0;
            for part in &mut parts[..last] {
                since_break += part.estimated_minutes;
                if since_break >= f64::from(settings.trigger_minutes) {
                    part.game_break = Some(GameBreak {
                        duration_minutes: settings.duration_minutes,
                    });
                    since_break = 0.0;
                }
            }
        }

        let plan = SessionPlan::new(
            PlanId::generate(),
            ctx.learner,
            ctx.mode.clone(),
            parts,
            request.duration_minutes,
            ctx.now,
        )?;
        info!(
            plan = %plan.id(),
            learner = %ctx.learner,
            mode = %ctx.mode.kind(),
            slots = plan.total_slots(),
            comfort,
            "plan composed"
        );
        Ok(plan)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
