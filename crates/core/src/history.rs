//! Replays answered problems through the BKT model to estimate per-skill mastery.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::{debug, trace};

use crate::bkt::{self, SkillPriors};
use crate::model::{ProblemRecord, SkillId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HistoryError {
    #[error("history record {index} at {found} precedes previous record at {previous}")]
    OutOfOrder {
        index: usize,
        previous: DateTime<Utc>,
        found: DateTime<Utc>,
    },
}

//
// ─── OPTIONS ───────────────────────────────────────────────────────────────────
//

/// Tunables for replay and mastery classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryOptions {
    /// Opportunities at which confidence reaches 1.0.
    pub confidence_saturation: u32,
    /// Below this confidence a classification is provisional.
    pub confidence_threshold: f64,
    /// `p_known` below this is weak.
    pub weak_below: f64,
    /// `p_known` at or above this is strong.
    pub strong_at: f64,
    /// Attempts kept per skill in the rolling window.
    pub window_capacity: usize,
    /// Minimum idle gap that starts a new practice session for a skill.
    pub session_gap_minutes: i64,
    /// Share of a correct answer's evidence kept when help was used.
    pub help_weight: f64,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            confidence_saturation: 25,
            confidence_threshold: 0.5,
            weak_below: 0.5,
            strong_at: 0.8,
            window_capacity: 20,
            session_gap_minutes: 30,
            help_weight: 0.5,
        }
    }
}

impl HistoryOptions {
    /// Confidence as a monotonic function of opportunity count, capped at 1.
    #[must_use]
    pub fn confidence(&self, opportunities: u32) -> f64 {
        if self.confidence_saturation == 0 {
            return 1.0;
        }
        (f64::from(opportunities) / f64::from(self.confidence_saturation)).min(1.0)
    }

    #[must_use]
    pub fn classify(&self, p_known: f64, confidence: f64) -> MasteryClassification {
        let level = if p_known < self.weak_below {
            MasteryLevel::Weak
        } else if p_known >= self.strong_at {
            MasteryLevel::Strong
        } else {
            MasteryLevel::Developing
        };
        MasteryClassification {
            level,
            provisional: confidence < self.confidence_threshold,
        }
    }
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MasteryLevel {
    Weak,
    Developing,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasteryClassification {
    pub level: MasteryLevel,
    pub provisional: bool,
}

/// Current belief about one skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteryState {
    pub skill_id: SkillId,
    pub p_known: f64,
    pub confidence: f64,
    pub opportunities: u32,
    pub correct: u32,
    pub session_count: u32,
    pub last_practiced_at: DateTime<Utc>,
}

impl MasteryState {
    /// Mastery as a whole percentage, for display and ranking.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn mastery_percent(&self) -> u8 {
        (self.p_known * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// One attempt as seen by the readiness gates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub is_correct: bool,
    pub had_help: bool,
    pub seconds_per_term: Option<f64>,
    pub answered_at: DateTime<Utc>,
}

/// Bounded, oldest-first window of recent attempts for a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentWindow {
    capacity: usize,
    attempts: VecDeque<Attempt>,
}

impl RecentWindow {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            attempts: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, attempt: Attempt) {
        if self.attempts.len() == self.capacity {
            self.attempts.pop_front();
        }
        self.attempts.push_back(attempt);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn attempts(&self) -> impl Iterator<Item = &Attempt> {
        self.attempts.iter()
    }

    fn last(&self, n: usize) -> impl Iterator<Item = &Attempt> {
        self.attempts.iter().rev().take(n)
    }

    /// Accuracy over the last `n` attempts, `None` when there are none.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn accuracy(&self, n: usize) -> Option<f64> {
        let considered = self.attempts.len().min(n);
        if considered == 0 {
            return None;
        }
        let correct = self.last(n).filter(|a| a.is_correct).count();
        Some(correct as f64 / considered as f64)
    }

    /// True only when at least `n` attempts exist and the last `n` are correct.
    #[must_use]
    pub fn last_n_all_correct(&self, n: usize) -> bool {
        self.attempts.len() >= n && self.last(n).all(|a| a.is_correct)
    }

    #[must_use]
    pub fn help_count(&self, n: usize) -> u32 {
        let helped = self.last(n).filter(|a| a.had_help).count();
        u32::try_from(helped).unwrap_or(u32::MAX)
    }

    /// Median seconds per term over attempts that carried timing data.
    #[must_use]
    pub fn median_seconds_per_term(&self) -> Option<f64> {
        let mut samples: Vec<f64> = self
            .attempts
            .iter()
            .filter_map(|a| a.seconds_per_term)
            .filter(|s| s.is_finite())
            .collect();
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(f64::total_cmp);
        let mid = samples.len() / 2;
        if samples.len() % 2 == 0 {
            Some((samples[mid - 1] + samples[mid]) / 2.0)
        } else {
            Some(samples[mid])
        }
    }
}

/// Mastery plus the attempt window for one skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillProgress {
    pub state: MasteryState,
    pub window: RecentWindow,
}

/// Result of replaying a history: per-skill progress and the replay cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterySnapshot {
    skills: BTreeMap<SkillId, SkillProgress>,
    last_answered_at: Option<DateTime<Utc>>,
    records_replayed: usize,
}

impl MasterySnapshot {
    #[must_use]
    pub fn get(&self, skill: &SkillId) -> Option<&SkillProgress> {
        self.skills.get(skill)
    }

    #[must_use]
    pub fn state(&self, skill: &SkillId) -> Option<&MasteryState> {
        self.skills.get(skill).map(|p| &p.state)
    }

    #[must_use]
    pub fn window(&self, skill: &SkillId) -> Option<&RecentWindow> {
        self.skills.get(skill).map(|p| &p.window)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SkillId, &SkillProgress)> {
        self.skills.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    #[must_use]
    pub fn last_answered_at(&self) -> Option<DateTime<Utc>> {
        self.last_answered_at
    }

    #[must_use]
    pub fn records_replayed(&self) -> usize {
        self.records_replayed
    }

    /// Level and provisional flag for a practiced skill; `None` if unseen.
    #[must_use]
    pub fn classify(
        &self,
        skill: &SkillId,
        options: &HistoryOptions,
    ) -> Option<MasteryClassification> {
        self.state(skill)
            .map(|st| options.classify(st.p_known, st.confidence))
    }

    /// Just the mastery states, keyed by skill.
    #[must_use]
    pub fn states(&self) -> BTreeMap<SkillId, MasteryState> {
        self.skills
            .iter()
            .map(|(id, progress)| (id.clone(), progress.state.clone()))
            .collect()
    }
}

//
// ─── REPLAY ────────────────────────────────────────────────────────────────────
//

/// Incremental, order-checked replay of problem history.
///
/// Replay is path-dependent, so records must arrive in non-decreasing
/// `answered_at` order. Out-of-order input is rejected, never re-sorted.
pub struct HistoryReplay<'a> {
    priors: &'a SkillPriors,
    options: &'a HistoryOptions,
    snapshot: MasterySnapshot,
}

impl<'a> HistoryReplay<'a> {
    #[must_use]
    pub fn new(priors: &'a SkillPriors, options: &'a HistoryOptions) -> Self {
        Self::resume(MasterySnapshot::default(), priors, options)
    }

    /// Continue replaying on top of an earlier snapshot.
    #[must_use]
    pub fn resume(
        snapshot: MasterySnapshot,
        priors: &'a SkillPriors,
        options: &'a HistoryOptions,
    ) -> Self {
        Self {
            priors,
            options,
            snapshot,
        }
    }

    /// Apply one record to every skill it exercised.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::OutOfOrder` if the record is older than the
    /// previous one. The replay state is left untouched in that case.
    pub fn apply(&mut self, record: &ProblemRecord) -> Result<(), HistoryError> {
        let at = record.answered_at();
        if let Some(previous) = self.snapshot.last_answered_at {
            if at < previous {
                return Err(HistoryError::OutOfOrder {
                    index: self.snapshot.records_replayed,
                    previous,
                    found: at,
                });
            }
        }

        let gap = Duration::minutes(self.options.session_gap_minutes);
        let attempt = Attempt {
            is_correct: record.is_correct(),
            had_help: record.had_help(),
            seconds_per_term: record.seconds_per_term(),
            answered_at: at,
        };

        let beliefs: Vec<(&SkillId, f64)> = record
            .skills_exercised()
            .iter()
            .map(|skill| {
                let p = self
                    .snapshot
                    .state(skill)
                    .map_or_else(|| self.priors.params_for(skill).p_init(), |st| st.p_known);
                (skill, p)
            })
            .collect();
        let posteriors = bkt::conjunctive_update(
            beliefs,
            record.is_correct(),
            record.had_help(),
            self.options.help_weight,
            self.priors,
        );

        for (skill, posterior) in posteriors {
            let progress = self
                .snapshot
                .skills
                .entry(skill.clone())
                .or_insert_with(|| SkillProgress {
                    state: MasteryState {
                        skill_id: skill.clone(),
                        p_known: posterior,
                        confidence: 0.0,
                        opportunities: 0,
                        correct: 0,
                        session_count: 0,
                        last_practiced_at: at,
                    },
                    window: RecentWindow::new(self.options.window_capacity),
                });

            let state = &mut progress.state;
            if state.opportunities == 0 || at - state.last_practiced_at > gap {
                state.session_count = state.session_count.saturating_add(1);
            }
            state.p_known = posterior;
            state.opportunities = state.opportunities.saturating_add(1);
            if record.is_correct() {
                state.correct = state.correct.saturating_add(1);
            }
            state.confidence = self.options.confidence(state.opportunities);
            state.last_practiced_at = at;
            progress.window.push(attempt);

            trace!(
                skill = %skill,
                correct = record.is_correct(),
                p_known = state.p_known,
                "bkt update"
            );
        }

        self.snapshot.last_answered_at = Some(at);
        self.snapshot.records_replayed += 1;
        Ok(())
    }

    /// Apply a batch of records in order.
    ///
    /// # Errors
    ///
    /// Stops at the first out-of-order record; earlier records stay applied.
    pub fn extend<'r>(
        &mut self,
        records: impl IntoIterator<Item = &'r ProblemRecord>,
    ) -> Result<(), HistoryError> {
        for record in records {
            self.apply(record)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> &MasterySnapshot {
        &self.snapshot
    }

    #[must_use]
    pub fn finish(self) -> MasterySnapshot {
        self.snapshot
    }
}

/// Replay a whole chronological history into per-skill mastery.
///
/// # Errors
///
/// Returns `HistoryError::OutOfOrder` if `history` is not time-ordered.
pub fn compute_mastery(
    history: &[ProblemRecord],
    priors: &SkillPriors,
    options: &HistoryOptions,
) -> Result<MasterySnapshot, HistoryError> {
    let mut replay = HistoryReplay::new(priors, options);
    replay.extend(history)?;
    let snapshot = replay.finish();
    debug!(
        records = snapshot.records_replayed(),
        skills = snapshot.len(),
        "mastery replay complete"
    );
    Ok(snapshot)
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use proptest::prelude::*;

    fn sid(raw: &str) -> SkillId {
        SkillId::new(raw).unwrap()
    }

    fn record(skills: &[&str], correct: bool, minutes: i64) -> ProblemRecord {
        let answer = if correct { 5 } else { 6 };
        ProblemRecord::new(
            vec![2, 3],
            answer,
            skills.iter().map(|s| sid(s)).collect(),
            4_000,
            false,
            fixed_now() + Duration::minutes(minutes),
        )
        .unwrap()
    }

    #[test]
    fn replay_creates_state_lazily_and_counts_opportunities() {
        let history = vec![
            record(&["basic.directAddition"], true, 0),
            record(&["basic.directAddition", "basic.heavenBead"], false, 1),
            record(&["basic.directAddition"], true, 2),
        ];
        let snap =
            compute_mastery(&history, &SkillPriors::default(), &HistoryOptions::default()).unwrap();

        let direct = snap.state(&sid("basic.directAddition")).unwrap();
        assert_eq!(direct.opportunities, 3);
        assert_eq!(direct.correct, 2);
        assert_eq!(direct.session_count, 1);
        assert!((direct.confidence - 3.0 / 25.0).abs() < 1e-12);

        let heaven = snap.state(&sid("basic.heavenBead")).unwrap();
        assert_eq!(heaven.opportunities, 1);
        assert!(heaven.p_known < 0.3);
        assert!(snap.state(&sid("basic.unseen")).is_none());
    }

    #[test]
    fn out_of_order_history_is_rejected() {
        let history = vec![
            record(&["basic.directAddition"], true, 5),
            record(&["basic.directAddition"], true, 1),
        ];
        let err = compute_mastery(&history, &SkillPriors::default(), &HistoryOptions::default())
            .unwrap_err();
        assert!(matches!(err, HistoryError::OutOfOrder { index: 1, .. }));
    }

    #[test]
    fn equal_timestamps_are_allowed() {
        let history = vec![
            record(&["basic.directAddition"], true, 0),
            record(&["basic.directAddition"], false, 0),
        ];
        assert!(
            compute_mastery(&history, &SkillPriors::default(), &HistoryOptions::default()).is_ok()
        );
    }

    #[test]
    fn multi_skill_record_updates_each_skill_conjunctively() {
        let priors = SkillPriors::default();
        let opts = HistoryOptions::default();
        let direct = sid("basic.directAddition");
        let heaven = sid("basic.heavenBead");

        let helped = ProblemRecord::new(
            vec![2, 3],
            5,
            vec![direct.clone(), heaven.clone()],
            4_000,
            true,
            fixed_now(),
        )
        .unwrap();
        let snap = compute_mastery(&[helped], &priors, &opts).unwrap();

        let p0 = priors.default_params().p_init();
        let expected = bkt::conjunctive_update(
            [(&direct, p0), (&heaven, p0)],
            true,
            true,
            opts.help_weight,
            &priors,
        );
        for (skill, posterior) in expected {
            let state = snap.state(skill).unwrap();
            assert!((state.p_known - posterior).abs() < 1e-12);
            assert_eq!(state.opportunities, 1);
        }

        let unhelped = record(&["basic.directAddition", "basic.heavenBead"], true, 0);
        let plain = compute_mastery(&[unhelped], &priors, &opts).unwrap();
        let with_help = snap.state(&direct).unwrap().p_known;
        assert!(with_help > p0);
        assert!(with_help < plain.state(&direct).unwrap().p_known);
    }

    #[test]
    fn snapshot_classifies_practiced_skills_only() {
        let history: Vec<ProblemRecord> = (0..30)
            .map(|i| record(&["basic.directAddition"], true, i))
            .collect();
        let opts = HistoryOptions::default();
        let snap = compute_mastery(&history, &SkillPriors::default(), &opts).unwrap();
        let class = snap.classify(&sid("basic.directAddition"), &opts).unwrap();
        assert_eq!(class.level, MasteryLevel::Strong);
        assert!(!class.provisional);
        assert!(snap.classify(&sid("basic.heavenBead"), &opts).is_none());
    }

    #[test]
    fn session_count_follows_idle_gaps() {
        let history = vec![
            record(&["basic.directAddition"], true, 0),
            record(&["basic.directAddition"], true, 10),
            record(&["basic.directAddition"], true, 120),
            record(&["basic.directAddition"], true, 60 * 24),
        ];
        let snap =
            compute_mastery(&history, &SkillPriors::default(), &HistoryOptions::default()).unwrap();
        assert_eq!(snap.state(&sid("basic.directAddition")).unwrap().session_count, 3);
    }

    #[test]
    fn classification_uses_cut_points_and_confidence() {
        let opts = HistoryOptions::default();
        assert_eq!(opts.classify(0.3, 1.0).level, MasteryLevel::Weak);
        assert_eq!(opts.classify(0.6, 1.0).level, MasteryLevel::Developing);
        assert_eq!(opts.classify(0.8, 1.0).level, MasteryLevel::Strong);
        assert!(opts.classify(0.9, 0.4).provisional);
        assert!(!opts.classify(0.9, 0.5).provisional);
        assert!((opts.confidence(10) - 0.4).abs() < 1e-12);
        assert_eq!(opts.confidence(100), 1.0);
    }

    #[test]
    fn window_tracks_recent_attempts() {
        let mut window = RecentWindow::new(3);
        for (i, correct) in [false, true, true, true].into_iter().enumerate() {
            window.push(Attempt {
                is_correct: correct,
                had_help: i == 3,
                seconds_per_term: Some(i as f64 + 1.0),
                answered_at: fixed_now(),
            });
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.accuracy(10), Some(1.0));
        assert!(window.last_n_all_correct(3));
        assert!(!window.last_n_all_correct(4));
        assert_eq!(window.help_count(3), 1);
        assert_eq!(window.median_seconds_per_term(), Some(3.0));
        assert_eq!(RecentWindow::new(5).accuracy(5), None);
    }

    proptest! {
        #[test]
        fn prefix_then_suffix_matches_full_replay(
            outcomes in proptest::collection::vec((any::<bool>(), any::<bool>()), 1..40),
            split in 0usize..40,
        ) {
            let history: Vec<ProblemRecord> = outcomes
                .iter()
                .enumerate()
                .map(|(i, (correct, both))| {
                    let skills: &[&str] = if *both {
                        &["basic.directAddition", "basic.heavenBead"]
                    } else {
                        &["basic.directAddition"]
                    };
                    record(skills, *correct, i as i64)
                })
                .collect();
            let split = split.min(history.len());
            let priors = SkillPriors::default();
            let opts = HistoryOptions::default();

            let whole = compute_mastery(&history, &priors, &opts).unwrap();

            let prefix = compute_mastery(&history[..split], &priors, &opts).unwrap();
            let mut resumed = HistoryReplay::resume(prefix, &priors, &opts);
            resumed.extend(&history[split..]).unwrap();

            prop_assert_eq!(resumed.finish(), whole);
        }
    }
}
