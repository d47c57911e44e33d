//! AI Observer - learns which collapse strategy suits a workload
//!
//! Completed executions are recorded against the most similar known
//! workload profile. Recommendations come from the learned metrics once a
//! profile has enough observations, and from static heuristics before that.

use crate::error::{try_reserve, Result};
use crate::register::Register;
use crate::types::{CollapseStrategy, QubitData, WorkloadProfile};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;

const INITIAL_DB_CAPACITY: usize = 32;
const PROFILE_MATCH_THRESHOLD: f32 = 0.8;
const MIN_CONFIDENCE: f32 = 0.5;
const QUALITY_EMA_ALPHA: f32 = 0.3;
const FULL_CONFIDENCE_OBSERVATIONS: f32 = 10.0;
const LOW_VARIANCE: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub total_uses: u32,
    pub success_count: u32,
    pub total_time_ms: u64,
    /// Exponential moving average of reported quality
    pub avg_quality: f32,
    /// Observer-wide observation number of the last use
    pub last_used: u64,
}

impl StrategyMetrics {
    pub fn success_rate(&self) -> f32 {
        if self.total_uses == 0 {
            0.0
        } else {
            self.success_count as f32 / self.total_uses as f32
        }
    }

    pub fn avg_time_ms(&self) -> f32 {
        if self.total_uses == 0 {
            0.0
        } else {
            self.total_time_ms as f32 / self.total_uses as f32
        }
    }

    /// Higher is better: quality times success rate, discounted by time
    pub fn score(&self) -> f32 {
        self.avg_quality * self.success_rate() / (self.avg_time_ms() + 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEntry {
    pub profile: WorkloadProfile,
    pub metrics: [StrategyMetrics; CollapseStrategy::COUNT],
    pub observation_count: u32,
    pub confidence: f32,
}

impl LearningEntry {
    fn new(profile: WorkloadProfile) -> Self {
        Self {
            profile,
            metrics: [StrategyMetrics::default(); CollapseStrategy::COUNT],
            observation_count: 0,
            confidence: 0.0,
        }
    }

    pub fn metrics_for(&self, strategy: CollapseStrategy) -> &StrategyMetrics {
        &self.metrics[strategy.index()]
    }
}

/// On-disk form of the learning database
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningDatabase {
    pub total_observations: u64,
    pub entries: Vec<LearningEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverStatistics {
    pub total_observations: u64,
    pub entries: usize,
    pub capacity: usize,
    pub enabled: bool,
}

struct ObserverState {
    db: Vec<LearningEntry>,
    enabled: bool,
    total_observations: u64,
}

impl ObserverState {
    fn best_match(&self, profile: &WorkloadProfile) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (i, entry) in self.db.iter().enumerate() {
            let similarity = profile_similarity(profile, &entry.profile);
            if similarity > best.map_or(0.0, |(_, s)| s) {
                best = Some((i, similarity));
            }
        }
        best
    }

    fn find_or_create_entry(&mut self, profile: &WorkloadProfile) -> Result<usize> {
        if let Some((index, similarity)) = self.best_match(profile) {
            if similarity >= PROFILE_MATCH_THRESHOLD {
                return Ok(index);
            }
        }

        if self.db.len() == self.db.capacity() {
            let new_capacity = if self.db.capacity() == 0 {
                INITIAL_DB_CAPACITY
            } else {
                self.db.capacity() * 2
            };
            let additional = new_capacity - self.db.len();
            try_reserve(&mut self.db, additional, "learning database")?;
            log::debug!("Learning database grown to {} entries", self.db.capacity());
        }

        self.db.push(LearningEntry::new(*profile));
        Ok(self.db.len() - 1)
    }
}

/// Similarity of two workload profiles in [0, 1]
pub fn profile_similarity(a: &WorkloadProfile, b: &WorkloadProfile) -> f32 {
    let mut similarity = 0.0f32;
    let mut weight_sum = 0.0f32;

    let qubit_diff = a.qubit_count.abs_diff(b.qubit_count) as f32;
    let qubit_sim = if qubit_diff < 10.0 { 1.0 - qubit_diff / 10.0 } else { 0.0 };
    similarity += qubit_sim * 0.3;
    weight_sum += 0.3;

    if a.avg_execution_time > 0 && b.avg_execution_time > 0 {
        similarity += ratio(a.avg_execution_time, b.avg_execution_time) * 0.25;
        weight_sum += 0.25;
    }

    if a.has_evaluation == b.has_evaluation {
        similarity += 0.15;
        weight_sum += 0.15;
    }
    if a.requires_all == b.requires_all {
        similarity += 0.15;
        weight_sum += 0.15;
    }

    if a.data_size > 0 && b.data_size > 0 {
        similarity += ratio(a.data_size, b.data_size) * 0.15;
        weight_sum += 0.15;
    }

    if weight_sum > 0.0 {
        similarity / weight_sum
    } else {
        0.0
    }
}

fn ratio(a: u32, b: u32) -> f32 {
    let r = a as f32 / b as f32;
    if r > 1.0 {
        1.0 / r
    } else {
        r
    }
}

/// Static recommendation used until a profile has been learned
pub fn heuristic_strategy(profile: &WorkloadProfile) -> CollapseStrategy {
    if profile.has_evaluation {
        CollapseStrategy::Best
    } else if profile.requires_all {
        CollapseStrategy::Combine
    } else if profile.variance < LOW_VARIANCE {
        CollapseStrategy::FirstWins
    } else {
        CollapseStrategy::Validate
    }
}

pub struct AiObserver {
    state: RwLock<ObserverState>,
}

impl AiObserver {
    pub fn new() -> Self {
        log::info!("AI observer initialized");
        Self {
            state: RwLock::new(ObserverState {
                db: Vec::new(),
                enabled: true,
                total_observations: 0,
            }),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.write().enabled = enabled;
        log::info!("AI observer {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_enabled(&self) -> bool {
        self.state.read().enabled
    }

    pub fn observe_start<T: QubitData>(&self, register: &Register<T>) {
        if !self.is_enabled() {
            return;
        }
        log::debug!(
            "Observing register {}: {} qubits, strategy {}",
            register.id(),
            register.len(),
            register.strategy()
        );
    }

    /// Record the outcome of a finished (and possibly collapsed) register
    pub fn observe_complete<T: QubitData>(
        &self,
        register: &Register<T>,
        elapsed_ms: u64,
        quality: f32,
    ) -> Result<()> {
        self.observe(
            &register.profile(),
            register.strategy(),
            register.is_collapsed(),
            elapsed_ms,
            quality,
        )
    }

    pub fn observe(
        &self,
        profile: &WorkloadProfile,
        strategy: CollapseStrategy,
        collapsed: bool,
        elapsed_ms: u64,
        quality: f32,
    ) -> Result<()> {
        let mut state = self.state.write();
        if !state.enabled {
            return Ok(());
        }

        let index = state.find_or_create_entry(profile)?;
        let observation = state.total_observations;
        let entry = &mut state.db[index];

        let metrics = &mut entry.metrics[strategy.index()];
        metrics.total_uses += 1;
        if collapsed {
            metrics.success_count += 1;
        }
        metrics.total_time_ms += elapsed_ms;
        metrics.avg_quality =
            metrics.avg_quality * (1.0 - QUALITY_EMA_ALPHA) + quality * QUALITY_EMA_ALPHA;
        metrics.last_used = observation;

        entry.observation_count += 1;
        entry.confidence = (entry.observation_count as f32 / FULL_CONFIDENCE_OBSERVATIONS).min(1.0);
        let confidence = entry.confidence;

        state.total_observations += 1;
        log::debug!(
            "Observed {} ({} ms, quality {:.2}): entry {} confidence {:.2}",
            strategy,
            elapsed_ms,
            quality,
            index,
            confidence
        );
        Ok(())
    }

    pub fn recommend_strategy(&self, profile: &WorkloadProfile) -> CollapseStrategy {
        let state = self.state.read();
        if !state.enabled {
            return CollapseStrategy::FirstWins;
        }

        let entry = match state.best_match(profile) {
            Some((index, similarity)) if similarity >= PROFILE_MATCH_THRESHOLD => &state.db[index],
            _ => return heuristic_strategy(profile),
        };
        if entry.confidence < MIN_CONFIDENCE {
            return heuristic_strategy(profile);
        }

        let mut best = CollapseStrategy::FirstWins;
        let mut best_score = 0.0f32;
        for strategy in CollapseStrategy::ALL {
            let metrics = entry.metrics_for(strategy);
            if metrics.total_uses == 0 {
                continue;
            }
            let score = metrics.score();
            if score > best_score {
                best_score = score;
                best = strategy;
            }
        }
        log::debug!("Recommending {} (score {:.4})", best, best_score);
        best
    }

    /// Confidence of the first matching entry that has used `strategy`
    pub fn confidence(&self, profile: &WorkloadProfile, strategy: CollapseStrategy) -> f32 {
        let state = self.state.read();
        if !state.enabled {
            return 0.0;
        }
        state
            .db
            .iter()
            .find(|entry| {
                profile_similarity(profile, &entry.profile) >= PROFILE_MATCH_THRESHOLD
                    && entry.metrics_for(strategy).total_uses > 0
            })
            .map_or(0.0, |entry| entry.confidence)
    }

    pub fn stats(&self) -> ObserverStatistics {
        let state = self.state.read();
        ObserverStatistics {
            total_observations: state.total_observations,
            entries: state.db.len(),
            capacity: state.db.capacity(),
            enabled: state.enabled,
        }
    }

    pub fn entries(&self) -> Vec<LearningEntry> {
        self.state.read().db.clone()
    }

    /// Forget everything learned; the enabled flag is kept
    pub fn reset_learning(&self) {
        let mut state = self.state.write();
        state.db = Vec::new();
        state.total_observations = 0;
        log::info!("AI observer learning reset");
    }

    pub fn export(&self) -> LearningDatabase {
        let state = self.state.read();
        LearningDatabase {
            total_observations: state.total_observations,
            entries: state.db.clone(),
        }
    }

    /// Replace the learning database
    pub fn import(&self, database: LearningDatabase) -> Result<()> {
        let mut db = Vec::new();
        try_reserve(&mut db, database.entries.len().max(INITIAL_DB_CAPACITY), "learning database")?;
        db.extend(database.entries);

        let mut state = self.state.write();
        state.db = db;
        state.total_observations = database.total_observations;
        Ok(())
    }

    pub fn export_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }

    pub fn import_json(&self, json: &str) -> anyhow::Result<()> {
        let database: LearningDatabase = serde_json::from_str(json)?;
        self.import(database)?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, self.export_json()?)?;
        log::info!("Saved learning database to {}", path.display());
        Ok(())
    }

    pub fn load(&self, path: &Path) -> anyhow::Result<()> {
        let json = std::fs::read_to_string(path)?;
        self.import_json(&json)?;
        log::info!("Loaded learning database from {}", path.display());
        Ok(())
    }
}

impl Default for AiObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(qubits: u32, has_evaluation: bool) -> WorkloadProfile {
        WorkloadProfile {
            qubit_count: qubits,
            avg_execution_time: 20,
            variance: 4,
            has_evaluation,
            requires_all: true,
            data_size: 8,
        }
    }

    #[test]
    fn test_similarity() {
        let a = profile(4, true);
        assert!((profile_similarity(&a, &a) - 1.0).abs() < 1e-6);

        let far = WorkloadProfile { qubit_count: 40, ..a };
        assert!(profile_similarity(&a, &far) < PROFILE_MATCH_THRESHOLD);

        let flags = WorkloadProfile {
            has_evaluation: false,
            requires_all: false,
            ..a
        };
        // flags drop out of the normalization entirely when they differ
        assert!((profile_similarity(&a, &flags) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_heuristics() {
        let observer = AiObserver::new();
        assert_eq!(observer.recommend_strategy(&profile(4, true)), CollapseStrategy::Best);
        assert_eq!(observer.recommend_strategy(&profile(4, false)), CollapseStrategy::Combine);

        let mut p = profile(4, false);
        p.requires_all = false;
        assert_eq!(observer.recommend_strategy(&p), CollapseStrategy::FirstWins);
        p.variance = 500;
        assert_eq!(observer.recommend_strategy(&p), CollapseStrategy::Validate);
    }

    #[test]
    fn test_confidence_ramps_to_one() {
        let observer = AiObserver::new();
        let p = profile(4, true);
        let mut last = 0.0;
        for i in 1..=12 {
            observer.observe(&p, CollapseStrategy::Vote, true, 5, 0.9).unwrap();
            let c = observer.confidence(&p, CollapseStrategy::Vote);
            assert!(c >= last);
            if i == 10 {
                assert_eq!(c, 1.0);
            }
            last = c;
        }
        assert_eq!(observer.stats().entries, 1);
        assert_eq!(observer.stats().total_observations, 12);
    }

    #[test]
    fn test_learned_recommendation() {
        let observer = AiObserver::new();
        let p = profile(6, true);
        for _ in 0..5 {
            observer.observe(&p, CollapseStrategy::Vote, true, 2, 0.9).unwrap();
            observer.observe(&p, CollapseStrategy::Best, true, 50, 0.9).unwrap();
        }
        assert_eq!(observer.recommend_strategy(&p), CollapseStrategy::Vote);
    }

    #[test]
    fn test_metrics_update() {
        let observer = AiObserver::new();
        let p = profile(3, false);
        observer.observe(&p, CollapseStrategy::Combine, true, 10, 1.0).unwrap();
        observer.observe(&p, CollapseStrategy::Combine, false, 30, 0.0).unwrap();

        let entries = observer.entries();
        let m = entries[0].metrics_for(CollapseStrategy::Combine);
        assert_eq!(m.total_uses, 2);
        assert_eq!(m.success_count, 1);
        assert_eq!(m.total_time_ms, 40);
        assert!((m.avg_quality - 0.21).abs() < 1e-6);
        assert_eq!(m.last_used, 1);
    }

    #[test]
    fn test_database_doubles() {
        let observer = AiObserver::new();
        for i in 0..33 {
            observer
                .observe(&profile(i * 20, false), CollapseStrategy::FirstWins, true, 1, 1.0)
                .unwrap();
        }
        let stats = observer.stats();
        assert_eq!(stats.entries, 33);
        assert!(stats.capacity >= 64);
    }

    #[test]
    fn test_disabled_observer() {
        let observer = AiObserver::new();
        observer.set_enabled(false);
        observer.observe(&profile(4, true), CollapseStrategy::Best, true, 1, 1.0).unwrap();
        assert_eq!(observer.stats().total_observations, 0);
        assert_eq!(observer.recommend_strategy(&profile(4, true)), CollapseStrategy::FirstWins);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("learning.json");

        let observer = AiObserver::new();
        observer.observe(&profile(4, true), CollapseStrategy::Best, true, 3, 0.8).unwrap();
        observer.save(&path).unwrap();

        let restored = AiObserver::new();
        restored.load(&path).unwrap();
        assert_eq!(restored.entries(), observer.entries());
        assert_eq!(restored.stats().total_observations, 1);

        restored.reset_learning();
        assert_eq!(restored.stats().entries, 0);
        assert!(restored.import_json("not json").is_err());
    }
}
