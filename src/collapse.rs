//! Collapse Library - reduces the results of a register to one answer
//!
//! Every strategy that picks a single result is exposed as an index
//! function over the gathered results so the ensemble strategy can replay
//! it without copying or touching temporal history. Results are always in
//! qubit-array order.

use crate::error::{QuantumError, Result};
use crate::types::{CollapseStrategy, QubitData};
use std::fmt;
use std::sync::Arc;

/// Scores a result; higher is better
pub type EvaluateFn<T> = Arc<dyn Fn(&T) -> i64 + Send + Sync>;

/// Reduces all results into the output
pub type CombineFn<T> = Arc<dyn Fn(&[&T], &mut T) + Send + Sync>;

/// Arbitrary caller-supplied collapse
pub type CustomCollapseFn<T> = Arc<dyn Fn(&[&T], &mut T) + Send + Sync>;

/// Maximum number of ensemble members
pub const MAX_ENSEMBLE_MEMBERS: usize = 3;

/// Fraction of the speculative score another result must reach to confirm it
const SPECULATIVE_CONFIRM_RATIO: f64 = 0.9;

/// Passes made by the progressive strategy
const PROGRESSIVE_ROUNDS: usize = 3;

/// Below this roll the fuzzy strategy takes the best result outright
const FUZZY_BEST_PERCENT: u32 = 70;

/// Weighted scoring over up to three dimensions
pub struct MultidimCriteria<T> {
    pub quality: Option<EvaluateFn<T>>,
    pub speed: Option<EvaluateFn<T>>,
    pub resource: Option<EvaluateFn<T>>,
    /// Weights for quality, speed and resource
    pub weights: [i64; 3],
}

impl<T> MultidimCriteria<T> {
    pub fn has_evaluator(&self) -> bool {
        self.quality.is_some() || self.speed.is_some() || self.resource.is_some()
    }

    fn aggregate(&self, result: &T) -> i64 {
        let total_weight = match self.weights.iter().map(|&w| w as i128).sum::<i128>() {
            0 => 1,
            w => w,
        };
        let score = |f: &Option<EvaluateFn<T>>| f.as_ref().map_or(0, |f| f(result)) as i128;

        let weighted = [&self.quality, &self.speed, &self.resource]
            .into_iter()
            .zip(self.weights)
            .fold(0i128, |acc, (f, w)| acc.saturating_add(score(f).saturating_mul(w as i128)));
        clamp_i64(weighted / total_weight)
    }
}

impl<T> Clone for MultidimCriteria<T> {
    fn clone(&self) -> Self {
        Self {
            quality: self.quality.clone(),
            speed: self.speed.clone(),
            resource: self.resource.clone(),
            weights: self.weights,
        }
    }
}

/// Scores recorded by the previous temporal collapse
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalHistory {
    window_size: usize,
    /// Weight of the trend term, 0-100
    trend_weight: i64,
    history: Vec<i64>,
}

impl TemporalHistory {
    pub fn new(window_size: usize, trend_weight: i64) -> Self {
        Self {
            window_size,
            trend_weight: trend_weight.clamp(0, 100),
            history: Vec::new(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn trend_weight(&self) -> i64 {
        self.trend_weight
    }

    pub fn history(&self) -> &[i64] {
        &self.history
    }

    /// Blend each current score with its trend against the stored history
    pub fn blend(&self, current: &[i64]) -> Vec<i64> {
        let w = self.trend_weight as i128;
        current
            .iter()
            .enumerate()
            .map(|(i, &cur)| match self.history.get(i) {
                Some(&hist) => {
                    let (cur, hist) = (cur as i128, hist as i128);
                    let trend = cur - hist;
                    clamp_i64((cur * (100 - w) + (cur + trend) * w) / 100)
                }
                None => cur,
            })
            .collect()
    }

    /// Replace the history with the latest scores, bounded by the window
    pub fn record(&mut self, current: &[i64]) {
        let keep = current.len().min(self.window_size);
        self.history.clear();
        self.history.extend_from_slice(&current[..keep]);
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

/// One strategy voting in an ensemble
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleMember {
    pub strategy: CollapseStrategy,
    pub weight: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleConfig {
    members: Vec<EnsembleMember>,
}

impl EnsembleConfig {
    /// Members with non-positive weight are dropped; 1 to 3 must remain
    pub fn new(members: &[(CollapseStrategy, i64)]) -> Result<Self> {
        let members: Vec<EnsembleMember> = members
            .iter()
            .filter(|(_, weight)| *weight > 0)
            .map(|&(strategy, weight)| EnsembleMember { strategy, weight })
            .collect();

        if members.is_empty() || members.len() > MAX_ENSEMBLE_MEMBERS {
            return Err(QuantumError::InvalidEnsemble);
        }
        Ok(Self { members })
    }

    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }
}

/// Per-register strategy configuration. Every hook is optional.
pub struct CollapseConfig<T> {
    pub(crate) evaluate: Option<EvaluateFn<T>>,
    pub(crate) combine: Option<CombineFn<T>>,
    pub(crate) custom: Option<CustomCollapseFn<T>>,
    pub(crate) multidim: Option<MultidimCriteria<T>>,
    pub(crate) temporal: Option<TemporalHistory>,
    pub(crate) ensemble: Option<EnsembleConfig>,
}

impl<T> Default for CollapseConfig<T> {
    fn default() -> Self {
        Self {
            evaluate: None,
            combine: None,
            custom: None,
            multidim: None,
            temporal: None,
            ensemble: None,
        }
    }
}

impl<T> fmt::Debug for CollapseConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollapseConfig")
            .field("evaluate", &self.evaluate.is_some())
            .field("combine", &self.combine.is_some())
            .field("custom", &self.custom.is_some())
            .field("multidim", &self.multidim.is_some())
            .field("temporal", &self.temporal)
            .field("ensemble", &self.ensemble)
            .finish()
    }
}

impl<T> CollapseConfig<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evaluate(mut self, evaluate: EvaluateFn<T>) -> Self {
        self.evaluate = Some(evaluate);
        self
    }

    pub fn with_combine(mut self, combine: CombineFn<T>) -> Self {
        self.combine = Some(combine);
        self
    }

    pub fn with_custom(mut self, custom: CustomCollapseFn<T>) -> Self {
        self.custom = Some(custom);
        self
    }

    pub fn with_multidim(mut self, criteria: MultidimCriteria<T>) -> Self {
        self.multidim = Some(criteria);
        self
    }

    pub fn with_temporal(mut self, history: TemporalHistory) -> Self {
        self.temporal = Some(history);
        self
    }

    pub fn with_ensemble(mut self, ensemble: EnsembleConfig) -> Self {
        self.ensemble = Some(ensemble);
        self
    }

    pub fn has_evaluate(&self) -> bool {
        self.evaluate.is_some()
    }

    pub fn temporal(&self) -> Option<&TemporalHistory> {
        self.temporal.as_ref()
    }

    pub fn ensemble(&self) -> Option<&EnsembleConfig> {
        self.ensemble.as_ref()
    }

    /// Whether everything `strategy` needs is configured
    pub fn supports(&self, strategy: CollapseStrategy) -> bool {
        match strategy {
            CollapseStrategy::FirstWins
            | CollapseStrategy::LastWins
            | CollapseStrategy::Vote
            | CollapseStrategy::Validate => true,
            CollapseStrategy::Best
            | CollapseStrategy::Fuzzy
            | CollapseStrategy::Progressive
            | CollapseStrategy::Speculative => self.evaluate.is_some(),
            CollapseStrategy::Combine => self.combine.is_some(),
            CollapseStrategy::Custom => self.custom.is_some(),
            CollapseStrategy::Multidim => self.multidim.as_ref().is_some_and(|m| m.has_evaluator()),
            CollapseStrategy::Temporal => self.evaluate.is_some() && self.temporal.is_some(),
            CollapseStrategy::Ensemble => {
                self.ensemble.as_ref().is_some_and(|e| !e.members.is_empty())
            }
        }
    }

    /// `supports` for every strategy, indexed by `CollapseStrategy::index`
    pub fn support_mask(&self) -> [bool; CollapseStrategy::COUNT] {
        let mut mask = [false; CollapseStrategy::COUNT];
        for strategy in CollapseStrategy::ALL {
            mask[strategy.index()] = self.supports(strategy);
        }
        mask
    }

    pub fn check(&self, strategy: CollapseStrategy) -> Result<()> {
        if self.supports(strategy) {
            Ok(())
        } else {
            Err(QuantumError::MissingCallback {
                strategy,
                requirement: strategy.requirement(),
            })
        }
    }

    /// Index `strategy` would select, without side effects.
    ///
    /// `None` for strategies that do not select a single result (Combine,
    /// Custom, Validate, Ensemble), for a Vote without majority, and when
    /// the requirements are not met.
    pub fn selection_index(&self, strategy: CollapseStrategy, results: &[&T]) -> Option<usize>
    where
        T: PartialEq,
    {
        if results.is_empty() || !self.supports(strategy) {
            return None;
        }
        let evaluate = self.evaluate.as_deref();

        match strategy {
            CollapseStrategy::FirstWins => Some(0),
            CollapseStrategy::LastWins => Some(results.len() - 1),
            CollapseStrategy::Best => evaluate.map(|f| best_index(results, f)),
            CollapseStrategy::Vote => vote_index(results),
            CollapseStrategy::Fuzzy => evaluate.map(|f| fuzzy_index(results, f)),
            CollapseStrategy::Progressive => evaluate.map(|f| progressive_index(results, f)),
            CollapseStrategy::Speculative => evaluate.map(|f| speculative_index(results, f)),
            CollapseStrategy::Multidim => {
                self.multidim.as_ref().map(|m| multidim_index(results, m))
            }
            CollapseStrategy::Temporal => match (evaluate, self.temporal.as_ref()) {
                (Some(f), Some(history)) => Some(temporal_index(results, f, history).0),
                _ => None,
            },
            CollapseStrategy::Combine
            | CollapseStrategy::Custom
            | CollapseStrategy::Validate
            | CollapseStrategy::Ensemble => None,
        }
    }
}

fn scores<T>(results: &[&T], evaluate: &(dyn Fn(&T) -> i64 + Send + Sync)) -> Vec<i64> {
    results.iter().map(|r| evaluate(r)).collect()
}

/// First index holding the maximum score
fn argmax(scores: &[i64]) -> usize {
    let mut best = 0;
    for (i, &score) in scores.iter().enumerate().skip(1) {
        if score > scores[best] {
            best = i;
        }
    }
    best
}

fn clamp_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

pub fn best_index<T>(results: &[&T], evaluate: &(dyn Fn(&T) -> i64 + Send + Sync)) -> usize {
    argmax(&scores(results, evaluate))
}

/// A member of the group holding a strict majority, if any
pub fn vote_index<T: PartialEq>(results: &[&T]) -> Option<usize> {
    let count = results.len();
    (0..count).find(|&i| {
        let agreeing = results.iter().filter(|other| **other == results[i]).count();
        agreeing * 2 > count
    })
}

/// Whether every result equals the first
pub fn all_agree<T: PartialEq>(results: &[&T]) -> bool {
    results.iter().all(|r| *r == results[0])
}

/// Pseudo-random pick seeded from the first score.
///
/// Deterministic for a given score vector.
pub fn fuzzy_pick(scores: &[i64]) -> usize {
    if scores.is_empty() {
        return 0;
    }
    let seed = (scores[0] as u32).wrapping_mul(1_103_515_245).wrapping_add(12_345);
    let roll = (seed / 65_536) % 100;

    if roll < FUZZY_BEST_PERCENT {
        return argmax(scores);
    }

    let total: i128 = scores.iter().map(|&s| s as i128).sum();
    if total > 0 {
        let target = roll as i128 * total / 100;
        let mut cumulative = 0i128;
        for (i, &score) in scores.iter().enumerate() {
            cumulative += score as i128;
            if cumulative >= target {
                return i;
            }
        }
        0
    } else {
        roll as usize % scores.len()
    }
}

pub fn fuzzy_index<T>(results: &[&T], evaluate: &(dyn Fn(&T) -> i64 + Send + Sync)) -> usize {
    fuzzy_pick(&scores(results, evaluate))
}

pub fn progressive_index<T>(results: &[&T], evaluate: &(dyn Fn(&T) -> i64 + Send + Sync)) -> usize {
    let scores = scores(results, evaluate);
    let mut current = 0;
    for _ in 0..PROGRESSIVE_ROUNDS {
        for i in 1..scores.len() {
            if scores[i] > scores[current] {
                current = i;
            }
        }
    }
    current
}

pub fn speculative_index<T>(results: &[&T], evaluate: &(dyn Fn(&T) -> i64 + Send + Sync)) -> usize {
    if results.len() < 2 {
        return 0;
    }
    let speculated = evaluate(results[0]);
    let mut confirmations = 0u32;
    let mut contradictions = 0u32;
    let mut best_alternative: Option<(usize, i64)> = None;

    for (i, result) in results.iter().enumerate().skip(1) {
        let score = evaluate(result);
        if score as f64 >= speculated as f64 * SPECULATIVE_CONFIRM_RATIO {
            confirmations += 1;
        } else if best_alternative.map_or(true, |(_, best)| score > best) {
            contradictions += 1;
            best_alternative = Some((i, score));
        }
    }

    match best_alternative {
        Some((i, score)) if contradictions > confirmations && score > speculated => {
            log::debug!("Speculation rolled back to result {} ({} > {})", i, score, speculated);
            i
        }
        _ => 0,
    }
}

pub fn multidim_index<T>(results: &[&T], criteria: &MultidimCriteria<T>) -> usize {
    let aggregates: Vec<i64> = results.iter().map(|r| criteria.aggregate(r)).collect();
    argmax(&aggregates)
}

/// Selected index plus the raw current scores (for the history update)
pub fn temporal_index<T>(
    results: &[&T],
    evaluate: &(dyn Fn(&T) -> i64 + Send + Sync),
    history: &TemporalHistory,
) -> (usize, Vec<i64>) {
    let current = scores(results, evaluate);
    let blended = history.blend(&current);
    (argmax(&blended), current)
}

/// Weighted vote over the members' selections; ties go to the lowest index
pub fn ensemble_index<T: PartialEq>(
    results: &[&T],
    config: &CollapseConfig<T>,
    ensemble: &EnsembleConfig,
) -> usize {
    let mut votes = vec![0i64; results.len()];
    for member in &ensemble.members {
        let selected = config.selection_index(member.strategy, results).unwrap_or(0);
        votes[selected] = votes[selected].saturating_add(member.weight);
    }
    argmax(&votes)
}

/// Collapse `results` into `output` using `strategy`.
///
/// On error the output is left untouched.
pub fn collapse<T: QubitData>(
    strategy: CollapseStrategy,
    results: &[&T],
    config: &mut CollapseConfig<T>,
    output: &mut T,
) -> Result<()> {
    if results.is_empty() {
        return Err(QuantumError::NoResults);
    }
    config.check(strategy)?;

    let selected = match strategy {
        CollapseStrategy::Combine => {
            if let Some(combine) = &config.combine {
                combine(results, output);
            }
            return Ok(());
        }
        CollapseStrategy::Custom => {
            if let Some(custom) = &config.custom {
                custom(results, output);
            }
            return Ok(());
        }
        CollapseStrategy::Validate => {
            if !all_agree(results) {
                return Err(QuantumError::AggregationFailed(format!(
                    "{} results do not all agree",
                    results.len()
                )));
            }
            0
        }
        CollapseStrategy::Vote => vote_index(results).ok_or_else(|| {
            QuantumError::AggregationFailed(format!(
                "no strict majority among {} results",
                results.len()
            ))
        })?,
        CollapseStrategy::Temporal => {
            let (selected, current) = match (config.evaluate.as_deref(), config.temporal.as_ref()) {
                (Some(evaluate), Some(history)) => temporal_index(results, evaluate, history),
                _ => (0, Vec::new()),
            };
            if let Some(history) = config.temporal.as_mut() {
                history.record(&current);
            }
            selected
        }
        CollapseStrategy::Ensemble => match &config.ensemble {
            Some(ensemble) => ensemble_index(results, &*config, ensemble),
            None => 0,
        },
        other => config.selection_index(other, results).unwrap_or(0),
    };

    log::debug!("Collapse {}: selected result {} of {}", strategy, selected, results.len());
    *output = results[selected].clone();
    Ok(())
}
