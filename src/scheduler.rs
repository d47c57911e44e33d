//! Predictive Scheduler - estimates qubit run times and proposes an order
//!
//! Estimates come from a small table of learned averages keyed by the
//! qubit's declared result size, falling back to a size heuristic.

use crate::register::Register;
use crate::types::{QubitData, QubitStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum learned patterns kept
pub const MAX_PATTERNS: usize = 32;

const LEARNED_CONFIDENCE: f32 = 0.8;
const HEURISTIC_CONFIDENCE: f32 = 0.3;
const ACCURATE_ERROR: f64 = 0.2;
const ERROR_BLEND_OLD: f64 = 0.7;
const ERROR_BLEND_NEW: f64 = 0.3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleStrategy {
    Sequential,
    Random,
    LongestFirst,
    ShortestFirst,
    Balanced,
    #[default]
    AiPredicted,
}

impl fmt::Display for ScheduleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleStrategy::Sequential => "sequential",
            ScheduleStrategy::Random => "random",
            ScheduleStrategy::LongestFirst => "longest-first",
            ScheduleStrategy::ShortestFirst => "shortest-first",
            ScheduleStrategy::Balanced => "balanced",
            ScheduleStrategy::AiPredicted => "ai-predicted",
        };
        f.write_str(name)
    }
}

impl FromStr for ScheduleStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "sequential" => Ok(ScheduleStrategy::Sequential),
            "random" => Ok(ScheduleStrategy::Random),
            "longest-first" => Ok(ScheduleStrategy::LongestFirst),
            "shortest-first" => Ok(ScheduleStrategy::ShortestFirst),
            "balanced" => Ok(ScheduleStrategy::Balanced),
            "ai-predicted" => Ok(ScheduleStrategy::AiPredicted),
            other => Err(format!("unknown schedule strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QubitPrediction {
    pub qubit_index: usize,
    pub predicted_time_ms: f64,
    pub confidence: f32,
    pub complexity_score: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub data_size: usize,
    pub avg_time_ms: f64,
    pub sample_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatistics {
    pub total_scheduled: u64,
    pub predictions_accurate: u64,
    pub avg_prediction_error: f64,
    pub learned_patterns: usize,
}

pub struct PredictiveScheduler {
    strategy: ScheduleStrategy,
    predictions: Vec<QubitPrediction>,
    patterns: Vec<LearnedPattern>,
    total_scheduled: u64,
    predictions_accurate: u64,
    avg_prediction_error: f64,
}

fn estimate_complexity(data_size: usize) -> u64 {
    data_size as u64 * 10
}

impl PredictiveScheduler {
    pub fn new(strategy: ScheduleStrategy) -> Self {
        Self {
            strategy,
            predictions: Vec::new(),
            patterns: Vec::with_capacity(MAX_PATTERNS),
            total_scheduled: 0,
            predictions_accurate: 0,
            avg_prediction_error: 0.0,
        }
    }

    pub fn strategy(&self) -> ScheduleStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: ScheduleStrategy) {
        self.strategy = strategy;
    }

    /// Learned average for an exact result size
    pub fn learned_average(&self, data_size: usize) -> Option<f64> {
        self.patterns
            .iter()
            .find(|p| p.data_size == data_size)
            .map(|p| p.avg_time_ms)
    }

    /// Predict run time for every qubit of `register`
    pub fn predict<T: QubitData>(&mut self, register: &Register<T>) -> &[QubitPrediction] {
        self.predictions.clear();
        for (i, qubit) in register.qubits().iter().enumerate() {
            let size = qubit.result_size();
            let complexity_score = estimate_complexity(size);
            let prediction = match self.learned_average(size) {
                Some(avg) => QubitPrediction {
                    qubit_index: i,
                    predicted_time_ms: avg,
                    confidence: LEARNED_CONFIDENCE,
                    complexity_score,
                },
                None => QubitPrediction {
                    qubit_index: i,
                    predicted_time_ms: complexity_score.max(1) as f64,
                    confidence: HEURISTIC_CONFIDENCE,
                    complexity_score,
                },
            };
            self.predictions.push(prediction);
        }
        self.total_scheduled += register.len() as u64;
        log::debug!("Predicted {} qubits ({})", register.len(), self.strategy);
        &self.predictions
    }

    pub fn prediction(&self, index: usize) -> Option<&QubitPrediction> {
        self.predictions.get(index)
    }

    /// Proposed execution order for the last prediction.
    ///
    /// Always a permutation of `0..register.len()`; identity when nothing was
    /// predicted for a register of this size.
    pub fn get_order<T: QubitData>(&self, register: &Register<T>) -> Vec<usize> {
        let mut order: Vec<usize> = (0..register.len()).collect();
        if self.predictions.len() != register.len() {
            return order;
        }

        let time = |i: &usize| self.predictions[*i].predicted_time_ms;
        match self.strategy {
            ScheduleStrategy::LongestFirst
            | ScheduleStrategy::Balanced
            | ScheduleStrategy::AiPredicted => {
                order.sort_by(|a, b| time(b).total_cmp(&time(a)));
            }
            ScheduleStrategy::ShortestFirst => {
                order.sort_by(|a, b| time(a).total_cmp(&time(b)));
            }
            ScheduleStrategy::Sequential | ScheduleStrategy::Random => {}
        }
        order
    }

    /// Compare the last predictions with what actually happened
    pub fn learn<T: QubitData>(&mut self, register: &Register<T>) {
        let predictions = std::mem::take(&mut self.predictions);
        self.learn_from(register, &predictions);
        self.predictions = predictions;
    }

    /// Compare `predictions`, made for this register, with what actually
    /// happened. Other registers may have been predicted in between.
    pub fn learn_from<T: QubitData>(
        &mut self,
        register: &Register<T>,
        predictions: &[QubitPrediction],
    ) {
        if predictions.len() != register.len() {
            log::warn!("Scheduler learn: no predictions for this register");
            return;
        }

        let mut accurate = 0u64;
        let mut total_error = 0.0f64;

        for (i, qubit) in register.qubits().iter().enumerate() {
            if qubit.status() != QubitStatus::Completed {
                continue;
            }
            let Some(elapsed) = qubit.elapsed() else {
                continue;
            };
            let actual = elapsed.as_secs_f64() * 1000.0;
            let predicted = predictions[i].predicted_time_ms;

            let error = if actual > 0.0 {
                (actual - predicted).abs() / actual
            } else {
                0.0
            };
            total_error += error;
            if error < ACCURATE_ERROR {
                accurate += 1;
            }

            self.record(qubit.result_size(), actual);
        }

        let count = register.len() as f64;
        self.avg_prediction_error =
            self.avg_prediction_error * ERROR_BLEND_OLD + (total_error / count) * ERROR_BLEND_NEW;
        self.predictions_accurate += accurate;
        log::debug!(
            "Scheduler learned: {} accurate, smoothed error {:.2}",
            accurate,
            self.avg_prediction_error
        );
    }

    fn record(&mut self, data_size: usize, actual_ms: f64) {
        if let Some(pattern) = self.patterns.iter_mut().find(|p| p.data_size == data_size) {
            let samples = pattern.sample_count as f64;
            pattern.avg_time_ms = (pattern.avg_time_ms * samples + actual_ms) / (samples + 1.0);
            pattern.sample_count += 1;
        } else if self.patterns.len() < MAX_PATTERNS {
            self.patterns.push(LearnedPattern {
                data_size,
                avg_time_ms: actual_ms,
                sample_count: 1,
            });
        }
    }

    pub fn patterns(&self) -> &[LearnedPattern] {
        &self.patterns
    }

    pub fn stats(&self) -> SchedulerStatistics {
        SchedulerStatistics {
            total_scheduled: self.total_scheduled,
            predictions_accurate: self.predictions_accurate,
            avg_prediction_error: self.avg_prediction_error,
            learned_patterns: self.patterns.len(),
        }
    }
}

impl Default for PredictiveScheduler {
    fn default() -> Self {
        Self::new(ScheduleStrategy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn register_with_sizes(sizes: &[usize]) -> Register<u64> {
        let mut register = Register::new(sizes.len()).unwrap();
        for (i, &size) in sizes.iter().enumerate() {
            register.init_qubit(i, Arc::new(|x: &mut u64| *x += 1), 0, size).unwrap();
        }
        register
    }

    #[test]
    fn test_heuristic_prediction() {
        let register = register_with_sizes(&[0, 4, 16]);
        let mut scheduler = PredictiveScheduler::default();
        let predictions = scheduler.predict(&register).to_vec();

        assert_eq!(predictions[0].predicted_time_ms, 1.0);
        assert_eq!(predictions[1].predicted_time_ms, 40.0);
        assert_eq!(predictions[2].complexity_score, 160);
        assert!(predictions.iter().all(|p| p.confidence == HEURISTIC_CONFIDENCE));
    }

    #[test]
    fn test_orders() {
        let register = register_with_sizes(&[4, 16, 1, 16]);
        let mut scheduler = PredictiveScheduler::default();
        scheduler.predict(&register);
        assert_eq!(scheduler.get_order(&register), vec![1, 3, 0, 2]);

        scheduler.set_strategy(ScheduleStrategy::ShortestFirst);
        assert_eq!(scheduler.get_order(&register), vec![2, 0, 1, 3]);

        scheduler.set_strategy(ScheduleStrategy::Random);
        assert_eq!(scheduler.get_order(&register), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_learned_pattern_average() {
        let mut scheduler = PredictiveScheduler::default();
        scheduler.record(8, 10.0);
        scheduler.record(8, 20.0);
        scheduler.record(8, 30.0);
        assert_eq!(scheduler.learned_average(8), Some(20.0));
        assert_eq!(scheduler.learned_average(9), None);
        assert_eq!(scheduler.patterns()[0].sample_count, 3);
    }

    #[test]
    fn test_pattern_table_bounded() {
        let mut scheduler = PredictiveScheduler::default();
        for size in 0..40 {
            scheduler.record(size, 1.0);
        }
        assert_eq!(scheduler.patterns().len(), MAX_PATTERNS);
    }

    #[test]
    fn test_learn_after_execution() {
        let mut register: Register<u64> = Register::new(3).unwrap();
        for i in 0..3 {
            let sleepy = Arc::new(|x: &mut u64| {
                std::thread::sleep(std::time::Duration::from_millis(1));
                *x += 1;
            });
            register.init_qubit(i, sleepy, 0, 2).unwrap();
        }
        let mut scheduler = PredictiveScheduler::new(ScheduleStrategy::Sequential);
        scheduler.predict(&register);
        register.execute_sync().unwrap();
        scheduler.learn(&register);

        let stats = scheduler.stats();
        assert_eq!(stats.total_scheduled, 3);
        assert_eq!(stats.learned_patterns, 1);
        assert_eq!(scheduler.patterns()[0].sample_count, 3);
        assert!(stats.avg_prediction_error > 0.0);

        let predictions = scheduler.predict(&register).to_vec();
        assert!(predictions.iter().all(|p| p.confidence == LEARNED_CONFIDENCE));
    }

    #[test]
    fn test_learn_from_own_predictions() {
        let mut register: Register<u64> = Register::new(3).unwrap();
        for i in 0..3 {
            let sleepy = Arc::new(|x: &mut u64| {
                std::thread::sleep(std::time::Duration::from_millis(1));
                *x += 1;
            });
            register.init_qubit(i, sleepy, 0, 0).unwrap();
        }
        let mut scheduler = PredictiveScheduler::default();
        let own = scheduler.predict(&register).to_vec();
        assert_eq!(own[0].predicted_time_ms, 1.0);

        // Another run predicts a register of the same size in between
        let other = register_with_sizes(&[1_000_000, 1_000_000, 1_000_000]);
        scheduler.predict(&other);

        register.execute_sync().unwrap();
        scheduler.learn_from(&register, &own);

        // Every error against a 1 ms prediction is below 1
        let stats = scheduler.stats();
        assert!(stats.avg_prediction_error < 1.0);
        assert_eq!(scheduler.patterns()[0].data_size, 0);
        assert_eq!(scheduler.patterns()[0].sample_count, 3);

        scheduler.learn_from(&register, &own[..2]);
        assert_eq!(scheduler.patterns()[0].sample_count, 3);
    }

    #[test]
    fn test_strategy_parse() {
        let parsed = "longest_first".parse::<ScheduleStrategy>().unwrap();
        assert_eq!(parsed, ScheduleStrategy::LongestFirst);
        assert_eq!(ScheduleStrategy::AiPredicted.to_string(), "ai-predicted");
        assert!("fastest".parse::<ScheduleStrategy>().is_err());
    }
}
