//! QARMA Quantum Engine
//!
//! Core data structures shared by registers, collapse strategies, the
//! scheduler, the observer and the adaptive controller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::adaptive::AdaptiveThresholds;
use crate::scheduler::ScheduleStrategy;

/// Unique identifier for a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterId(pub Uuid);

impl RegisterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RegisterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell registers apart in logs.
        let s = self.0.to_string();
        write!(f, "{}", &s[..8])
    }
}

/// Identifier of the dispatcher worker that ran a qubit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub usize);

/// Bound shared by every qubit payload.
///
/// Equality replaces byte-wise comparison for `Validate`/`Vote`; `Default`
/// provides the initial collapse output.
pub trait QubitData: Clone + PartialEq + Default + Send + Sync + 'static {}

impl<T> QubitData for T where T: Clone + PartialEq + Default + Send + Sync + 'static {}

/// How the results of a register are reduced to one answer
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollapseStrategy {
    FirstWins = 0,
    LastWins = 1,
    Best = 2,
    Vote = 3,
    Combine = 4,
    Validate = 5,
    Custom = 6,
    Fuzzy = 7,
    Progressive = 8,
    Speculative = 9,
    Multidim = 10,
    Temporal = 11,
    Ensemble = 12,
}

impl CollapseStrategy {
    pub const COUNT: usize = 13;

    pub const ALL: [CollapseStrategy; Self::COUNT] = [
        CollapseStrategy::FirstWins,
        CollapseStrategy::LastWins,
        CollapseStrategy::Best,
        CollapseStrategy::Vote,
        CollapseStrategy::Combine,
        CollapseStrategy::Validate,
        CollapseStrategy::Custom,
        CollapseStrategy::Fuzzy,
        CollapseStrategy::Progressive,
        CollapseStrategy::Speculative,
        CollapseStrategy::Multidim,
        CollapseStrategy::Temporal,
        CollapseStrategy::Ensemble,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Next strategy in declaration order, wrapping around
    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::COUNT]
    }

    pub fn name(self) -> &'static str {
        match self {
            CollapseStrategy::FirstWins => "first-wins",
            CollapseStrategy::LastWins => "last-wins",
            CollapseStrategy::Best => "best",
            CollapseStrategy::Vote => "vote",
            CollapseStrategy::Combine => "combine",
            CollapseStrategy::Validate => "validate",
            CollapseStrategy::Custom => "custom",
            CollapseStrategy::Fuzzy => "fuzzy",
            CollapseStrategy::Progressive => "progressive",
            CollapseStrategy::Speculative => "speculative",
            CollapseStrategy::Multidim => "multidim",
            CollapseStrategy::Temporal => "temporal",
            CollapseStrategy::Ensemble => "ensemble",
        }
    }

    /// Human-readable description of what the strategy needs configured
    pub fn requirement(self) -> &'static str {
        match self {
            CollapseStrategy::FirstWins
            | CollapseStrategy::LastWins
            | CollapseStrategy::Vote
            | CollapseStrategy::Validate => "nothing",
            CollapseStrategy::Best
            | CollapseStrategy::Fuzzy
            | CollapseStrategy::Progressive
            | CollapseStrategy::Speculative => "an evaluate function",
            CollapseStrategy::Combine => "a combine function",
            CollapseStrategy::Custom => "a custom collapse function",
            CollapseStrategy::Multidim => "multi-dimensional criteria",
            CollapseStrategy::Temporal => "an evaluate function and temporal history",
            CollapseStrategy::Ensemble => "an ensemble configuration",
        }
    }
}

impl fmt::Display for CollapseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CollapseStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.name() == wanted)
            .ok_or_else(|| format!("unknown collapse strategy '{}'", s))
    }
}

/// Qubit execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QubitStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl QubitStatus {
    /// Whether moving from `self` to `next` is a legal lifecycle step
    pub fn can_transition_to(self, next: QubitStatus) -> bool {
        matches!(
            (self, next),
            (QubitStatus::Pending, QubitStatus::Running)
                | (QubitStatus::Pending, QubitStatus::Skipped)
                | (QubitStatus::Pending, QubitStatus::Failed)
                | (QubitStatus::Running, QubitStatus::Completed)
                | (QubitStatus::Running, QubitStatus::Failed)
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, QubitStatus::Completed | QubitStatus::Failed | QubitStatus::Skipped)
    }
}

/// Workload characteristics that affect strategy choice
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadProfile {
    /// Number of qubits in the register
    pub qubit_count: u32,
    /// Average time per completed qubit (ms)
    pub avg_execution_time: u32,
    /// Execution time variance (ms^2)
    pub variance: u32,
    /// Whether an evaluation function exists
    pub has_evaluation: bool,
    /// Whether all results are needed
    pub requires_all: bool,
    /// Size of the largest declared per-qubit result
    pub data_size: u32,
}

/// Which dispatcher the engine builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatcherKind {
    Serial,
    WorkStealing,
    Rayon,
}

impl FromStr for DispatcherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "serial" => Ok(DispatcherKind::Serial),
            "work-stealing" | "work_stealing" | "steal" => Ok(DispatcherKind::WorkStealing),
            "rayon" => Ok(DispatcherKind::Rayon),
            other => Err(format!("unknown dispatcher '{}'", other)),
        }
    }
}

/// Configuration for the quantum engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker threads for parallel dispatchers
    pub worker_threads: usize,
    /// Dispatcher used for new registers
    pub dispatcher: DispatcherKind,
    /// Maximum jobs accepted per dispatch (work-stealing only)
    pub max_queue_size: usize,
    /// How long `execute_sync` waits for completion (ms)
    pub sync_timeout_ms: u64,
    /// Cross-learning queue capacity
    pub bus_capacity: usize,
    /// Messages older than this are discarded on receive (ms)
    pub max_message_age_ms: u64,
    /// Ordering applied by the predictive scheduler
    pub schedule_strategy: ScheduleStrategy,
    /// Adaptive controller thresholds
    pub adaptive: AdaptiveThresholds,
    /// Record observations and recommend from learned data
    pub observer_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            dispatcher: DispatcherKind::Serial,
            max_queue_size: 10000,
            sync_timeout_ms: 30_000,
            bus_capacity: 64,
            max_message_age_ms: 5000,
            schedule_strategy: ScheduleStrategy::AiPredicted,
            adaptive: AdaptiveThresholds::default(),
            observer_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a TOML file; missing keys keep their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_round_trip_by_name() {
        for strategy in CollapseStrategy::ALL {
            assert_eq!(strategy.name().parse::<CollapseStrategy>().unwrap(), strategy);
        }
        assert_eq!("FIRST_WINS".parse::<CollapseStrategy>().unwrap(), CollapseStrategy::FirstWins);
        assert!("quantum-magic".parse::<CollapseStrategy>().is_err());
    }

    #[test]
    fn test_strategy_next_wraps() {
        assert_eq!(CollapseStrategy::FirstWins.next(), CollapseStrategy::LastWins);
        assert_eq!(CollapseStrategy::Ensemble.next(), CollapseStrategy::FirstWins);
        assert_eq!(CollapseStrategy::from_index(12), Some(CollapseStrategy::Ensemble));
        assert_eq!(CollapseStrategy::from_index(13), None);
    }

    #[test]
    fn test_status_transitions() {
        assert!(QubitStatus::Pending.can_transition_to(QubitStatus::Running));
        assert!(QubitStatus::Running.can_transition_to(QubitStatus::Completed));
        assert!(QubitStatus::Pending.can_transition_to(QubitStatus::Skipped));
        assert!(!QubitStatus::Completed.can_transition_to(QubitStatus::Running));
        assert!(!QubitStatus::Skipped.can_transition_to(QubitStatus::Running));
        assert!(!QubitStatus::Running.can_transition_to(QubitStatus::Pending));
    }

    #[test]
    fn test_config_partial_toml() {
        let config: EngineConfig =
            toml::from_str("worker_threads = 3\ndispatcher = \"work-stealing\"\n").unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.dispatcher, DispatcherKind::WorkStealing);
        assert_eq!(config.bus_capacity, 64);
    }
}
