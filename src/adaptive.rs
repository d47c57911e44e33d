//! Adaptive Controller - switches a running register's strategy
//!
//! The controller is polled from qubit jobs while an execution is in
//! flight. When its policy fires it picks another strategy (asking the AI
//! observer first) and stores it in the register's live strategy slot. At
//! most one switch happens per execution.

use crate::observer::AiObserver;
use crate::register::ActiveStrategy;
use crate::types::{CollapseStrategy, WorkloadProfile};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// When the controller considers switching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdaptivePolicy {
    None,
    Timeout,
    FailureRate,
    Quality,
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveThresholds {
    pub timeout_ms: u64,
    pub failure_threshold: f32,
    pub quality_threshold: f32,
    pub check_interval_ms: u64,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            failure_threshold: 0.3,
            quality_threshold: 0.5,
            check_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveState {
    pub policy: AdaptivePolicy,
    pub thresholds: AdaptiveThresholds,
    pub original_strategy: CollapseStrategy,
    pub current_strategy: CollapseStrategy,
    pub has_switched: bool,
    pub switch_count: u32,
    pub execution_start: Option<Instant>,
    pub last_check: Option<Instant>,
    pub completed_at_last_check: u32,
    pub failed_at_last_check: u32,
    pub current_quality: f32,
    executing: bool,
    enabled_qubits: u32,
    profile: WorkloadProfile,
    supported: [bool; CollapseStrategy::COUNT],
}

impl AdaptiveState {
    fn new(
        policy: AdaptivePolicy,
        thresholds: AdaptiveThresholds,
        strategy: CollapseStrategy,
    ) -> Self {
        Self {
            policy,
            thresholds,
            original_strategy: strategy,
            current_strategy: strategy,
            has_switched: false,
            switch_count: 0,
            execution_start: None,
            last_check: None,
            completed_at_last_check: 0,
            failed_at_last_check: 0,
            current_quality: 1.0,
            executing: false,
            enabled_qubits: 0,
            profile: WorkloadProfile::default(),
            supported: [true; CollapseStrategy::COUNT],
        }
    }

    fn should_switch(&self, elapsed: Duration, completed: u32, failed: u32) -> bool {
        let completion_rate = if self.enabled_qubits > 0 {
            completed as f32 / self.enabled_qubits as f32
        } else {
            0.0
        };
        let failure_rate = if completed + failed > 0 {
            failed as f32 / (completed + failed) as f32
        } else {
            0.0
        };
        let elapsed_ms = elapsed.as_millis() as u64;
        let t = &self.thresholds;

        match self.policy {
            AdaptivePolicy::None => false,
            AdaptivePolicy::Timeout => elapsed_ms > t.timeout_ms && completion_rate < 0.5,
            AdaptivePolicy::FailureRate => failure_rate > t.failure_threshold,
            AdaptivePolicy::Quality => self.current_quality < t.quality_threshold,
            AdaptivePolicy::Aggressive => {
                (elapsed_ms > t.timeout_ms / 2 && completion_rate < 0.5)
                    || failure_rate > t.failure_threshold / 2.0
            }
        }
    }

    /// Next satisfiable strategy after the current one, in declaration order
    fn round_robin(&self) -> Option<CollapseStrategy> {
        let mut candidate = self.current_strategy.next();
        while candidate != self.current_strategy {
            if self.supported[candidate.index()] {
                return Some(candidate);
            }
            candidate = candidate.next();
        }
        None
    }
}

pub struct AdaptiveController {
    state: Mutex<AdaptiveState>,
    observer: Option<Arc<AiObserver>>,
}

impl AdaptiveController {
    pub fn new(policy: AdaptivePolicy, strategy: CollapseStrategy) -> Self {
        Self::with_thresholds(policy, AdaptiveThresholds::default(), strategy)
    }

    pub fn with_thresholds(
        policy: AdaptivePolicy,
        thresholds: AdaptiveThresholds,
        strategy: CollapseStrategy,
    ) -> Self {
        log::debug!("Adaptive controller: policy {:?}, strategy {}", policy, strategy);
        Self {
            state: Mutex::new(AdaptiveState::new(policy, thresholds, strategy)),
            observer: None,
        }
    }

    /// Consult `observer` before falling back to round-robin
    pub fn with_observer(mut self, observer: Arc<AiObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn set_thresholds(&self, thresholds: AdaptiveThresholds) {
        self.state.lock().thresholds = thresholds;
    }

    pub fn set_policy(&self, policy: AdaptivePolicy) {
        self.state.lock().policy = policy;
    }

    /// Strategy restored by `reset`
    pub fn set_original_strategy(&self, strategy: CollapseStrategy) {
        let mut state = self.state.lock();
        state.original_strategy = strategy;
        state.current_strategy = strategy;
    }

    /// Start monitoring an execution
    pub(crate) fn begin(
        &self,
        strategy: CollapseStrategy,
        enabled_qubits: u32,
        profile: WorkloadProfile,
        supported: [bool; CollapseStrategy::COUNT],
    ) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.current_strategy = strategy;
        state.has_switched = false;
        state.execution_start = Some(now);
        state.last_check = Some(now);
        state.completed_at_last_check = 0;
        state.failed_at_last_check = 0;
        state.executing = true;
        state.enabled_qubits = enabled_qubits;
        state.profile = profile;
        state.supported = supported;
    }

    pub(crate) fn finish(&self) {
        self.state.lock().executing = false;
    }

    /// Check the running execution; returns true when the strategy was switched
    pub fn poll(&self, completed: u32, failed: u32, live: &ActiveStrategy) -> bool {
        self.check(completed, failed, live, false)
    }

    /// Poll regardless of the check interval; used once the dispatcher has
    /// reported the jobs it refused
    pub(crate) fn poll_now(&self, completed: u32, failed: u32, live: &ActiveStrategy) -> bool {
        self.check(completed, failed, live, true)
    }

    fn check(&self, completed: u32, failed: u32, live: &ActiveStrategy, force: bool) -> bool {
        let mut state = self.state.lock();
        if !state.executing || state.policy == AdaptivePolicy::None {
            return false;
        }

        let now = Instant::now();
        let interval = Duration::from_millis(state.thresholds.check_interval_ms);
        if let Some(last) = state.last_check {
            if !force && now.duration_since(last) < interval {
                return false;
            }
        }
        state.last_check = Some(now);

        let elapsed = state
            .execution_start
            .map_or(Duration::ZERO, |start| now.duration_since(start));
        let fire = state.should_switch(elapsed, completed, failed);
        state.completed_at_last_check = completed;
        state.failed_at_last_check = failed;

        if !fire || state.has_switched {
            return false;
        }
        state.has_switched = true;

        let recommended = self
            .observer
            .as_ref()
            .map(|observer| observer.recommend_strategy(&state.profile));
        let next = match recommended {
            Some(strategy)
                if strategy != state.current_strategy && state.supported[strategy.index()] =>
            {
                Some(strategy)
            }
            _ => state.round_robin(),
        };

        match next {
            Some(strategy) => {
                log::info!(
                    "Adaptive switch ({:?}): {} -> {} after {:?}",
                    state.policy,
                    state.current_strategy,
                    strategy,
                    elapsed
                );
                live.store(strategy);
                state.current_strategy = strategy;
                state.switch_count += 1;
                true
            }
            None => {
                log::warn!("Adaptive policy fired but no alternative strategy is configured");
                false
            }
        }
    }

    /// Record the quality of the work observed so far (clamped to 0..=1)
    pub fn report_quality(&self, quality: f32) {
        self.state.lock().current_quality = quality.clamp(0.0, 1.0);
    }

    /// Clear runtime state and return the strategy to restore
    pub fn reset(&self) -> CollapseStrategy {
        let mut state = self.state.lock();
        let (policy, thresholds, original) =
            (state.policy, state.thresholds, state.original_strategy);
        *state = AdaptiveState::new(policy, thresholds, original);
        original
    }

    pub fn state(&self) -> AdaptiveState {
        self.state.lock().clone()
    }

    pub fn switch_count(&self) -> u32 {
        self.state.lock().switch_count
    }
}
