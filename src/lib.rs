//! # QARMA Quantum Engine
//!
//! Speculative parallel execution: run N independent variants of a
//! computation ("qubits"), then reduce their results to one answer with a
//! selectable collapse strategy.
//!
//! ## Architecture
//!
//! - **Register**: owns the qubits, the collapse configuration and the output
//! - **Collapse Library**: thirteen pure strategies over completed results
//! - **Dispatchers**: serial, work-stealing (crossbeam-deque) and rayon
//! - **Predictive Scheduler**: estimates run times and orders qubits
//! - **AI Observer**: learns which strategy suits which workload
//! - **Adaptive Controller**: switches a running register's strategy once
//! - **Cross-Learning Bus**: lets running qubits exchange findings
//!
//! ## Example
//!
//! ```no_run
//! use qarma_quantum::{CollapseStrategy, EngineConfig, QuantumEngine};
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = QuantumEngine::new(EngineConfig::default())?;
//!
//!     let mut register = engine.register::<u64>(4)?;
//!     for i in 0..4 {
//!         register.init_qubit(i, Arc::new(|x: &mut u64| *x *= *x), i as u64 + 2, 8)?;
//!     }
//!     register.set_strategy(CollapseStrategy::FirstWins);
//!
//!     let report = engine.run(&mut register)?;
//!     println!("{} -> {}", report.strategy, register.output());
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod error;
pub mod qubit;
pub mod collapse;
pub mod dispatch;
pub mod register;
pub mod observer;
pub mod adaptive;
pub mod scheduler;
pub mod cross_learning;
pub mod demos;

pub use types::*;
pub use error::{QuantumError, Result};
pub use qubit::{Qubit, QubitFn};
pub use collapse::{CollapseConfig, CombineFn, CustomCollapseFn, EvaluateFn, MultidimCriteria};
pub use dispatch::{
    CoreAllocator, RayonDispatcher, SerialDispatcher, SharedCoreAllocator, TaskDispatcher,
    WorkStealingDispatcher,
};
pub use register::{ProgressHandle, Register, RegisterStats};
pub use observer::{AiObserver, ObserverStatistics};
pub use adaptive::{AdaptiveController, AdaptivePolicy, AdaptiveThresholds};
pub use scheduler::{PredictiveScheduler, ScheduleStrategy, SchedulerStatistics};
pub use cross_learning::{CrossLearningBus, CrossLearningConfig, CrossMessage, MessageKind};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one `QuantumEngine::run`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub strategy: CollapseStrategy,
    pub all_completed: bool,
    pub elapsed: Duration,
    pub quality: f32,
    pub stats: RegisterStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub registers_created: u64,
    pub runs: u64,
    pub collapses_succeeded: u64,
    pub collapses_failed: u64,
}

#[derive(Default)]
struct EngineCounters {
    registers_created: AtomicU64,
    runs: AtomicU64,
    collapses_succeeded: AtomicU64,
    collapses_failed: AtomicU64,
}

/// Owns the shared collaborators and runs the full control flow
pub struct QuantumEngine {
    config: EngineConfig,
    observer: Arc<AiObserver>,
    scheduler: Mutex<PredictiveScheduler>,
    bus: Arc<CrossLearningBus>,
    dispatcher: Arc<dyn TaskDispatcher>,
    allocator: Arc<dyn CoreAllocator>,
    counters: EngineCounters,
}

impl QuantumEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        log::info!("═══════════════════════════════════════");
        log::info!("  QARMA Quantum Engine");
        log::info!("═══════════════════════════════════════");
        log::info!("Worker threads: {}", config.worker_threads);
        log::info!("Dispatcher: {:?}", config.dispatcher);
        log::info!("Schedule strategy: {}", config.schedule_strategy);
        log::info!("AI observer: {}", if config.observer_enabled { "enabled" } else { "disabled" });

        let dispatcher = dispatch::build_dispatcher(&config)?;

        let observer = Arc::new(AiObserver::new());
        observer.set_enabled(config.observer_enabled);

        let bus = Arc::new(CrossLearningBus::with_config(CrossLearningConfig {
            capacity: config.bus_capacity,
            max_message_age_ms: config.max_message_age_ms,
            ..CrossLearningConfig::default()
        }));

        Ok(Self {
            scheduler: Mutex::new(PredictiveScheduler::new(config.schedule_strategy)),
            config,
            observer,
            bus,
            dispatcher,
            allocator: Arc::new(SharedCoreAllocator::new()),
            counters: EngineCounters::default(),
        })
    }

    /// New register sharing this engine's dispatcher and allocator
    pub fn register<T: QubitData>(&self, qubit_count: usize) -> Result<Register<T>> {
        let mut register = Register::with_collaborators(
            qubit_count,
            self.dispatcher.clone(),
            self.allocator.clone(),
        )?;
        register.set_sync_timeout(Duration::from_millis(self.config.sync_timeout_ms));
        self.counters.registers_created.fetch_add(1, Ordering::Relaxed);
        Ok(register)
    }

    /// Adaptive controller using the configured thresholds and this engine's observer
    pub fn adaptive_controller(
        &self,
        policy: AdaptivePolicy,
        strategy: CollapseStrategy,
    ) -> Arc<AdaptiveController> {
        Arc::new(
            AdaptiveController::with_thresholds(policy, self.config.adaptive, strategy)
                .with_observer(self.observer.clone()),
        )
    }

    /// Schedule, execute, collapse, then feed the outcome back to the
    /// observer and the scheduler.
    ///
    /// The outcome is recorded even when the collapse fails; the collapse
    /// error is returned afterwards.
    pub fn run<T: QubitData>(&self, register: &mut Register<T>) -> Result<RunReport> {
        self.counters.runs.fetch_add(1, Ordering::Relaxed);
        self.observer.observe_start(register);

        // Other runs may predict on the shared scheduler before this one learns
        let (predictions, order) = {
            let mut scheduler = self.scheduler.lock();
            let predictions = scheduler.predict(register).to_vec();
            (predictions, scheduler.get_order(register))
        };
        register.set_execution_order(order)?;

        let started = Instant::now();
        let all_completed = register.execute_sync()?;
        let collapsed = register.collapse().map(|_| ());
        let elapsed = started.elapsed();

        let quality = match collapsed {
            Ok(()) => {
                self.counters.collapses_succeeded.fetch_add(1, Ordering::Relaxed);
                let enabled = register.enabled_count().max(1) as f32;
                register.completed_count() as f32 / enabled
            }
            Err(_) => {
                self.counters.collapses_failed.fetch_add(1, Ordering::Relaxed);
                0.0
            }
        };

        if let Err(e) = self
            .observer
            .observe_complete(register, elapsed.as_millis() as u64, quality)
        {
            log::warn!("Observer could not record register {}: {}", register.id(), e);
        }
        self.scheduler.lock().learn_from(register, &predictions);
        collapsed?;

        Ok(RunReport {
            strategy: register.strategy(),
            all_completed,
            elapsed,
            quality,
            stats: register.stats(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn observer(&self) -> &Arc<AiObserver> {
        &self.observer
    }

    pub fn scheduler(&self) -> MutexGuard<'_, PredictiveScheduler> {
        self.scheduler.lock()
    }

    pub fn bus(&self) -> &Arc<CrossLearningBus> {
        &self.bus
    }

    pub fn dispatcher(&self) -> &Arc<dyn TaskDispatcher> {
        &self.dispatcher
    }

    pub fn stats(&self) -> EngineStatistics {
        EngineStatistics {
            registers_created: self.counters.registers_created.load(Ordering::Relaxed),
            runs: self.counters.runs.load(Ordering::Relaxed),
            collapses_succeeded: self.counters.collapses_succeeded.load(Ordering::Relaxed),
            collapses_failed: self.counters.collapses_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> QuantumEngine {
        QuantumEngine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_run_first_wins() {
        let engine = engine();
        let mut register = engine.register::<u64>(4).unwrap();
        for i in 0..4 {
            register
                .init_qubit(i, Arc::new(|x: &mut u64| *x *= *x), i as u64 + 2, 8)
                .unwrap();
        }

        let report = engine.run(&mut register).unwrap();
        assert!(report.all_completed);
        assert_eq!(report.quality, 1.0);
        assert_eq!(*register.output(), 4);
        assert_eq!(engine.stats().collapses_succeeded, 1);
        assert_eq!(engine.observer().stats().total_observations, 1);
    }

    #[test]
    fn test_failed_collapse_still_observed() {
        let engine = engine();
        let mut register = engine.register::<u64>(3).unwrap();
        for (i, value) in [1u64, 2, 3].into_iter().enumerate() {
            register.init_qubit(i, Arc::new(|_: &mut u64| {}), value, 8).unwrap();
        }
        register.set_strategy(CollapseStrategy::Validate);

        let err = engine.run(&mut register).unwrap_err();
        assert!(matches!(err, QuantumError::AggregationFailed(_)));
        assert_eq!(engine.stats().collapses_failed, 1);
        assert_eq!(engine.observer().stats().total_observations, 1);
        assert!(!register.is_collapsed());
    }

    #[test]
    fn test_register_uses_engine_dispatcher() {
        let config = EngineConfig {
            dispatcher: DispatcherKind::WorkStealing,
            worker_threads: 2,
            ..EngineConfig::default()
        };
        let engine = QuantumEngine::new(config).unwrap();
        assert_eq!(engine.dispatcher().worker_count(), 2);

        let mut register = engine.register::<u64>(8).unwrap();
        for i in 0..8 {
            register.init_qubit(i, Arc::new(|x: &mut u64| *x += 1), i as u64, 8).unwrap();
        }
        register.set_combine(Arc::new(|results: &[&u64], out: &mut u64| {
            *out = results.iter().map(|r| **r).sum();
        }));
        register.set_strategy(CollapseStrategy::Combine);
        engine.run(&mut register).unwrap();
        assert_eq!(*register.output(), (1..=8).sum::<u64>());
        assert_eq!(engine.stats().registers_created, 1);
    }

    #[test]
    fn test_run_learns_from_its_own_predictions() {
        let engine = Arc::new(engine());
        let mut register = engine.register::<u64>(3).unwrap();
        for i in 0..3 {
            let shared = engine.clone();
            let work = Arc::new(move |x: &mut u64| {
                // A concurrent run predicts a heavy register of the same size
                let mut heavy = Register::<u64>::new(3).unwrap();
                for j in 0..3 {
                    heavy.init_qubit(j, Arc::new(|y: &mut u64| *y += 1), 0, 1_000_000).unwrap();
                }
                shared.scheduler().predict(&heavy);
                std::thread::sleep(Duration::from_millis(1));
                *x += 1;
            });
            register.init_qubit(i, work, 0, 0).unwrap();
        }

        engine.run(&mut register).unwrap();
        // Errors against this run's 1 ms predictions are all below 1
        let stats = engine.scheduler().stats();
        assert!(stats.avg_prediction_error < 1.0);
        assert_eq!(engine.scheduler().learned_average(0).map(|avg| avg >= 1.0), Some(true));
    }

    #[test]
    fn test_bus_follows_config() {
        let config = EngineConfig {
            bus_capacity: 3,
            max_message_age_ms: 10,
            ..EngineConfig::default()
        };
        let engine = QuantumEngine::new(config).unwrap();
        let bus_config = engine.bus().config();
        assert_eq!(bus_config.capacity, 3);
        assert_eq!(bus_config.max_message_age_ms, 10);
    }
}
