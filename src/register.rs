//! Register - a fixed array of qubits and the collapse of their results
//!
//! A register hands one job per enabled qubit to its dispatcher, counts
//! completions with atomics so jobs may run on any thread, and collapses the
//! data of completed qubits into a single output with the active strategy.

use crate::adaptive::{AdaptiveController, AdaptivePolicy};
use crate::collapse::{
    self, CollapseConfig, CombineFn, CustomCollapseFn, EnsembleConfig, EvaluateFn, MultidimCriteria,
    TemporalHistory,
};
use crate::dispatch::{
    CoreAllocator, CoreRequest, DispatchJob, SerialDispatcher, SharedCoreAllocator, TaskDispatcher,
};
use crate::error::{try_reserve, QuantumError, Result};
use crate::qubit::{Qubit, QubitFn};
use crate::types::{CollapseStrategy, QubitData, QubitStatus, RegisterId, WorkloadProfile};
use crossbeam::utils::Backoff;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);
const SUMMARY_QUBITS: usize = 16;

/// Live collapse strategy, readable and switchable while jobs run
#[derive(Debug)]
pub struct ActiveStrategy(AtomicU8);

impl ActiveStrategy {
    pub fn new(strategy: CollapseStrategy) -> Self {
        Self(AtomicU8::new(strategy as u8))
    }

    pub fn load(&self) -> CollapseStrategy {
        CollapseStrategy::from_index(self.0.load(Ordering::Relaxed) as usize)
            .unwrap_or(CollapseStrategy::FirstWins)
    }

    pub fn store(&self, strategy: CollapseStrategy) {
        self.0.store(strategy as u8, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct ExecutionCounters {
    enabled: AtomicU32,
    completed: AtomicU32,
    failed: AtomicU32,
}

impl ExecutionCounters {
    fn is_complete(&self) -> bool {
        let done = self.completed.load(Ordering::Acquire) + self.failed.load(Ordering::Acquire);
        done >= self.enabled.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.enabled.store(0, Ordering::Release);
        self.completed.store(0, Ordering::Release);
        self.failed.store(0, Ordering::Release);
    }

    fn wait(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let backoff = Backoff::new();
        while !self.is_complete() {
            if start.elapsed() >= timeout {
                return Err(QuantumError::Timeout(timeout));
            }
            if backoff.is_completed() {
                std::thread::sleep(Duration::from_micros(100));
            } else {
                backoff.snooze();
            }
        }
        Ok(())
    }
}

/// Cloneable view of a register's progress, usable from other threads
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    counters: Arc<ExecutionCounters>,
}

impl ProgressHandle {
    pub fn is_complete(&self) -> bool {
        self.counters.is_complete()
    }

    pub fn completed(&self) -> u32 {
        self.counters.completed.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> u32 {
        self.counters.failed.load(Ordering::Acquire)
    }

    pub fn wait(&self, timeout: Duration) -> Result<()> {
        self.counters.wait(timeout)
    }
}

/// Register statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterStats {
    pub total_qubits: usize,
    pub enabled_qubits: u32,
    pub completed_qubits: u32,
    pub failed_qubits: u32,
    pub execution_time: Duration,
    pub collapse_time: Duration,
    pub avg_qubit_time: Duration,
}

pub struct Register<T: QubitData> {
    id: RegisterId,
    qubits: Vec<Qubit<T>>,
    strategy: ActiveStrategy,
    config: CollapseConfig<T>,
    output: T,
    counters: Arc<ExecutionCounters>,
    collapsed: bool,
    wait_for_all: bool,
    adaptive: Option<Arc<AdaptiveController>>,
    dispatcher: Arc<dyn TaskDispatcher>,
    allocator: Arc<dyn CoreAllocator>,
    execution_order: Option<Vec<usize>>,
    sync_timeout: Duration,
    execution_time: Duration,
    collapse_time: Duration,
}

impl<T: QubitData> Register<T> {
    /// Register running qubits serially on the calling thread
    pub fn new(qubit_count: usize) -> Result<Self> {
        Self::with_collaborators(
            qubit_count,
            Arc::new(SerialDispatcher::new()),
            Arc::new(SharedCoreAllocator::new()),
        )
    }

    pub fn with_collaborators(
        qubit_count: usize,
        dispatcher: Arc<dyn TaskDispatcher>,
        allocator: Arc<dyn CoreAllocator>,
    ) -> Result<Self> {
        if qubit_count == 0 {
            return Err(QuantumError::EmptyRegister);
        }
        if qubit_count > u32::MAX as usize {
            return Err(QuantumError::Allocation(format!("{} qubits", qubit_count)));
        }

        let mut qubits = Vec::new();
        try_reserve(&mut qubits, qubit_count, "qubit array")?;
        qubits.extend((0..qubit_count as u32).map(Qubit::new));

        let id = RegisterId::new();
        log::debug!("Register {} created with {} qubits ({})", id, qubit_count, dispatcher.name());

        Ok(Self {
            id,
            qubits,
            strategy: ActiveStrategy::new(CollapseStrategy::FirstWins),
            config: CollapseConfig::new(),
            output: T::default(),
            counters: Arc::new(ExecutionCounters::default()),
            collapsed: false,
            wait_for_all: true,
            adaptive: None,
            dispatcher,
            allocator,
            execution_order: None,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            execution_time: Duration::ZERO,
            collapse_time: Duration::ZERO,
        })
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.qubits.len() {
            Ok(())
        } else {
            Err(QuantumError::IndexOutOfRange {
                index,
                count: self.qubits.len(),
            })
        }
    }

    /// Install a qubit's function and data and enable it
    pub fn init_qubit(
        &mut self,
        index: usize,
        function: QubitFn<T>,
        data: T,
        result_size: usize,
    ) -> Result<()> {
        self.check_index(index)?;
        self.qubits[index].install(function, data, result_size)
    }

    /// Disabled qubits are marked Skipped and never run
    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        self.check_index(index)?;
        let qubit = &mut self.qubits[index];
        if enabled && qubit.function.is_none() {
            return Err(QuantumError::NoFunction { index });
        }
        qubit.enabled = enabled;
        qubit.status = if enabled {
            QubitStatus::Pending
        } else {
            QubitStatus::Skipped
        };
        Ok(())
    }

    pub fn set_id(&mut self, index: usize, id: u32) -> Result<()> {
        self.check_index(index)?;
        self.qubits[index].id = id;
        Ok(())
    }

    pub fn set_strategy(&mut self, strategy: CollapseStrategy) {
        self.strategy.store(strategy);
        if let Some(adaptive) = &self.adaptive {
            adaptive.set_original_strategy(strategy);
        }
    }

    pub fn set_evaluate(&mut self, evaluate: EvaluateFn<T>) {
        self.config.evaluate = Some(evaluate);
    }

    pub fn set_combine(&mut self, combine: CombineFn<T>) {
        self.config.combine = Some(combine);
    }

    /// Install a custom collapse and select it
    pub fn set_custom_collapse(&mut self, custom: CustomCollapseFn<T>) {
        self.config.custom = Some(custom);
        self.set_strategy(CollapseStrategy::Custom);
    }

    pub fn set_multidim(
        &mut self,
        quality: Option<EvaluateFn<T>>,
        speed: Option<EvaluateFn<T>>,
        resource: Option<EvaluateFn<T>>,
        weights: [i64; 3],
    ) {
        self.config.multidim = Some(MultidimCriteria {
            quality,
            speed,
            resource,
            weights,
        });
    }

    pub fn set_temporal(&mut self, window_size: usize, trend_weight: i64) {
        self.config.temporal = Some(TemporalHistory::new(window_size, trend_weight));
    }

    pub fn set_ensemble(&mut self, members: &[(CollapseStrategy, i64)]) -> Result<()> {
        self.config.ensemble = Some(EnsembleConfig::new(members)?);
        Ok(())
    }

    pub fn set_wait_all(&mut self, wait_for_all: bool) {
        self.wait_for_all = wait_for_all;
    }

    pub fn set_sync_timeout(&mut self, timeout: Duration) {
        self.sync_timeout = timeout;
    }

    /// Attach an adaptive controller; the current strategy becomes its original
    pub fn set_adaptive(&mut self, controller: Arc<AdaptiveController>) {
        controller.set_original_strategy(self.strategy.load());
        self.adaptive = Some(controller);
    }

    pub fn enable_adaptive(&mut self, policy: AdaptivePolicy) -> Arc<AdaptiveController> {
        let controller = Arc::new(AdaptiveController::new(policy, self.strategy.load()));
        self.set_adaptive(controller.clone());
        controller
    }

    pub fn adaptive(&self) -> Option<&Arc<AdaptiveController>> {
        self.adaptive.as_ref()
    }

    /// Dispatch order; must be a permutation of the qubit indices
    pub fn set_execution_order(&mut self, order: Vec<usize>) -> Result<()> {
        let mut seen = vec![false; self.qubits.len()];
        if order.len() != self.qubits.len() {
            return Err(QuantumError::InvalidOrder);
        }
        for &index in &order {
            if index >= seen.len() || seen[index] {
                return Err(QuantumError::InvalidOrder);
            }
            seen[index] = true;
        }
        self.execution_order = Some(order);
        Ok(())
    }

    pub fn clear_execution_order(&mut self) {
        self.execution_order = None;
    }

    /// Dispatch every enabled qubit; returns how many were dispatched
    pub fn execute(&mut self) -> Result<usize> {
        let strategy = self.strategy.load();
        self.config.check(strategy)?;

        let enabled = self.qubits.iter().filter(|q| q.enabled).count();
        if enabled == 0 {
            return Err(QuantumError::NothingDispatched);
        }

        let ran_before = self
            .qubits
            .iter()
            .any(|q| q.status != QubitStatus::Pending && q.status != QubitStatus::Skipped);
        if ran_before {
            log::debug!("Register {}: re-executing, clearing previous run", self.id);
            for qubit in &mut self.qubits {
                qubit.reset();
            }
        }
        self.counters.clear();
        self.counters.enabled.store(enabled as u32, Ordering::Release);
        self.collapsed = false;

        let request = CoreRequest {
            subsystem: format!("quantum-register-{}", self.id),
            core_count: enabled as u32,
            numa_pref: None,
            flags: Default::default(),
        };
        let cores = self.allocator.request(&request);
        if !cores.success {
            log::warn!("Register {}: core allocation refused, dispatching anyway", self.id);
        }

        if let Some(adaptive) = &self.adaptive {
            adaptive.begin(strategy, enabled as u32, self.profile(), self.config.support_mask());
        }

        log::info!(
            "Register {}: dispatching {} of {} qubits ({}, strategy {})",
            self.id,
            enabled,
            self.qubits.len(),
            self.dispatcher.name(),
            strategy
        );

        let order: Vec<usize> = match &self.execution_order {
            Some(order) => order.clone(),
            None => (0..self.qubits.len()).collect(),
        };

        let started = Instant::now();
        let rejected = {
            let counters = &*self.counters;
            let live = &self.strategy;
            let adaptive = self.adaptive.as_deref();

            let mut slots: Vec<Option<&mut Qubit<T>>> = self.qubits.iter_mut().map(Some).collect();
            let mut jobs = Vec::with_capacity(enabled);
            for index in order {
                let Some(qubit) = slots[index].take() else {
                    continue;
                };
                if !qubit.enabled {
                    if qubit.status == QubitStatus::Pending {
                        qubit.transition(QubitStatus::Skipped);
                    }
                    continue;
                }

                let size_hint = qubit.result_size();
                jobs.push(DispatchJob::new(index, size_hint, move |worker| {
                    log::debug!("Qubit {} running on worker {}", qubit.id, worker.0);
                    qubit.run(worker);
                    if qubit.status == QubitStatus::Completed {
                        counters.completed.fetch_add(1, Ordering::AcqRel);
                    }
                    if let Some(adaptive) = adaptive {
                        adaptive.poll(
                            counters.completed.load(Ordering::Acquire),
                            counters.failed.load(Ordering::Acquire),
                            live,
                        );
                    }
                }));
            }

            self.dispatcher.dispatch(jobs)
        };

        for &index in &rejected {
            if self.qubits[index].transition(QubitStatus::Failed) {
                self.counters.failed.fetch_add(1, Ordering::AcqRel);
            }
        }
        if !rejected.is_empty() {
            log::warn!("Register {}: {} qubits refused by the dispatcher", self.id, rejected.len());
            if let Some(adaptive) = &self.adaptive {
                adaptive.poll_now(
                    self.counters.completed.load(Ordering::Acquire),
                    self.counters.failed.load(Ordering::Acquire),
                    &self.strategy,
                );
            }
        }

        self.execution_time = started.elapsed();
        if let Some(adaptive) = &self.adaptive {
            adaptive.finish();
        }
        self.allocator.release(&request, &cores);

        Ok(enabled - rejected.len())
    }

    /// Execute and wait; true when every enabled qubit completed
    pub fn execute_sync(&mut self) -> Result<bool> {
        self.execute()?;
        self.wait(self.sync_timeout)?;
        let completed = self.counters.completed.load(Ordering::Acquire);
        Ok(self.counters.failed.load(Ordering::Acquire) == 0
            && completed == self.counters.enabled.load(Ordering::Acquire))
    }

    pub fn is_complete(&self) -> bool {
        self.counters.is_complete()
    }

    pub fn wait(&self, timeout: Duration) -> Result<()> {
        self.counters.wait(timeout)
    }

    pub fn progress(&self) -> ProgressHandle {
        ProgressHandle {
            counters: self.counters.clone(),
        }
    }

    /// Collapse completed results into the output; idempotent once it succeeds
    pub fn collapse(&mut self) -> Result<&T> {
        if self.collapsed {
            return Ok(&self.output);
        }
        if !self.is_complete() {
            log::warn!("Register {}: collapsing before all qubits finished", self.id);
        }

        let strategy = self.strategy.load();
        let started = Instant::now();
        let mut output = self.output.clone();
        {
            let results: Vec<&T> = self
                .qubits
                .iter()
                .filter(|q| q.status == QubitStatus::Completed)
                .map(|q| &q.data)
                .collect();
            if results.is_empty() {
                return Err(QuantumError::NoResults);
            }
            collapse::collapse(strategy, &results, &mut self.config, &mut output)?;
            log::info!(
                "Register {}: collapsed {} results with {}",
                self.id,
                results.len(),
                strategy
            );
        }

        self.output = output;
        self.collapsed = true;
        self.collapse_time = started.elapsed();
        Ok(&self.output)
    }

    /// Clear runtime state; functions, data and enabled flags are kept
    pub fn reset(&mut self) {
        self.counters.clear();
        for qubit in &mut self.qubits {
            qubit.reset();
        }
        self.collapsed = false;
        self.execution_time = Duration::ZERO;
        self.collapse_time = Duration::ZERO;
        if let Some(adaptive) = &self.adaptive {
            let original = adaptive.reset();
            self.strategy.store(original);
        }
    }

    pub fn id(&self) -> RegisterId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.qubits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.qubits.is_empty()
    }

    pub fn strategy(&self) -> CollapseStrategy {
        self.strategy.load()
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn wait_for_all(&self) -> bool {
        self.wait_for_all
    }

    /// Collapse output; `T::default()` until the first successful collapse
    pub fn output(&self) -> &T {
        &self.output
    }

    pub fn collapse_config(&self) -> &CollapseConfig<T> {
        &self.config
    }

    pub fn qubits(&self) -> &[Qubit<T>] {
        &self.qubits
    }

    pub fn qubit(&self, index: usize) -> Option<&Qubit<T>> {
        self.qubits.get(index)
    }

    pub fn data(&self, index: usize) -> Option<&T> {
        self.qubits.get(index).map(|q| &q.data)
    }

    pub fn data_mut(&mut self, index: usize) -> Option<&mut T> {
        self.qubits.get_mut(index).map(|q| &mut q.data)
    }

    /// Result buffer of a completed qubit
    pub fn qubit_result(&self, index: usize) -> Option<&[u8]> {
        let qubit = self.qubits.get(index)?;
        if qubit.status != QubitStatus::Completed {
            return None;
        }
        qubit.result.as_deref()
    }

    pub fn completed_count(&self) -> u32 {
        self.counters.completed.load(Ordering::Acquire)
    }

    pub fn failed_count(&self) -> u32 {
        self.counters.failed.load(Ordering::Acquire)
    }

    pub fn enabled_count(&self) -> usize {
        self.qubits.iter().filter(|q| q.enabled).count()
    }

    pub fn stats(&self) -> RegisterStats {
        let completed = self.completed_count();
        let total_qubit_time: Duration = self
            .qubits
            .iter()
            .filter(|q| q.status == QubitStatus::Completed)
            .filter_map(Qubit::elapsed)
            .sum();
        RegisterStats {
            total_qubits: self.qubits.len(),
            enabled_qubits: self.enabled_count() as u32,
            completed_qubits: completed,
            failed_qubits: self.failed_count(),
            execution_time: self.execution_time,
            collapse_time: self.collapse_time,
            avg_qubit_time: if completed > 0 {
                total_qubit_time / completed
            } else {
                Duration::ZERO
            },
        }
    }

    /// Workload profile derived from configuration and the last run's timings
    pub fn profile(&self) -> WorkloadProfile {
        let times: Vec<u64> = self
            .qubits
            .iter()
            .filter(|q| q.status == QubitStatus::Completed)
            .filter_map(Qubit::elapsed)
            .map(|d| d.as_millis() as u64)
            .collect();

        let (avg, variance) = if times.is_empty() {
            (0, 0)
        } else {
            let n = times.len() as u64;
            let avg = times.iter().sum::<u64>() / n;
            let variance =
                times.iter().map(|&t| (t as i64 - avg as i64).pow(2) as u64).sum::<u64>() / n;
            (avg, variance)
        };

        WorkloadProfile {
            qubit_count: self.qubits.len() as u32,
            avg_execution_time: avg.min(u32::MAX as u64) as u32,
            variance: variance.min(u32::MAX as u64) as u32,
            has_evaluation: self.config.has_evaluate(),
            requires_all: self.wait_for_all,
            data_size: self.qubits.iter().map(Qubit::result_size).max().unwrap_or(0) as u32,
        }
    }

    /// Debug dump of the first qubits' states
    pub fn log_summary(&self) {
        let stats = self.stats();
        log::debug!(
            "Register {}: {} qubits, {} enabled, {} completed, {} failed, \
             strategy {}, collapsed {}",
            self.id,
            stats.total_qubits,
            stats.enabled_qubits,
            stats.completed_qubits,
            stats.failed_qubits,
            self.strategy(),
            self.collapsed
        );
        for (i, qubit) in self.qubits.iter().take(SUMMARY_QUBITS).enumerate() {
            log::debug!("  [{}] id={} {:?} {:?}", i, qubit.id, qubit.status, qubit.elapsed());
        }
        if self.qubits.len() > SUMMARY_QUBITS {
            log::debug!("  ... {} more", self.qubits.len() - SUMMARY_QUBITS);
        }
    }
}

impl<T: QubitData> fmt::Debug for Register<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Register")
            .field("id", &self.id)
            .field("qubits", &self.qubits.len())
            .field("strategy", &self.strategy.load())
            .field("collapsed", &self.collapsed)
            .field("dispatcher", &self.dispatcher.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::AdaptiveThresholds;
    use crate::dispatch::{CoreResponse, WorkStealingDispatcher};
    use crate::types::WorkerId;

    fn add(n: u64) -> QubitFn<u64> {
        Arc::new(move |x: &mut u64| *x += n)
    }

    fn three_sums() -> Register<u64> {
        let mut register = Register::new(3).unwrap();
        for i in 0..3 {
            register.init_qubit(i, add(10), 20, 0).unwrap();
        }
        register
    }

    #[test]
    fn test_empty_register() {
        assert!(matches!(Register::<u64>::new(0), Err(QuantumError::EmptyRegister)));
        let register: Register<u64> = Register::new(2).unwrap();
        assert!(format!("{:?}", register).contains("qubits: 2"));
    }

    #[test]
    fn test_init_out_of_range() {
        let mut register: Register<u64> = Register::new(2).unwrap();
        let err = register.init_qubit(2, add(1), 0, 0).unwrap_err();
        assert_eq!(err, QuantumError::IndexOutOfRange { index: 2, count: 2 });
    }

    #[test]
    fn test_execute_and_validate() {
        let mut register = three_sums();
        register.set_strategy(CollapseStrategy::Validate);
        assert!(register.execute_sync().unwrap());
        assert_eq!(*register.collapse().unwrap(), 30);
        assert_eq!(register.stats().completed_qubits, 3);
    }

    #[test]
    fn test_collapse_is_idempotent() {
        let mut register = three_sums();
        register.execute_sync().unwrap();
        let first = *register.collapse().unwrap();
        *register.data_mut(0).unwrap() = 999;
        assert_eq!(*register.collapse().unwrap(), first);
    }

    #[test]
    fn test_missing_callback_fails_without_mutation() {
        let mut register = three_sums();
        register.set_strategy(CollapseStrategy::Best);
        let err = register.execute().unwrap_err();
        assert!(matches!(err, QuantumError::MissingCallback { .. }));
        assert!(register.qubits().iter().all(|q| q.status() == QubitStatus::Pending));
        assert_eq!(*register.data(0).unwrap(), 20);
    }

    #[test]
    fn test_disabled_qubits_skipped() {
        let mut register = three_sums();
        register.set_enabled(1, false).unwrap();
        register.set_strategy(CollapseStrategy::Combine);
        register.set_combine(Arc::new(|results: &[&u64], out: &mut u64| {
            *out = results.len() as u64
        }));

        assert_eq!(register.execute().unwrap(), 2);
        assert_eq!(register.qubit(1).unwrap().status(), QubitStatus::Skipped);
        assert_eq!(*register.data(1).unwrap(), 20);
        assert_eq!(*register.collapse().unwrap(), 2);
    }

    #[test]
    fn test_nothing_dispatched() {
        let mut register: Register<u64> = Register::new(2).unwrap();
        assert_eq!(register.execute().unwrap_err(), QuantumError::NothingDispatched);
    }

    #[test]
    fn test_no_results() {
        let mut register: Register<u64> = Register::new(2).unwrap();
        assert_eq!(register.collapse().unwrap_err(), QuantumError::NoResults);
        assert!(!register.is_collapsed());
    }

    #[test]
    fn test_failed_validate_leaves_output() {
        let mut register = three_sums();
        register.init_qubit(2, add(11), 20, 0).unwrap();
        register.set_strategy(CollapseStrategy::Validate);
        register.execute_sync().unwrap();
        assert!(matches!(register.collapse().unwrap_err(), QuantumError::AggregationFailed(_)));
        assert!(!register.is_collapsed());
        assert_eq!(*register.output(), 0);
    }

    #[test]
    fn test_execution_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut register: Register<u64> = Register::new(4).unwrap();
        for i in 0..4 {
            let order = order.clone();
            register
                .init_qubit(i, Arc::new(move |x: &mut u64| order.lock().push(*x)), i as u64, 0)
                .unwrap();
        }
        let duplicate = register.set_execution_order(vec![0, 1, 1, 2]).unwrap_err();
        assert_eq!(duplicate, QuantumError::InvalidOrder);
        let short = register.set_execution_order(vec![0, 1]).unwrap_err();
        assert_eq!(short, QuantumError::InvalidOrder);

        register.set_execution_order(vec![3, 1, 0, 2]).unwrap();
        register.execute().unwrap();
        assert_eq!(*order.lock(), vec![3, 1, 0, 2]);
    }

    #[test]
    fn test_reset_and_reexecute() {
        let mut register = three_sums();
        register.execute_sync().unwrap();
        register.collapse().unwrap();
        register.reset();
        assert!(!register.is_collapsed());
        assert_eq!(register.completed_count(), 0);
        assert!(register.qubits().iter().all(|q| q.status() == QubitStatus::Pending));

        register.execute_sync().unwrap();
        assert_eq!(*register.data(0).unwrap(), 40);
    }

    #[test]
    fn test_work_stealing_register() {
        let dispatcher = Arc::new(WorkStealingDispatcher::new(4, 1000));
        let allocator = Arc::new(SharedCoreAllocator::new());
        let mut register: Register<u64> =
            Register::with_collaborators(32, dispatcher, allocator).unwrap();
        for i in 0..32 {
            register.init_qubit(i, add(i as u64), 0, 0).unwrap();
        }
        register.set_strategy(CollapseStrategy::Combine);
        register.set_combine(Arc::new(|results: &[&u64], out: &mut u64| {
            *out = results.iter().map(|r| **r).sum();
        }));
        assert!(register.execute_sync().unwrap());
        assert_eq!(*register.collapse().unwrap(), (0..32).sum::<u64>());
    }

    struct RefusingDispatcher;

    impl TaskDispatcher for RefusingDispatcher {
        fn dispatch<'a>(&self, jobs: Vec<DispatchJob<'a>>) -> Vec<usize> {
            let mut rejected = Vec::new();
            for job in jobs {
                if job.qubit_index % 2 == 0 {
                    job.run(WorkerId(0));
                } else {
                    rejected.push(job.qubit_index);
                }
            }
            rejected
        }

        fn name(&self) -> &'static str {
            "refusing"
        }

        fn worker_count(&self) -> usize {
            1
        }

        fn stats(&self) -> crate::dispatch::DispatcherStatistics {
            Default::default()
        }
    }

    struct DenyAllocator;

    impl CoreAllocator for DenyAllocator {
        fn request(&self, _request: &CoreRequest) -> CoreResponse {
            CoreResponse::default()
        }

        fn release(&self, _request: &CoreRequest, _response: &CoreResponse) {}
    }

    #[test]
    fn test_refused_jobs_fail() {
        let mut register: Register<u64> = Register::with_collaborators(
            4,
            Arc::new(RefusingDispatcher),
            Arc::new(DenyAllocator),
        )
        .unwrap();
        for i in 0..4 {
            register.init_qubit(i, add(1), 0, 0).unwrap();
        }
        assert_eq!(register.execute().unwrap(), 2);
        assert!(!register.execute_sync().unwrap());
        assert_eq!(register.failed_count(), 2);
        assert_eq!(register.qubit(1).unwrap().status(), QubitStatus::Failed);
        assert!(register.is_complete());
    }

    #[test]
    fn test_profile_and_result_buffer() {
        let mut register: Register<u64> = Register::new(2).unwrap();
        register.init_qubit(0, add(1), 0, 16).unwrap();
        register.init_qubit(1, add(1), 0, 4).unwrap();
        register.set_evaluate(Arc::new(|x: &u64| *x as i64));
        assert!(register.qubit_result(0).is_none());

        register.execute_sync().unwrap();
        assert_eq!(register.qubit_result(0).unwrap(), &[0u8; 16][..]);

        let profile = register.profile();
        assert_eq!(profile.qubit_count, 2);
        assert_eq!(profile.data_size, 16);
        assert!(profile.has_evaluation);
        assert!(profile.requires_all);
    }

    #[test]
    fn test_progress_handle() {
        let mut register = three_sums();
        let progress = register.progress();
        register.execute().unwrap();
        assert!(progress.is_complete());
        assert_eq!(progress.completed(), 3);
        progress.wait(Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let counters = ExecutionCounters::default();
        counters.enabled.store(1, Ordering::Release);
        let err = counters.wait(Duration::from_millis(5)).unwrap_err();
        assert_eq!(err, QuantumError::Timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_refusals_reach_failure_policy() {
        let mut register: Register<u64> = Register::with_collaborators(
            4,
            Arc::new(WorkStealingDispatcher::new(1, 1)),
            Arc::new(SharedCoreAllocator::new()),
        )
        .unwrap();
        for i in 0..4 {
            register.init_qubit(i, add(1), 0, 0).unwrap();
        }
        let controller = Arc::new(AdaptiveController::with_thresholds(
            AdaptivePolicy::FailureRate,
            AdaptiveThresholds::default(),
            CollapseStrategy::FirstWins,
        ));
        register.set_adaptive(controller.clone());

        assert_eq!(register.execute().unwrap(), 1);
        assert_eq!(register.failed_count(), 3);
        assert_eq!(controller.switch_count(), 1);
        assert_eq!(register.strategy(), CollapseStrategy::LastWins);
    }

    #[test]
    fn test_enable_without_function() {
        let mut register: Register<u64> = Register::new(2).unwrap();
        let err = register.set_enabled(1, true).unwrap_err();
        assert_eq!(err, QuantumError::NoFunction { index: 1 });
        assert!(!register.qubit(1).unwrap().is_enabled());
    }
}
