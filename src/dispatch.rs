//! Dispatch - core allocation and task dispatch collaborators
//!
//! Registers never spawn threads themselves. They ask a `CoreAllocator` for
//! cores (best effort) and hand one job per enabled qubit to a
//! `TaskDispatcher`, which must run every job it accepts exactly once before
//! returning.

use crate::error::{QuantumError, Result};
use crate::types::{DispatcherKind, EngineConfig, WorkerId};
use crossbeam::utils::Backoff;
use crossbeam_deque::{Injector, Steal, Stealer, Worker as DequeWorker};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Allocation flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreFlags {
    /// Exclusive allocations may not overcommit the machine
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreRequest {
    pub subsystem: String,
    pub core_count: u32,
    pub numa_pref: Option<u32>,
    pub flags: CoreFlags,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreResponse {
    pub success: bool,
    pub cores_allocated: u32,
}

/// Core allocation service
pub trait CoreAllocator: Send + Sync {
    fn request(&self, request: &CoreRequest) -> CoreResponse;
    fn release(&self, request: &CoreRequest, response: &CoreResponse);
}

/// In-process allocator over the cores reported by `num_cpus`.
///
/// Shared allocations always succeed (capped at the core count); exclusive
/// ones fail once the exclusively held cores would exceed the machine.
pub struct SharedCoreAllocator {
    total_cores: u32,
    exclusive_in_use: AtomicUsize,
    shared_in_use: AtomicUsize,
}

impl SharedCoreAllocator {
    pub fn new() -> Self {
        Self::with_cores(num_cpus::get() as u32)
    }

    pub fn with_cores(total_cores: u32) -> Self {
        Self {
            total_cores: total_cores.max(1),
            exclusive_in_use: AtomicUsize::new(0),
            shared_in_use: AtomicUsize::new(0),
        }
    }

    pub fn total_cores(&self) -> u32 {
        self.total_cores
    }

    /// Cores currently held (exclusive, shared)
    pub fn in_use(&self) -> (usize, usize) {
        (
            self.exclusive_in_use.load(Ordering::Relaxed),
            self.shared_in_use.load(Ordering::Relaxed),
        )
    }
}

impl Default for SharedCoreAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreAllocator for SharedCoreAllocator {
    fn request(&self, request: &CoreRequest) -> CoreResponse {
        let wanted = request.core_count.min(self.total_cores) as usize;
        if wanted == 0 {
            return CoreResponse::default();
        }

        if request.flags.exclusive {
            let total = self.total_cores as usize;
            let granted = self
                .exclusive_in_use
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                    (held + wanted <= total).then_some(held + wanted)
                })
                .is_ok();
            if !granted {
                log::debug!(
                    "{}: exclusive request for {} cores refused",
                    request.subsystem,
                    wanted
                );
                return CoreResponse::default();
            }
        } else {
            self.shared_in_use.fetch_add(wanted, Ordering::Relaxed);
        }

        CoreResponse {
            success: true,
            cores_allocated: wanted as u32,
        }
    }

    fn release(&self, request: &CoreRequest, response: &CoreResponse) {
        if !response.success {
            return;
        }
        let counter = if request.flags.exclusive {
            &self.exclusive_in_use
        } else {
            &self.shared_in_use
        };
        let cores = response.cores_allocated as usize;
        let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
            Some(held.saturating_sub(cores))
        });
    }
}

/// One qubit's worth of work, handed to a dispatcher
pub struct DispatchJob<'a> {
    pub qubit_index: usize,
    /// Declared result size, used by schedulers as a cost hint
    pub size_hint: usize,
    run: Box<dyn FnOnce(WorkerId) + Send + 'a>,
}

impl<'a> DispatchJob<'a> {
    pub fn new(
        qubit_index: usize,
        size_hint: usize,
        run: impl FnOnce(WorkerId) + Send + 'a,
    ) -> Self {
        Self {
            qubit_index,
            size_hint,
            run: Box::new(run),
        }
    }

    pub fn run(self, worker: WorkerId) {
        (self.run)(worker)
    }
}

/// Dispatcher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStatistics {
    pub dispatched_jobs: u64,
    pub rejected_jobs: u64,
    pub stolen_jobs: u64,
    pub worker_count: usize,
}

#[derive(Default)]
struct DispatchStats {
    dispatched_jobs: AtomicU64,
    rejected_jobs: AtomicU64,
    stolen_jobs: AtomicU64,
}

impl DispatchStats {
    fn snapshot(&self, worker_count: usize) -> DispatcherStatistics {
        DispatcherStatistics {
            dispatched_jobs: self.dispatched_jobs.load(Ordering::Relaxed),
            rejected_jobs: self.rejected_jobs.load(Ordering::Relaxed),
            stolen_jobs: self.stolen_jobs.load(Ordering::Relaxed),
            worker_count,
        }
    }
}

/// Task dispatch primitive
pub trait TaskDispatcher: Send + Sync {
    /// Run every accepted job exactly once before returning.
    ///
    /// Returns the qubit indices of refused jobs; those never ran.
    fn dispatch<'a>(&self, jobs: Vec<DispatchJob<'a>>) -> Vec<usize>;

    fn name(&self) -> &'static str;

    fn worker_count(&self) -> usize;

    fn stats(&self) -> DispatcherStatistics;
}

/// Runs jobs in order on the calling thread
#[derive(Default)]
pub struct SerialDispatcher {
    stats: DispatchStats,
}

impl SerialDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskDispatcher for SerialDispatcher {
    fn dispatch<'a>(&self, jobs: Vec<DispatchJob<'a>>) -> Vec<usize> {
        for job in jobs {
            self.stats.dispatched_jobs.fetch_add(1, Ordering::Relaxed);
            job.run(WorkerId(0));
        }
        Vec::new()
    }

    fn name(&self) -> &'static str {
        "serial"
    }

    fn worker_count(&self) -> usize {
        1
    }

    fn stats(&self) -> DispatcherStatistics {
        self.stats.snapshot(1)
    }
}

/// Work-stealing dispatcher over scoped threads.
///
/// Jobs go into a global injector; each worker owns a FIFO deque, drains it,
/// refills from the injector in batches and steals from its peers when both
/// are empty.
pub struct WorkStealingDispatcher {
    worker_threads: usize,
    max_queue_size: usize,
    stats: DispatchStats,
}

impl WorkStealingDispatcher {
    pub fn new(worker_threads: usize, max_queue_size: usize) -> Self {
        log::info!("Initializing work-stealing dispatcher with {} workers", worker_threads);
        Self {
            worker_threads: worker_threads.max(1),
            max_queue_size,
            stats: DispatchStats::default(),
        }
    }

    fn find_job<'a>(
        local_queue: &DequeWorker<DispatchJob<'a>>,
        injector: &Injector<DispatchJob<'a>>,
        stealers: &[Stealer<DispatchJob<'a>>],
        stats: &DispatchStats,
    ) -> Option<DispatchJob<'a>> {
        if let Some(job) = local_queue.pop() {
            return Some(job);
        }

        loop {
            match injector.steal_batch_and_pop(local_queue) {
                Steal::Success(job) => return Some(job),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        let mut rng = fastrand::Rng::new();
        let start = rng.usize(..stealers.len());

        for i in 0..stealers.len() {
            let idx = (start + i) % stealers.len();
            loop {
                match stealers[idx].steal_batch_and_pop(local_queue) {
                    Steal::Success(job) => {
                        stats.stolen_jobs.fetch_add(1, Ordering::Relaxed);
                        log::trace!("Stole qubit {} from worker {}", job.qubit_index, idx);
                        return Some(job);
                    }
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }

        None
    }
}

impl TaskDispatcher for WorkStealingDispatcher {
    fn dispatch<'a>(&self, jobs: Vec<DispatchJob<'a>>) -> Vec<usize> {
        let mut jobs = jobs;
        let mut rejected = Vec::new();

        if jobs.len() > self.max_queue_size {
            log::warn!(
                "Task queue overflow: {} jobs submitted, capacity {}",
                jobs.len(),
                self.max_queue_size
            );
            rejected = jobs.drain(self.max_queue_size..).map(|job| job.qubit_index).collect();
            self.stats.rejected_jobs.fetch_add(rejected.len() as u64, Ordering::Relaxed);
        }

        let accepted = jobs.len();
        if accepted == 0 {
            return rejected;
        }

        let injector = Injector::new();
        for job in jobs {
            injector.push(job);
        }
        self.stats.dispatched_jobs.fetch_add(accepted as u64, Ordering::Relaxed);

        let worker_count = self.worker_threads.min(accepted);
        let locals: Vec<DequeWorker<DispatchJob<'a>>> =
            (0..worker_count).map(|_| DequeWorker::new_fifo()).collect();
        let stealers: Vec<Stealer<DispatchJob<'a>>> =
            locals.iter().map(DequeWorker::stealer).collect();
        let remaining = AtomicUsize::new(accepted);

        std::thread::scope(|scope| {
            for (i, local_queue) in locals.into_iter().enumerate() {
                let injector = &injector;
                let stealers = stealers.as_slice();
                let remaining = &remaining;
                let stats = &self.stats;

                scope.spawn(move || {
                    let worker_id = WorkerId(i);
                    let backoff = Backoff::new();
                    log::trace!("Worker {} started", i);

                    while remaining.load(Ordering::Acquire) > 0 {
                        match Self::find_job(&local_queue, injector, stealers, stats) {
                            Some(job) => {
                                job.run(worker_id);
                                remaining.fetch_sub(1, Ordering::AcqRel);
                                backoff.reset();
                            }
                            None => backoff.snooze(),
                        }
                    }

                    log::trace!("Worker {} finished", i);
                });
            }
        });

        rejected
    }

    fn name(&self) -> &'static str {
        "work-stealing"
    }

    fn worker_count(&self) -> usize {
        self.worker_threads
    }

    fn stats(&self) -> DispatcherStatistics {
        self.stats.snapshot(self.worker_threads)
    }
}

/// Dispatches through a dedicated rayon pool
pub struct RayonDispatcher {
    pool: rayon::ThreadPool,
    stats: DispatchStats,
}

impl RayonDispatcher {
    pub fn new(worker_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads.max(1))
            .thread_name(|i| format!("qarma-worker-{}", i))
            .build()
            .map_err(|e| QuantumError::Allocation(format!("rayon pool: {}", e)))?;
        Ok(Self {
            pool,
            stats: DispatchStats::default(),
        })
    }
}

impl TaskDispatcher for RayonDispatcher {
    fn dispatch<'a>(&self, jobs: Vec<DispatchJob<'a>>) -> Vec<usize> {
        self.stats.dispatched_jobs.fetch_add(jobs.len() as u64, Ordering::Relaxed);
        self.pool.scope(|scope| {
            for job in jobs {
                scope.spawn(move |_| {
                    let worker = rayon::current_thread_index().unwrap_or(0);
                    job.run(WorkerId(worker));
                });
            }
        });
        Vec::new()
    }

    fn name(&self) -> &'static str {
        "rayon"
    }

    fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn stats(&self) -> DispatcherStatistics {
        self.stats.snapshot(self.pool.current_num_threads())
    }
}

/// Build the dispatcher selected by the configuration
pub fn build_dispatcher(config: &EngineConfig) -> Result<Arc<dyn TaskDispatcher>> {
    let dispatcher: Arc<dyn TaskDispatcher> = match config.dispatcher {
        DispatcherKind::Serial => Arc::new(SerialDispatcher::new()),
        DispatcherKind::WorkStealing => Arc::new(WorkStealingDispatcher::new(
            config.worker_threads,
            config.max_queue_size,
        )),
        DispatcherKind::Rayon => Arc::new(RayonDispatcher::new(config.worker_threads)?),
    };
    Ok(dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn counting_jobs<'a>(hits: &'a [AtomicUsize]) -> Vec<DispatchJob<'a>> {
        hits.iter()
            .enumerate()
            .map(|(i, hit)| {
                DispatchJob::new(i, 0, move |_| {
                    hit.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect()
    }

    #[test]
    fn test_serial_runs_in_order() {
        let order = Mutex::new(Vec::new());
        let jobs: Vec<DispatchJob<'_>> = (0..5)
            .map(|i| {
                let order = &order;
                DispatchJob::new(i, 0, move |_| order.lock().push(i))
            })
            .collect();

        let rejected = SerialDispatcher::new().dispatch(jobs);
        assert!(rejected.is_empty());
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_work_stealing_runs_each_job_once() {
        let hits: Vec<AtomicUsize> = (0..200).map(|_| AtomicUsize::new(0)).collect();
        let dispatcher = WorkStealingDispatcher::new(4, 10_000);

        let rejected = dispatcher.dispatch(counting_jobs(&hits));
        assert!(rejected.is_empty());
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
        assert_eq!(dispatcher.stats().dispatched_jobs, 200);
    }

    #[test]
    fn test_work_stealing_overflow() {
        let hits: Vec<AtomicUsize> = (0..6).map(|_| AtomicUsize::new(0)).collect();
        let dispatcher = WorkStealingDispatcher::new(2, 4);

        let rejected = dispatcher.dispatch(counting_jobs(&hits));
        assert_eq!(rejected, vec![4, 5]);
        assert_eq!(hits[3].load(Ordering::Relaxed), 1);
        assert_eq!(hits[4].load(Ordering::Relaxed), 0);
        assert_eq!(dispatcher.stats().rejected_jobs, 2);
    }

    #[test]
    fn test_rayon_runs_each_job_once() {
        let hits: Vec<AtomicUsize> = (0..64).map(|_| AtomicUsize::new(0)).collect();
        let dispatcher = RayonDispatcher::new(3).unwrap();

        let rejected = dispatcher.dispatch(counting_jobs(&hits));
        assert!(rejected.is_empty());
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_shared_allocator() {
        let allocator = SharedCoreAllocator::with_cores(4);
        let shared = CoreRequest {
            subsystem: "test".into(),
            core_count: 16,
            numa_pref: None,
            flags: CoreFlags::default(),
        };
        let response = allocator.request(&shared);
        assert!(response.success);
        assert_eq!(response.cores_allocated, 4);

        let exclusive = CoreRequest {
            core_count: 3,
            flags: CoreFlags { exclusive: true },
            ..shared.clone()
        };
        let first = allocator.request(&exclusive);
        assert!(first.success);
        assert!(!allocator.request(&exclusive).success);

        allocator.release(&exclusive, &first);
        assert_eq!(allocator.in_use().0, 0);
        allocator.release(&shared, &response);
        assert_eq!(allocator.in_use(), (0, 0));
    }
}
