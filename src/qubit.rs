//! Qubit - a single unit of speculative work
//!
//! A qubit pairs a caller function with the data it mutates. Registers own
//! qubits; the dispatcher only ever sees them through a job closure.

use crate::error::{try_reserve, Result};
use crate::types::{QubitStatus, WorkerId};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Work function run by a qubit
pub type QubitFn<T> = Arc<dyn Fn(&mut T) + Send + Sync>;

pub struct Qubit<T> {
    pub(crate) id: u32,
    pub(crate) enabled: bool,
    pub(crate) status: QubitStatus,
    pub(crate) function: Option<QubitFn<T>>,
    pub(crate) data: T,
    pub(crate) result: Option<Vec<u8>>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) finished_at: Option<Instant>,
    pub(crate) assigned_core: Option<WorkerId>,
}

impl<T: Default> Qubit<T> {
    pub(crate) fn new(id: u32) -> Self {
        Self {
            id,
            enabled: false,
            status: QubitStatus::Pending,
            function: None,
            data: T::default(),
            result: None,
            started_at: None,
            finished_at: None,
            assigned_core: None,
        }
    }
}

impl<T> Qubit<T> {
    /// Install function, data and an optional zeroed result buffer.
    ///
    /// The buffer is reserved before anything is written, so a failed
    /// allocation leaves the qubit untouched.
    pub(crate) fn install(
        &mut self,
        function: QubitFn<T>,
        data: T,
        result_size: usize,
    ) -> Result<()> {
        let result = if result_size > 0 {
            let mut buffer = Vec::new();
            try_reserve(&mut buffer, result_size, "qubit result buffer")?;
            buffer.resize(result_size, 0u8);
            Some(buffer)
        } else {
            None
        };

        self.function = Some(function);
        self.data = data;
        self.result = result;
        self.enabled = true;
        self.status = QubitStatus::Pending;
        self.started_at = None;
        self.finished_at = None;
        self.assigned_core = None;
        Ok(())
    }

    /// Move to `next` if the lifecycle allows it
    pub(crate) fn transition(&mut self, next: QubitStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            log::warn!("Qubit {}: refused transition {:?} -> {:?}", self.id, self.status, next);
            false
        }
    }

    /// Run the installed function on the calling thread
    pub(crate) fn run(&mut self, worker: WorkerId) {
        if !self.transition(QubitStatus::Running) {
            return;
        }
        self.assigned_core = Some(worker);
        self.started_at = Some(Instant::now());

        if let Some(function) = self.function.clone() {
            function(&mut self.data);
        }

        self.finished_at = Some(Instant::now());
        self.transition(QubitStatus::Completed);
    }

    pub(crate) fn reset(&mut self) {
        self.status = if self.enabled {
            QubitStatus::Pending
        } else {
            QubitStatus::Skipped
        };
        self.started_at = None;
        self.finished_at = None;
        self.assigned_core = None;
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn status(&self) -> QubitStatus {
        self.status
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    /// Declared size of the result buffer (0 when none)
    pub fn result_size(&self) -> usize {
        self.result.as_ref().map_or(0, Vec::len)
    }

    pub fn assigned_core(&self) -> Option<WorkerId> {
        self.assigned_core
    }

    /// Wall time spent in the function, once finished
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }
}

impl<T> fmt::Debug for Qubit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Qubit")
            .field("id", &self.id)
            .field("enabled", &self.enabled)
            .field("status", &self.status)
            .field("result_size", &self.result_size())
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_run() {
        let mut qubit: Qubit<u64> = Qubit::new(3);
        assert!(!qubit.is_enabled());

        qubit.install(Arc::new(|x: &mut u64| *x *= 2), 21, 8).unwrap();
        assert!(qubit.is_enabled());
        assert_eq!(qubit.result_size(), 8);

        qubit.run(WorkerId(0));
        assert_eq!(qubit.status(), QubitStatus::Completed);
        assert_eq!(*qubit.data(), 42);
        assert!(qubit.elapsed().is_some());
        assert_eq!(qubit.assigned_core(), Some(WorkerId(0)));
    }

    #[test]
    fn test_completed_qubit_does_not_rerun() {
        let mut qubit: Qubit<u64> = Qubit::new(0);
        qubit.install(Arc::new(|x: &mut u64| *x += 1), 0, 0).unwrap();
        qubit.run(WorkerId(0));
        qubit.run(WorkerId(1));
        assert_eq!(*qubit.data(), 1);

        qubit.reset();
        assert_eq!(qubit.status(), QubitStatus::Pending);
        qubit.run(WorkerId(1));
        assert_eq!(*qubit.data(), 2);
    }

    #[test]
    fn test_failed_install_leaves_qubit_untouched() {
        let mut qubit: Qubit<u64> = Qubit::new(0);
        let result = qubit.install(Arc::new(|_: &mut u64| {}), 7, usize::MAX);
        assert!(result.is_err());
        assert!(!qubit.is_enabled());
        assert_eq!(*qubit.data(), 0);
    }
}
