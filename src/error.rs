//! Error types for the quantum engine

use crate::types::CollapseStrategy;
use std::time::Duration;

/// Errors reported by registers, collapse strategies and the cross-learning bus
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuantumError {
    #[error("register must hold at least one qubit")]
    EmptyRegister,

    #[error("qubit index {index} out of range (register has {count} qubits)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("qubit {index} has no function installed")]
    NoFunction { index: usize },

    #[error("strategy {strategy} requires {requirement}")]
    MissingCallback {
        strategy: CollapseStrategy,
        requirement: &'static str,
    },

    #[error("execution order is not a permutation of the qubit indices")]
    InvalidOrder,

    #[error("ensemble needs between 1 and 3 members with positive weight")]
    InvalidEnsemble,

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("queue full ({capacity} entries)")]
    QueueFull { capacity: usize },

    #[error("aggregation failed: {0}")]
    AggregationFailed(String),

    #[error("no completed qubits to collapse")]
    NoResults,

    #[error("no enabled qubits to dispatch")]
    NothingDispatched,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cross-learning bus is disabled")]
    BusDisabled,
}

pub type Result<T> = std::result::Result<T, QuantumError>;

/// Reserve room for `additional` elements, mapping allocator failure to `Allocation`
pub(crate) fn try_reserve<T>(vec: &mut Vec<T>, additional: usize, what: &str) -> Result<()> {
    vec.try_reserve_exact(additional)
        .map_err(|e| QuantumError::Allocation(format!("{}: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = QuantumError::IndexOutOfRange { index: 9, count: 4 };
        assert_eq!(err.to_string(), "qubit index 9 out of range (register has 4 qubits)");

        let err = QuantumError::MissingCallback {
            strategy: CollapseStrategy::Best,
            requirement: CollapseStrategy::Best.requirement(),
        };
        assert_eq!(err.to_string(), "strategy best requires an evaluate function");
    }

    #[test]
    fn test_try_reserve_small() {
        let mut v: Vec<u8> = Vec::new();
        try_reserve(&mut v, 16, "buffer").unwrap();
        assert!(v.capacity() >= 16);

        let err = try_reserve(&mut v, usize::MAX, "buffer").unwrap_err();
        assert!(matches!(err, QuantumError::Allocation(_)));
    }
}
