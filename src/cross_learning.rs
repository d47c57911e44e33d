//! Cross-Learning Bus - message passing between running qubits
//!
//! A bounded queue of messages plus a global best-solution slot, guarded by
//! one lock. Qubits share partial results and hints through it and stop
//! early once someone broadcasts a best solution.

use crate::error::{QuantumError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_CAPACITY: usize = 64;
pub const DEFAULT_RELEVANCE: u8 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    PartialResult,
    BestFound,
    Hint,
    Convergence,
    AbortBranch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossMessage {
    pub kind: MessageKind,
    pub sender_id: u32,
    /// Point-to-point recipient; `None` broadcasts
    pub target_id: Option<u32>,
    /// Time since the bus was created
    pub timestamp: Duration,
    pub payload: Vec<u8>,
    /// 0-100
    pub relevance_score: u8,
}

impl CrossMessage {
    /// Little-endian `u32` at byte `offset` of the payload
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.payload.get(offset..offset + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Knowledge type and body of a `share_knowledge` hint
    pub fn knowledge(&self) -> Option<(u32, &[u8])> {
        if self.kind != MessageKind::Hint {
            return None;
        }
        Some((self.read_u32(0)?, &self.payload[4..]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossLearningConfig {
    pub enabled: bool,
    /// When false `broadcast_best` only updates the best slot
    pub broadcast_enabled: bool,
    pub capacity: usize,
    pub max_message_age_ms: u64,
}

impl Default for CrossLearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broadcast_enabled: true,
            capacity: DEFAULT_CAPACITY,
            max_message_age_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossLearningStatistics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub messages_expired: u64,
    pub helpful_messages: u64,
    pub ignored_messages: u64,
    pub pending: usize,
}

/// Best solution reported so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestSolution {
    pub qubit_id: u32,
    pub quality: u32,
    pub data: Vec<u8>,
}

struct BusState {
    queue: VecDeque<CrossMessage>,
    best: Option<BestSolution>,
    stats: CrossLearningStatistics,
    config: CrossLearningConfig,
}

pub struct CrossLearningBus {
    state: Mutex<BusState>,
    epoch: Instant,
}

impl CrossLearningBus {
    pub fn new() -> Self {
        Self::with_config(CrossLearningConfig::default())
    }

    pub fn with_config(config: CrossLearningConfig) -> Self {
        log::debug!(
            "Cross-learning bus: capacity {}, max age {} ms",
            config.capacity,
            config.max_message_age_ms
        );
        Self {
            state: Mutex::new(BusState {
                queue: VecDeque::with_capacity(config.capacity),
                best: None,
                stats: CrossLearningStatistics::default(),
                config,
            }),
            epoch: Instant::now(),
        }
    }

    pub fn configure(&self, config: CrossLearningConfig) {
        self.state.lock().config = config;
    }

    pub fn config(&self) -> CrossLearningConfig {
        self.state.lock().config
    }

    /// Queue a copy of `payload`; never blocks
    pub fn send(
        &self,
        sender_id: u32,
        kind: MessageKind,
        payload: &[u8],
        target_id: Option<u32>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        self.enqueue(&mut state, sender_id, kind, payload, target_id)
    }

    fn enqueue(
        &self,
        state: &mut BusState,
        sender_id: u32,
        kind: MessageKind,
        payload: &[u8],
        target_id: Option<u32>,
    ) -> Result<()> {
        if !state.config.enabled {
            return Err(QuantumError::BusDisabled);
        }
        if state.queue.len() >= state.config.capacity {
            state.stats.messages_dropped += 1;
            log::warn!("Cross-learning queue full, dropping {:?} from qubit {}", kind, sender_id);
            return Err(QuantumError::QueueFull {
                capacity: state.config.capacity,
            });
        }

        state.queue.push_back(CrossMessage {
            kind,
            sender_id,
            target_id,
            timestamp: self.epoch.elapsed(),
            payload: payload.to_vec(),
            relevance_score: DEFAULT_RELEVANCE,
        });
        state.stats.messages_sent += 1;
        Ok(())
    }

    /// Take the first message meant for `qubit_id` that it did not send
    pub fn receive(&self, qubit_id: u32) -> Option<CrossMessage> {
        let mut state = self.state.lock();
        if !state.config.enabled {
            return None;
        }

        let now = self.epoch.elapsed();
        let max_age = Duration::from_millis(state.config.max_message_age_ms);
        let before = state.queue.len();
        state.queue.retain(|msg| now.saturating_sub(msg.timestamp) <= max_age);
        let expired = before - state.queue.len();
        if expired > 0 {
            state.stats.messages_expired += expired as u64;
            log::debug!("Discarded {} expired cross-learning messages", expired);
        }

        let position = state.queue.iter().position(|msg| {
            msg.sender_id != qubit_id && msg.target_id.map_or(true, |t| t == qubit_id)
        })?;
        let message = state.queue.remove(position)?;
        state.stats.messages_received += 1;
        Some(message)
    }

    /// Record `payload` as the best solution if it beats the current one.
    ///
    /// Returns whether it improved; only improvements are broadcast.
    pub fn broadcast_best(&self, sender_id: u32, payload: &[u8], quality: u32) -> bool {
        let mut state = self.state.lock();
        let improved = state.best.as_ref().map_or(true, |best| quality > best.quality);
        if !improved {
            return false;
        }

        state.best = Some(BestSolution {
            qubit_id: sender_id,
            quality,
            data: payload.to_vec(),
        });
        log::info!("Qubit {} found a new best solution (quality {})", sender_id, quality);

        if state.config.broadcast_enabled {
            let queued = self.enqueue(&mut state, sender_id, MessageKind::BestFound, payload, None);
            if let Err(e) = queued {
                log::warn!("Best-solution broadcast from qubit {} not queued: {}", sender_id, e);
            }
        }
        true
    }

    /// Broadcast a typed hint; the type is prefixed to the data
    pub fn share_knowledge(&self, qubit_id: u32, knowledge_type: u32, data: &[u8]) -> Result<()> {
        let mut package = Vec::with_capacity(4 + data.len());
        package.extend_from_slice(&knowledge_type.to_le_bytes());
        package.extend_from_slice(data);
        self.send(qubit_id, MessageKind::Hint, &package, None)
    }

    /// Holder of the best solution, if any
    pub fn check_convergence(&self) -> Option<u32> {
        self.state.lock().best.as_ref().map(|best| best.qubit_id)
    }

    pub fn best_solution(&self) -> Option<BestSolution> {
        self.state.lock().best.clone()
    }

    /// Count whether a received message helped the receiver
    pub fn record_feedback(&self, helpful: bool) {
        let mut state = self.state.lock();
        if helpful {
            state.stats.helpful_messages += 1;
        } else {
            state.stats.ignored_messages += 1;
        }
    }

    pub fn stats(&self) -> CrossLearningStatistics {
        let state = self.state.lock();
        CrossLearningStatistics {
            pending: state.queue.len(),
            ..state.stats
        }
    }

    /// Drop pending messages and the best solution; statistics are kept
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.queue.clear();
        state.best = None;
    }
}

impl Default for CrossLearningBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_receive_skips_own_messages() {
        let bus = CrossLearningBus::new();
        bus.send(1, MessageKind::PartialResult, &[1, 2, 3], None).unwrap();

        assert!(bus.receive(1).is_none());
        let msg = bus.receive(2).unwrap();
        assert_eq!(msg.sender_id, 1);
        assert_eq!(msg.payload, vec![1, 2, 3]);
        assert_eq!(msg.relevance_score, DEFAULT_RELEVANCE);
        assert!(bus.receive(2).is_none());
    }

    #[test]
    fn test_target_routing() {
        let bus = CrossLearningBus::new();
        bus.send(0, MessageKind::Hint, b"for three", Some(3)).unwrap();
        bus.send(0, MessageKind::Hint, b"for all", None).unwrap();

        assert_eq!(bus.receive(2).unwrap().payload, b"for all".to_vec());
        assert!(bus.receive(2).is_none());
        assert_eq!(bus.receive(3).unwrap().payload, b"for three".to_vec());
    }

    #[test]
    fn test_queue_full() {
        let bus = CrossLearningBus::with_config(CrossLearningConfig {
            capacity: 2,
            ..CrossLearningConfig::default()
        });
        bus.send(0, MessageKind::Hint, &[], None).unwrap();
        bus.send(0, MessageKind::Hint, &[], None).unwrap();
        let err = bus.send(0, MessageKind::Hint, &[], None).unwrap_err();
        assert_eq!(err, QuantumError::QueueFull { capacity: 2 });
        assert_eq!(bus.stats().messages_dropped, 1);
        assert_eq!(bus.stats().pending, 2);
    }

    #[test]
    fn test_disabled_bus() {
        let bus = CrossLearningBus::new();
        bus.configure(CrossLearningConfig {
            enabled: false,
            ..CrossLearningConfig::default()
        });
        let err = bus.send(0, MessageKind::Hint, &[], None).unwrap_err();
        assert_eq!(err, QuantumError::BusDisabled);
        assert!(bus.receive(1).is_none());
    }

    #[test]
    fn test_expired_messages_discarded() {
        let bus = CrossLearningBus::with_config(CrossLearningConfig {
            max_message_age_ms: 0,
            ..CrossLearningConfig::default()
        });
        bus.send(0, MessageKind::Hint, &[], None).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(bus.receive(1).is_none());
        assert_eq!(bus.stats().messages_expired, 1);
    }

    #[test]
    fn test_broadcast_best_only_on_improvement() {
        let bus = CrossLearningBus::new();
        assert!(bus.check_convergence().is_none());

        assert!(bus.broadcast_best(4, &42u32.to_le_bytes(), 10));
        assert!(!bus.broadcast_best(5, &7u32.to_le_bytes(), 10));
        assert!(bus.broadcast_best(5, &7u32.to_le_bytes(), 11));

        assert_eq!(bus.check_convergence(), Some(5));
        assert_eq!(bus.stats().messages_sent, 2);

        let msg = bus.receive(1).unwrap();
        assert_eq!(msg.kind, MessageKind::BestFound);
        assert_eq!(msg.read_u32(0), Some(42));
        assert_eq!(msg.read_u32(1), None);
    }

    #[test]
    fn test_share_knowledge() {
        let bus = CrossLearningBus::new();
        bus.share_knowledge(2, 7, b"range").unwrap();
        let msg = bus.receive(0).unwrap();
        assert_eq!(msg.knowledge(), Some((7, &b"range"[..])));
    }

    #[test]
    fn test_feedback_and_clear() {
        let bus = CrossLearningBus::new();
        bus.record_feedback(true);
        bus.record_feedback(false);
        bus.record_feedback(true);
        bus.broadcast_best(1, &[], 3);
        bus.clear();

        let stats = bus.stats();
        assert_eq!(stats.helpful_messages, 2);
        assert_eq!(stats.ignored_messages, 1);
        assert_eq!(stats.pending, 0);
        assert!(bus.best_solution().is_none());
    }
}
