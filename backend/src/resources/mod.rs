//! Capacity-constrained resource pools
//!
//! Clinic slots, imaging capacity, and theatre sessions are modest pools with
//! queueing. A patient either gets a unit immediately or joins the queue;
//! "waiting" in a queue is represented by the absence of a scheduled event.
//!
//! # Critical invariants
//!
//! 1. `in_use <= capacity` at all times.
//! 2. A released unit is granted atomically to exactly one waiter before any
//!    other acquire is considered: no leaks, no double grants.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A request that can structurally never be granted
///
/// Recovered by the coordinator: the requesting patient is censored and the
/// run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resource pool '{pool}' (capacity {capacity}) can never grant this request")]
pub struct ResourceDeadlockError {
    pub pool: String,
    pub capacity: usize,
}

/// Queueing discipline for a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueDiscipline {
    /// First come, first served
    Fifo,
    /// Higher severity first; ties served in insertion order
    Severity,
}

/// Outcome of an acquire request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// A unit was free; the patient holds it now
    Granted,
    /// No free capacity; the patient joined the queue at `position`
    Queued { position: usize },
}

/// A queued acquire request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Waiter {
    patient_id: String,
    priority: u8,
    /// Pool-local insertion sequence; the deterministic tie-break
    seq: u64,
}

/// A capacity-constrained resource with a waiting queue
///
/// # Example
/// ```
/// use pathway_simulator_core_rs::resources::{Acquisition, QueueDiscipline, ResourcePool};
///
/// let mut pool = ResourcePool::new("clinic_slots".to_string(), 1, QueueDiscipline::Fifo);
/// assert_eq!(pool.acquire("pt_00000000", 0).unwrap(), Acquisition::Granted);
/// assert_eq!(pool.acquire("pt_00000001", 0).unwrap(), Acquisition::Queued { position: 0 });
///
/// // Releasing hands the unit straight to the head of the queue
/// assert_eq!(pool.release(), Some("pt_00000001".to_string()));
/// assert_eq!(pool.in_use(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePool {
    name: String,
    capacity: usize,
    in_use: usize,
    discipline: QueueDiscipline,
    queue: VecDeque<Waiter>,
    next_seq: u64,
}

impl ResourcePool {
    /// Create a pool with the given capacity and discipline
    pub fn new(name: String, capacity: usize, discipline: QueueDiscipline) -> Self {
        Self {
            name,
            capacity,
            in_use: 0,
            discipline,
            queue: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Request one unit of capacity
    ///
    /// Grants immediately if a unit is free, otherwise queues the patient
    /// according to the discipline. Fails with [`ResourceDeadlockError`] if
    /// the request can never be satisfied (zero capacity).
    pub fn acquire(&mut self, patient_id: &str, priority: u8) -> Result<Acquisition, ResourceDeadlockError> {
        if self.capacity == 0 {
            return Err(ResourceDeadlockError {
                pool: self.name.clone(),
                capacity: self.capacity,
            });
        }

        if self.in_use < self.capacity {
            self.in_use += 1;
            self.check_invariant();
            return Ok(Acquisition::Granted);
        }

        let waiter = Waiter {
            patient_id: patient_id.to_string(),
            priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        let position = match self.discipline {
            QueueDiscipline::Fifo => {
                self.queue.push_back(waiter);
                self.queue.len() - 1
            }
            QueueDiscipline::Severity => {
                // Insert behind every waiter of equal or higher priority so
                // equal-priority requests stay in insertion order
                let position = self
                    .queue
                    .iter()
                    .position(|w| w.priority < waiter.priority)
                    .unwrap_or(self.queue.len());
                self.queue.insert(position, waiter);
                position
            }
        };

        Ok(Acquisition::Queued { position })
    }

    /// Release one held unit
    ///
    /// If the queue is non-empty, the unit passes atomically to the head
    /// waiter and their id is returned so the coordinator can schedule the
    /// continuation event; otherwise the unit goes back to the pool.
    ///
    /// # Panics
    /// Panics if no unit is held; releasing capacity that was never acquired
    /// is a programming error.
    pub fn release(&mut self) -> Option<String> {
        assert!(self.in_use > 0, "release without a held unit in pool '{}'", self.name);

        let granted = self.queue.pop_front().map(|w| w.patient_id);
        if granted.is_none() {
            self.in_use -= 1;
        }
        self.check_invariant();
        granted
    }

    /// Drop a queued patient (censored while waiting); no-op if absent
    pub fn remove_waiter(&mut self, patient_id: &str) {
        self.queue.retain(|w| w.patient_id != patient_id);
    }

    /// Queued patient ids in grant order (statistics, checkpointing)
    pub fn queued_ids(&self) -> Vec<String> {
        self.queue.iter().map(|w| w.patient_id.clone()).collect()
    }

    fn check_invariant(&self) {
        debug_assert!(
            self.in_use <= self.capacity,
            "pool '{}' over capacity: in_use={}, capacity={}",
            self.name,
            self.in_use,
            self.capacity
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(capacity: usize, discipline: QueueDiscipline) -> ResourcePool {
        ResourcePool::new("theatre_sessions".to_string(), capacity, discipline)
    }

    #[test]
    fn test_grant_until_full_then_queue() {
        let mut p = pool(2, QueueDiscipline::Fifo);
        assert_eq!(p.acquire("a", 0).unwrap(), Acquisition::Granted);
        assert_eq!(p.acquire("b", 0).unwrap(), Acquisition::Granted);
        assert_eq!(p.acquire("c", 0).unwrap(), Acquisition::Queued { position: 0 });
        assert_eq!(p.acquire("d", 0).unwrap(), Acquisition::Queued { position: 1 });
        assert_eq!(p.in_use(), 2);
        assert_eq!(p.queue_len(), 2);
    }

    #[test]
    fn test_release_grants_to_head_atomically() {
        let mut p = pool(1, QueueDiscipline::Fifo);
        p.acquire("a", 0).unwrap();
        p.acquire("b", 0).unwrap();
        p.acquire("c", 0).unwrap();

        // The unit never becomes observable as free: it moves to "b"
        assert_eq!(p.release(), Some("b".to_string()));
        assert_eq!(p.in_use(), 1);
        assert_eq!(p.release(), Some("c".to_string()));
        assert_eq!(p.release(), None);
        assert_eq!(p.in_use(), 0);
    }

    #[test]
    fn test_severity_discipline_orders_by_priority_then_seq() {
        let mut p = pool(1, QueueDiscipline::Severity);
        p.acquire("holder", 0).unwrap();
        p.acquire("mild_1", 0).unwrap();
        p.acquire("severe", 2).unwrap();
        p.acquire("mild_2", 0).unwrap();
        p.acquire("moderate", 1).unwrap();

        assert_eq!(p.release(), Some("severe".to_string()));
        assert_eq!(p.release(), Some("moderate".to_string()));
        assert_eq!(p.release(), Some("mild_1".to_string()));
        assert_eq!(p.release(), Some("mild_2".to_string()));
    }

    #[test]
    fn test_zero_capacity_is_a_deadlock() {
        let mut p = pool(0, QueueDiscipline::Fifo);
        let err = p.acquire("a", 0).unwrap_err();
        assert_eq!(err.pool, "theatre_sessions");
        assert_eq!(err.capacity, 0);
    }

    #[test]
    #[should_panic(expected = "release without a held unit")]
    fn test_release_without_acquire_panics() {
        let mut p = pool(1, QueueDiscipline::Fifo);
        p.release();
    }

    #[test]
    fn test_remove_waiter() {
        let mut p = pool(1, QueueDiscipline::Fifo);
        p.acquire("a", 0).unwrap();
        p.acquire("b", 0).unwrap();
        p.acquire("c", 0).unwrap();

        p.remove_waiter("b");
        assert_eq!(p.queue_len(), 1);
        assert_eq!(p.release(), Some("c".to_string()));
    }
}
