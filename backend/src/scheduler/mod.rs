//! Discrete-event scheduler
//!
//! A priority queue of timestamped events driving the DES side of the hybrid
//! engine. The scheduler owns the simulation clock: popping an event advances
//! the clock to the event's time, and nothing else moves it forward.
//!
//! # Ordering and determinism
//!
//! Events are ordered by time ascending; ties are broken by a monotonically
//! increasing insertion sequence number (FIFO among equal times). Two runs
//! with identical seed and identical insertion order therefore pop events in
//! identical order, which is what makes replay byte-identical.
//!
//! # Cancellation
//!
//! `cancel` uses lazy tombstones: the handle is marked dead and the entry is
//! skipped when it reaches the head of the heap. Cancelling an event that has
//! already fired (or was never scheduled) is a no-op.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::clock::SimulationClock;

/// Opaque handle to a scheduled event, usable with [`EventScheduler::cancel`]
pub type EventHandle = u64;

/// The scheduler ran out of events
///
/// This is the normal termination signal for a run, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event queue is empty")]
pub struct EmptyQueueError;

/// What a popped event asks the coordinator to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A new unwell patient joins the waiting population
    Arrival,
    /// The patient's current stage has finished; sample the next transition
    StageComplete,
    /// Predicted deterioration-threshold crossing for a waiting patient
    EscalationDue,
    /// A queued patient has been granted a resource unit
    ResourceGranted,
    /// Simulation horizon reached; censor the survivors and stop
    EndOfRun,
}

/// A timestamped event bound for the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesEvent {
    /// Simulation time at which the event fires (days)
    pub time: f64,
    /// Insertion sequence number; tie-breaker and handle
    pub seq: u64,
    pub kind: EventKind,
    /// Target patient; `None` for run-level events
    pub patient_id: Option<String>,
}

impl DesEvent {
    /// Handle for cancellation (the insertion sequence number)
    pub fn handle(&self) -> EventHandle {
        self.seq
    }
}

/// Heap entry with reversed (time, seq) ordering for a min-heap
#[derive(Debug, Clone)]
struct HeapEntry(DesEvent);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.time.total_cmp(&other.0.time) == Ordering::Equal && self.0.seq == other.0.seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .time
            .total_cmp(&other.0.time)
            .then(self.0.seq.cmp(&other.0.seq))
            .reverse()
    }
}

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerPhase {
    /// Created, nothing popped yet
    Idle,
    /// At least one event popped
    Running,
    /// Suspended for checkpointing
    Paused,
    /// Queue exhausted or run stopped
    Completed,
}

/// Discrete-event priority scheduler owning the simulation clock
///
/// # Example
/// ```
/// use pathway_simulator_core_rs::scheduler::{EventKind, EventScheduler};
///
/// let mut scheduler = EventScheduler::new();
/// scheduler.schedule(EventKind::Arrival, Some("pt_00000000".to_string()), 1.0);
/// let h = scheduler.schedule(EventKind::EscalationDue, Some("pt_00000000".to_string()), 0.5);
/// scheduler.cancel(h);
///
/// let event = scheduler.pop_next().unwrap();
/// assert_eq!(event.kind, EventKind::Arrival);
/// assert_eq!(scheduler.now(), 1.0);
/// assert!(scheduler.pop_next().is_err()); // queue exhausted
/// ```
#[derive(Debug, Clone)]
pub struct EventScheduler {
    clock: SimulationClock,
    heap: BinaryHeap<HeapEntry>,
    cancelled: HashSet<EventHandle>,
    next_seq: u64,
    phase: SchedulerPhase,
}

impl EventScheduler {
    /// Create an empty scheduler with the clock at zero
    pub fn new() -> Self {
        Self {
            clock: SimulationClock::new(),
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_seq: 0,
            phase: SchedulerPhase::Idle,
        }
    }

    /// Current simulation time
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Lifecycle phase
    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    /// Mark the run complete (stop condition reached)
    pub fn complete(&mut self) {
        self.phase = SchedulerPhase::Completed;
    }

    /// Mark the scheduler paused (checkpointing)
    pub fn pause(&mut self) {
        self.phase = SchedulerPhase::Paused;
    }

    /// Number of pending (non-cancelled) events
    ///
    /// Counts live heap entries rather than subtracting tombstones: a handle
    /// cancelled after its event fired leaves a stale tombstone with no
    /// matching entry.
    pub fn pending(&self) -> usize {
        self.heap
            .iter()
            .filter(|HeapEntry(e)| !self.cancelled.contains(&e.seq))
            .count()
    }

    /// Whether any events remain
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Schedule an event, maintaining (time, seq) order
    ///
    /// Returns a handle usable with [`cancel`](Self::cancel).
    ///
    /// # Panics
    /// Panics if `time` is in the past; the clock never rewinds.
    pub fn schedule(&mut self, kind: EventKind, patient_id: Option<String>, time: f64) -> EventHandle {
        assert!(time.is_finite(), "event time must be finite");
        assert!(
            time >= self.clock.now(),
            "cannot schedule event in the past: now={}, requested={}",
            self.clock.now(),
            time
        );

        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapEntry(DesEvent {
            time,
            seq,
            kind,
            patient_id,
        }));
        seq
    }

    /// Cancel a pending event; no-op if it already fired or never existed
    pub fn cancel(&mut self, handle: EventHandle) {
        if handle < self.next_seq {
            self.cancelled.insert(handle);
        }
    }

    /// Remove and return the earliest pending event, advancing the clock
    ///
    /// Cancelled entries are discarded on the way. Fails with
    /// [`EmptyQueueError`] once the queue is exhausted, which the coordinator
    /// treats as normal termination.
    pub fn pop_next(&mut self) -> Result<DesEvent, EmptyQueueError> {
        while let Some(HeapEntry(event)) = self.heap.pop() {
            if self.cancelled.remove(&event.seq) {
                continue;
            }
            self.clock.advance_to(event.time);
            self.phase = SchedulerPhase::Running;
            return Ok(event);
        }
        self.phase = SchedulerPhase::Completed;
        Err(EmptyQueueError)
    }

    /// Pending events in pop order (checkpointing)
    pub fn pending_events(&self) -> Vec<DesEvent> {
        let mut events: Vec<DesEvent> = self
            .heap
            .iter()
            .filter(|HeapEntry(e)| !self.cancelled.contains(&e.seq))
            .map(|HeapEntry(e)| e.clone())
            .collect();
        events.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.seq.cmp(&b.seq)));
        events
    }

    /// Rebuild a scheduler from checkpointed state
    pub fn from_snapshot(now: f64, next_seq: u64, events: Vec<DesEvent>) -> Self {
        let heap = events.into_iter().map(HeapEntry).collect();
        Self {
            clock: SimulationClock::at(now),
            heap,
            cancelled: HashSet::new(),
            next_seq,
            phase: SchedulerPhase::Paused,
        }
    }

    /// Next insertion sequence number (checkpointing)
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(n: u64) -> Option<String> {
        Some(format!("pt_{:08}", n))
    }

    #[test]
    fn test_pop_order_by_time() {
        let mut s = EventScheduler::new();
        s.schedule(EventKind::Arrival, pt(0), 3.0);
        s.schedule(EventKind::Arrival, pt(1), 1.0);
        s.schedule(EventKind::Arrival, pt(2), 2.0);

        assert_eq!(s.pop_next().unwrap().patient_id, pt(1));
        assert_eq!(s.pop_next().unwrap().patient_id, pt(2));
        assert_eq!(s.pop_next().unwrap().patient_id, pt(0));
    }

    #[test]
    fn test_fifo_among_equal_times() {
        let mut s = EventScheduler::new();
        for n in 0..5 {
            s.schedule(EventKind::StageComplete, pt(n), 1.0);
        }
        for n in 0..5 {
            let event = s.pop_next().unwrap();
            assert_eq!(event.patient_id, pt(n), "insertion order broken");
        }
    }

    #[test]
    fn test_pop_advances_clock() {
        let mut s = EventScheduler::new();
        s.schedule(EventKind::Arrival, pt(0), 2.5);
        assert_eq!(s.now(), 0.0);
        s.pop_next().unwrap();
        assert_eq!(s.now(), 2.5);
    }

    #[test]
    fn test_cancel_pending() {
        let mut s = EventScheduler::new();
        let h = s.schedule(EventKind::StageComplete, pt(0), 1.0);
        s.schedule(EventKind::Arrival, pt(1), 2.0);
        s.cancel(h);

        assert_eq!(s.pending(), 1);
        assert_eq!(s.pop_next().unwrap().patient_id, pt(1));
        assert!(s.pop_next().is_err());
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let mut s = EventScheduler::new();
        let h = s.schedule(EventKind::Arrival, pt(0), 1.0);
        s.pop_next().unwrap();
        s.cancel(h);
        assert!(s.pop_next().is_err());
    }

    #[test]
    fn test_empty_queue_error_and_phase() {
        let mut s = EventScheduler::new();
        assert_eq!(s.phase(), SchedulerPhase::Idle);
        assert_eq!(s.pop_next().unwrap_err(), EmptyQueueError);
        assert_eq!(s.phase(), SchedulerPhase::Completed);
    }

    #[test]
    #[should_panic(expected = "cannot schedule event in the past")]
    fn test_schedule_in_past_panics() {
        let mut s = EventScheduler::new();
        s.schedule(EventKind::Arrival, pt(0), 5.0);
        s.pop_next().unwrap();
        s.schedule(EventKind::Arrival, pt(1), 4.0);
    }

    #[test]
    fn test_snapshot_round_trip_preserves_order() {
        let mut s = EventScheduler::new();
        s.schedule(EventKind::Arrival, pt(0), 3.0);
        s.schedule(EventKind::StageComplete, pt(1), 1.0);
        let h = s.schedule(EventKind::EscalationDue, pt(2), 2.0);
        s.cancel(h);

        let pending = s.pending_events();
        let mut restored = EventScheduler::from_snapshot(s.now(), s.next_seq(), pending);

        assert_eq!(restored.pop_next().unwrap().patient_id, pt(1));
        assert_eq!(restored.pop_next().unwrap().patient_id, pt(0));
        assert!(restored.pop_next().is_err());
    }
}
