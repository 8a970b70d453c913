//! Deterministic event queue driving the simulation clock.
//!
//! A min-heap keyed by `(timestamp, priority, insertion sequence)`. Within a
//! single timestamp events interleave in causal order (MarketData, Signal,
//! Order, Fill); insertion sequence breaks remaining ties FIFO so identical
//! inputs always replay identically.

use crate::bar::Bar;
use crate::fill::Fill;
use crate::order::Order;
use crate::strategy::Signal;
use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Event payload. Variants are listed in dispatch priority order.
#[derive(Debug, Clone)]
pub enum EventKind {
    MarketData(Bar),
    Signal(Signal),
    Order(Order),
    Fill(Fill),
}

impl EventKind {
    /// Dispatch priority: MarketData=1, Signal=2, Order=3, Fill=4.
    pub fn priority(&self) -> u8 {
        match self {
            EventKind::MarketData(_) => 1,
            EventKind::Signal(_) => 2,
            EventKind::Order(_) => 3,
            EventKind::Fill(_) => 4,
        }
    }
}

/// A timestamped event.
#[derive(Debug, Clone)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    seq: u64,
}

impl Event {
    fn key(&self) -> (DateTime<Utc>, u8, u64) {
        (self.ts, self.kind.priority(), self.seq)
    }
}

// Ordering considers only the (ts, priority, seq) key; payloads carry f64
// fields and never participate in comparisons.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Priority queue of timestamped events. Single-threaded by design.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Event>>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event. Insertion order is remembered for tie-breaking.
    pub fn push(&mut self, ts: DateTime<Utc>, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Event { ts, kind, seq }));
    }

    /// Remove and return the earliest event.
    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|Reverse(e)| e)
    }

    /// Inspect the earliest event without removing it.
    pub fn peek(&self) -> Option<&Event> {
        self.heap.peek().map(|Reverse(e)| e)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
