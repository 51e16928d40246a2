//! Event queue with deterministic ordering.

use crate::message::Envelope;
use crate::node::NodeId;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Key for ordering events in the queue.
///
/// Events are ordered by:
/// 1. Time (earlier first)
/// 2. Sequence number (FIFO for events scheduled at the same time)
///
/// Sequence numbers are unique, so no two keys ever compare equal.
#[derive(Debug, Clone, Copy)]
pub struct EventKey {
    /// When this event should be processed, in seconds.
    pub time: f64,
    /// Sequence number for deterministic tie-breaking.
    pub sequence: u64,
}

impl PartialEq for EventKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EventKey {}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.total_cmp(&other.time) {
            Ordering::Equal => {}
            ord => return ord,
        }
        self.sequence.cmp(&other.sequence)
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What happens when an event is processed.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A timer armed by the target node fires. The event time is the time the timer was
    /// armed for, which nodes compare against their latest armed timer.
    Timeout,
    /// A message arrives at the target node.
    Delivery(Envelope),
}

/// A scheduled occurrence addressed to one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub time: f64,
    pub target: NodeId,
    pub kind: EventKind,
}

/// Time-ordered queue of pending events.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: BTreeMap<EventKey, Event>,
    sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an event in time order.
    pub fn schedule(&mut self, event: Event) {
        let key = EventKey {
            time: event.time,
            sequence: self.sequence,
        };
        self.sequence += 1;
        self.events.insert(key, event);
    }

    /// Removes and returns the earliest event.
    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_first().map(|(_, event)| event)
    }

    pub fn peek_time(&self) -> Option<f64> {
        self.events.keys().next().map(|key| key.time)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Pending events in processing order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }
}
