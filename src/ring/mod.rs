//! Most-recent-first buffer of accepted events for the read API.

use crate::detector::DetectedEvent;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct RecentEvents {
    /// Newest at the front.
    events: VecDeque<DetectedEvent>,
    capacity: usize,
}

/// Aggregates over the current ring contents.
#[derive(Debug, Clone, PartialEq)]
pub struct RingAggregate {
    pub count: usize,
    pub total_notional: Decimal,
    pub average_notional: Decimal,
    pub most_recent: Option<DateTime<Utc>>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: DetectedEvent) {
        if self.events.len() >= self.capacity {
            self.events.pop_back();
        }
        self.events.push_front(event);
    }

    /// Owned copy, newest first.
    pub fn snapshot(&self) -> Vec<DetectedEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn aggregate(&self) -> RingAggregate {
        let count = self.events.len();
        let total_notional = self
            .events
            .iter()
            .fold(Decimal::ZERO, |acc, e| acc.saturating_add(e.notional_value));
        let average_notional = if count == 0 {
            Decimal::ZERO
        } else {
            total_notional / Decimal::from(count as u64)
        };
        RingAggregate {
            count,
            total_notional,
            average_notional,
            most_recent: self.events.iter().map(|e| e.observed_at).max(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
