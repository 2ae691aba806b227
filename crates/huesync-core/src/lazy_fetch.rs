// ── Lazy device metadata fetches ──
//
// Bounded-concurrency queue for single-device lookups triggered when a
// service resource references an owner whose metadata is not cached.
// Requests are idempotent; failures stick until the next snapshot cycle.

use std::collections::{HashSet, VecDeque};

/// Outcome of `request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Capacity was available; the caller should start the fetch now.
    Start,
    /// Queued behind in-flight fetches.
    Queued,
    /// Already in flight, queued, or failed this cycle.
    Ignored,
}

#[derive(Debug)]
pub struct MetadataFetchQueue {
    max_in_flight: usize,
    in_flight: HashSet<String>,
    queued: VecDeque<String>,
    failed: HashSet<String>,
}

impl MetadataFetchQueue {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            in_flight: HashSet::new(),
            queued: VecDeque::new(),
            failed: HashSet::new(),
        }
    }

    pub fn request(&mut self, device_id: &str) -> Admission {
        if self.in_flight.contains(device_id)
            || self.failed.contains(device_id)
            || self.queued.iter().any(|q| q == device_id)
        {
            return Admission::Ignored;
        }
        if self.in_flight.len() < self.max_in_flight {
            self.in_flight.insert(device_id.to_owned());
            Admission::Start
        } else {
            self.queued.push_back(device_id.to_owned());
            Admission::Queued
        }
    }

    /// Record a finished fetch. Failures are remembered for the cycle.
    pub fn complete(&mut self, device_id: &str, succeeded: bool) {
        self.in_flight.remove(device_id);
        if !succeeded {
            self.failed.insert(device_id.to_owned());
        }
    }

    /// Promote the next queued id to in-flight, if capacity allows.
    pub fn next_ready(&mut self) -> Option<String> {
        if self.in_flight.len() >= self.max_in_flight {
            return None;
        }
        let next = self.queued.pop_front()?;
        self.in_flight.insert(next.clone());
        Some(next)
    }

    pub fn has_queued(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Another fetch could start now.
    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.max_in_flight
    }

    /// No fetch in flight or waiting.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.queued.is_empty()
    }

    pub fn is_pending(&self, device_id: &str) -> bool {
        self.in_flight.contains(device_id) || self.queued.iter().any(|q| q == device_id)
    }

    pub fn has_failed(&self, device_id: &str) -> bool {
        self.failed.contains(device_id)
    }

    /// A new snapshot cycle clears the failure memory.
    pub fn reset_cycle(&mut self) {
        self.failed.clear();
    }

    /// Forget everything, including in-flight work (teardown).
    pub fn clear(&mut self) {
        self.in_flight.clear();
        self.queued.clear();
        self.failed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_idempotent() {
        let mut q = MetadataFetchQueue::new(4);
        assert_eq!(q.request("d1"), Admission::Start);
        assert_eq!(q.request("d1"), Admission::Ignored);
        assert!(q.is_pending("d1"));
    }

    #[test]
    fn excess_requests_queue_fifo() {
        let mut q = MetadataFetchQueue::new(2);
        assert_eq!(q.request("a"), Admission::Start);
        assert_eq!(q.request("b"), Admission::Start);
        assert_eq!(q.request("c"), Admission::Queued);
        assert_eq!(q.request("d"), Admission::Queued);
        assert_eq!(q.request("c"), Admission::Ignored);

        assert_eq!(q.next_ready(), None, "no capacity yet");
        assert!(!q.has_capacity());
        q.complete("a", true);
        assert!(q.has_capacity());
        assert_eq!(q.next_ready().as_deref(), Some("c"));
        assert_eq!(q.next_ready(), None);
        q.complete("b", true);
        assert_eq!(q.next_ready().as_deref(), Some("d"));
        q.complete("c", true);
        q.complete("d", true);
        assert!(q.is_idle());
    }

    #[test]
    fn failures_stick_until_next_cycle() {
        let mut q = MetadataFetchQueue::new(4);
        q.request("d1");
        q.complete("d1", false);
        assert!(q.has_failed("d1"));
        assert_eq!(q.request("d1"), Admission::Ignored);

        q.reset_cycle();
        assert_eq!(q.request("d1"), Admission::Start);
    }
}
