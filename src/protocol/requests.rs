//! Correlation of outbound requests with their `result` acknowledgements.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

/// Client-assigned correlation id, unique per connection.
pub type RequestId = u64;

/// Oldest pending entries are evicted past this point; the simulator answers
/// promptly in practice, so hitting the cap means acknowledgements are being
/// lost anyway.
const MAX_TRACKED: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Pending,
    Succeeded,
    Failed,
}

/// Assigns request ids and records which ones the simulator acknowledged.
#[derive(Debug, Default)]
pub struct RequestTracker {
    next_id: RequestId,
    outcomes: HashMap<RequestId, RequestOutcome>,
    order: VecDeque<RequestId>,
    completed: u64,
    failed: u64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next id and mark it pending.
    pub fn assign(&mut self) -> RequestId {
        self.next_id += 1;
        let id = self.next_id;
        if self.order.len() >= MAX_TRACKED {
            if let Some(evicted) = self.order.pop_front() {
                self.outcomes.remove(&evicted);
                warn!("request tracker full, dropping record of request {evicted}");
            }
        }
        self.outcomes.insert(id, RequestOutcome::Pending);
        self.order.push_back(id);
        id
    }

    /// Record an acknowledgement. Returns false for ids never assigned here,
    /// which callers ignore at debug level.
    pub fn complete(&mut self, id: RequestId, success: bool) -> bool {
        match self.outcomes.get_mut(&id) {
            Some(slot) => {
                *slot = if success { RequestOutcome::Succeeded } else { RequestOutcome::Failed };
                self.completed += 1;
                if !success {
                    self.failed += 1;
                }
                debug!(
                    "request {id} {}: {} completed, {} failed",
                    if success { "succeeded" } else { "failed" },
                    self.completed,
                    self.failed
                );
                true
            }
            None => false,
        }
    }

    pub fn outcome(&self, id: RequestId) -> Option<RequestOutcome> {
        self.outcomes.get(&id).copied()
    }

    pub fn pending(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, RequestOutcome::Pending))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let mut tracker = RequestTracker::new();
        let a = tracker.assign();
        let b = tracker.assign();
        assert!(b > a);
        assert_eq!(tracker.outcome(a), Some(RequestOutcome::Pending));
        assert_eq!(tracker.pending(), 2);
    }

    #[test]
    fn completion_updates_outcome() {
        let mut tracker = RequestTracker::new();
        let a = tracker.assign();
        let b = tracker.assign();
        assert!(tracker.complete(a, true));
        assert!(tracker.complete(b, false));
        assert_eq!(tracker.outcome(a), Some(RequestOutcome::Succeeded));
        assert_eq!(tracker.outcome(b), Some(RequestOutcome::Failed));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn unknown_id_is_reported_not_stored() {
        let mut tracker = RequestTracker::new();
        assert!(!tracker.complete(12345, true));
        assert_eq!(tracker.outcome(12345), None);
    }

    #[test]
    fn oldest_entries_evicted_at_capacity() {
        let mut tracker = RequestTracker::new();
        let first = tracker.assign();
        for _ in 0..MAX_TRACKED {
            tracker.assign();
        }
        assert_eq!(tracker.outcome(first), None, "first id evicted");
        assert!(tracker.outcome(tracker.next_id).is_some());
    }
}
