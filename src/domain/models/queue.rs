use std::cmp::Ordering;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::request::RetrainRequest;

/// Orders two pending requests: higher priority first, then earliest `created_at`.
fn queue_order(a: &RetrainRequest, b: &RetrainRequest) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// Priority-ordered backlog of pending retrain requests.
///
/// Requests with higher priority are admitted first. Requests with equal
/// priority keep FIFO order by creation time. The queue holds at most one
/// request per target: inserting a request for a target that already has
/// one replaces it.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use driftloop::domain::models::{RequestQueue, RetrainRequest};
///
/// let now = Utc::now();
/// let mut queue = RequestQueue::new();
/// queue.upsert(RetrainRequest::new("tyre_wear", 0.75, now, now));
/// queue.upsert(RetrainRequest::new("lap_time", 0.95, now, now));
///
/// assert_eq!(queue.peek().map(|r| r.target_id.as_str()), Some("lap_time"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestQueue {
    items: VecDeque<RetrainRequest>,
}

impl RequestQueue {
    #[allow(clippy::missing_const_for_fn)]
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Insert a request, replacing any pending request for the same target.
    ///
    /// Returns the replaced request, if any.
    pub fn upsert(&mut self, request: RetrainRequest) -> Option<RetrainRequest> {
        let replaced = self.remove(&request.target_id);

        let position = self
            .items
            .iter()
            .position(|existing| queue_order(&request, existing) == Ordering::Less)
            .unwrap_or(self.items.len());
        self.items.insert(position, request);

        replaced
    }

    /// Apply `f` to the pending request of `target_id` and restore queue order.
    ///
    /// Returns the updated request, or `None` if the target has nothing pending.
    pub fn update<F>(&mut self, target_id: &str, f: F) -> Option<RetrainRequest>
    where
        F: FnOnce(&mut RetrainRequest),
    {
        let mut request = self.remove(target_id)?;
        f(&mut request);
        self.upsert(request.clone());
        Some(request)
    }

    pub fn remove(&mut self, target_id: &str) -> Option<RetrainRequest> {
        let index = self.items.iter().position(|r| r.target_id == target_id)?;
        self.items.remove(index)
    }

    pub fn remove_by_id(&mut self, request_id: Uuid) -> Option<RetrainRequest> {
        let index = self.items.iter().position(|r| r.id == request_id)?;
        self.items.remove(index)
    }

    pub fn get(&self, target_id: &str) -> Option<&RetrainRequest> {
        self.items.iter().find(|r| r.target_id == target_id)
    }

    /// Head of the queue regardless of backoff.
    pub fn peek(&self) -> Option<&RetrainRequest> {
        self.items.front()
    }

    /// First request in queue order that is eligible for admission at `now`.
    pub fn peek_eligible(&self, now: DateTime<Utc>) -> Option<&RetrainRequest> {
        self.items.iter().find(|r| r.is_eligible(now))
    }

    /// Earliest instant at which a deferred request becomes eligible.
    pub fn next_eligible_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.items
            .iter()
            .filter_map(|r| r.not_before)
            .filter(|t| *t > now)
            .min()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate in admission order.
    pub fn iter(&self) -> impl Iterator<Item = &RetrainRequest> {
        self.items.iter()
    }
}
