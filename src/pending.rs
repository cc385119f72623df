//! The cross-stage pending pool (§3, §4.4): a concurrent mapping from
//! `RequestId` to the request-stage outcome a response-stage paused event
//! will later replay against.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dashmap::DashMap;

use crate::model::{MatchedRuleSummary, Request, RequestId};
use crate::rule_engine::MatchedRule;

/// A request-stage outcome awaiting its response-stage paused event.
/// `committed` is the latch from §3's invariant: "at most one NetworkEvent
/// per RequestID reaches the subscriber channel."
pub struct PendingRequest {
    pub started_at: Instant,
    pub request: Request,
    pub matched_summaries: Vec<MatchedRuleSummary>,
    pub response_stage_rules: Vec<MatchedRule>,
    pub request_modified: bool,
    committed: AtomicBool,
}

impl PendingRequest {
    pub fn new(
        request: Request,
        matched_summaries: Vec<MatchedRuleSummary>,
        response_stage_rules: Vec<MatchedRule>,
        request_modified: bool,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            request,
            matched_summaries,
            response_stage_rules,
            request_modified,
            committed: AtomicBool::new(false),
        }
    }

    /// Flip the committed-once latch. Returns `true` the first time, `false`
    /// on any subsequent call — defensive against double delivery (§4.4
    /// step 2).
    pub fn try_commit(&self) -> bool {
        self.committed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn age(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

/// Orphan entries older than this are dropped by the sweep (§3, §4.4).
pub const ORPHAN_AGE: std::time::Duration = std::time::Duration::from_secs(60);
/// How often the sweep runs (§4.4).
pub const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Default)]
pub struct PendingPool {
    entries: DashMap<RequestId, PendingRequest>,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request_id: RequestId, pending: PendingRequest) {
        self.entries.insert(request_id, pending);
    }

    /// Atomically remove and return the entry for `request_id`, matching
    /// §4.4 step 1's "Atomically load-and-remove."
    pub fn take(&self, request_id: &RequestId) -> Option<PendingRequest> {
        self.entries.remove(request_id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry older than [`ORPHAN_AGE`]. Run periodically by a
    /// background ticker (§4.4).
    pub fn sweep_orphans(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, pending| {
            let keep = pending.age() <= ORPHAN_AGE;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HeaderMap, LowerMap, ResourceType};

    fn req(id: &str) -> Request {
        Request {
            request_id: RequestId::new(id),
            url: "https://x/".into(),
            method: "GET".into(),
            resource_type: ResourceType::Xhr,
            headers: HeaderMap::new(),
            query: LowerMap::new(),
            cookies: LowerMap::new(),
            body: vec![],
        }
    }

    #[test]
    fn take_is_load_and_remove() {
        let pool = PendingPool::new();
        pool.insert(RequestId::new("r1"), PendingRequest::new(req("r1"), vec![], vec![], false));
        assert_eq!(pool.len(), 1);
        assert!(pool.take(&RequestId::new("r1")).is_some());
        assert!(pool.is_empty());
        assert!(pool.take(&RequestId::new("r1")).is_none());
    }

    #[test]
    fn commit_latch_only_flips_once() {
        let pending = PendingRequest::new(req("r1"), vec![], vec![], false);
        assert!(pending.try_commit());
        assert!(!pending.try_commit());
    }

    #[test]
    fn sweep_removes_only_orphans_older_than_threshold() {
        let pool = PendingPool::new();
        let mut fresh = PendingRequest::new(req("fresh"), vec![], vec![], false);
        fresh.started_at = Instant::now();
        let mut stale = PendingRequest::new(req("stale"), vec![], vec![], false);
        stale.started_at = Instant::now() - ORPHAN_AGE - std::time::Duration::from_secs(1);
        pool.insert(RequestId::new("fresh"), fresh);
        pool.insert(RequestId::new("stale"), stale);
        let removed = pool.sweep_orphans();
        assert_eq!(removed, 1);
        assert_eq!(pool.len(), 1);
        assert!(pool.take(&RequestId::new("fresh")).is_some());
    }
}
