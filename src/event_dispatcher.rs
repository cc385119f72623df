//! Lossy, non-blocking fan-out of [`NetworkEvent`]s to a single subscriber
//! (§3, §4.6). A slow or absent subscriber never backpressures the
//! interceptor loop — events are simply dropped.

use futures::channel::mpsc;

use crate::model::NetworkEvent;

/// Holds at most one active subscriber at a time. A fresh `subscribe` call
/// replaces whatever sender was installed before it, matching §4.6's
/// "single subscriber channel per session" — the previous receiver simply
/// stops receiving anything further.
pub struct EventDispatcher {
    capacity: usize,
    sender: parking_lot::Mutex<Option<mpsc::Sender<NetworkEvent>>>,
    dropped: std::sync::atomic::AtomicU64,
}

impl EventDispatcher {
    /// `capacity` is the session's configured `PendingCapacity` (§5, §6) —
    /// every subscriber channel is bounded to exactly that size.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            sender: parking_lot::Mutex::new(None),
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Install a fresh bounded channel and return its receiving half.
    pub fn subscribe(&self) -> mpsc::Receiver<NetworkEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        *self.sender.lock() = Some(tx);
        rx
    }

    /// Best-effort, non-blocking delivery. A full channel or no subscriber
    /// at all both count as a silent drop (§4.6), never an error returned
    /// to the handler.
    pub fn emit(&self, event: NetworkEvent) {
        let sent = {
            let mut guard = self.sender.lock();
            match guard.as_mut() {
                Some(sender) => sender.try_send(event).is_ok(),
                None => false,
            }
        };
        if !sent {
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FinalResult, HeaderMap, LowerMap, Request, RequestId, ResourceType, SessionId, TargetId};

    fn event(id: &str) -> NetworkEvent {
        NetworkEvent {
            request_id: RequestId::new(id),
            session_id: SessionId::new("s1"),
            target_id: TargetId::new("t1"),
            timestamp_ms: 0,
            matched: false,
            request: Request {
                request_id: RequestId::new(id),
                url: "https://x/".into(),
                method: "GET".into(),
                resource_type: ResourceType::Xhr,
                headers: HeaderMap::new(),
                query: LowerMap::new(),
                cookies: LowerMap::new(),
                body: vec![],
            },
            response: None,
            final_result: FinalResult::Passed,
            matched_rules: vec![],
        }
    }

    #[test]
    fn emit_without_a_subscriber_is_a_counted_drop() {
        let dispatcher = EventDispatcher::new(1024);
        dispatcher.emit(event("r1"));
        assert_eq!(dispatcher.dropped_count(), 1);
    }

    #[test]
    fn subscribed_events_are_received_in_order() {
        let dispatcher = EventDispatcher::new(1024);
        let mut rx = dispatcher.subscribe();
        dispatcher.emit(event("r1"));
        dispatcher.emit(event("r2"));
        let first = rx.try_next().unwrap().unwrap();
        let second = rx.try_next().unwrap().unwrap();
        assert_eq!(first.request_id, RequestId::new("r1"));
        assert_eq!(second.request_id, RequestId::new("r2"));
    }

    #[test]
    fn resubscribing_replaces_the_previous_channel() {
        let dispatcher = EventDispatcher::new(1024);
        let mut first_rx = dispatcher.subscribe();
        let mut second_rx = dispatcher.subscribe();
        dispatcher.emit(event("r1"));
        assert_eq!(first_rx.try_next(), Ok(None));
        assert!(second_rx.try_next().unwrap().is_some());
    }
}
