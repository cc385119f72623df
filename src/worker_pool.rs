//! Bounded-concurrency worker pool with drop-on-full backpressure (§4.5).
//! The non-blocking `submit` discipline is what lets the interceptor loop
//! guarantee it never blocks waiting on a busy pool — full queue means an
//! immediate degradation continue, not a stall.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::channel::mpsc;
use futures::StreamExt;

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Default)]
struct Counters {
    total_submit: AtomicU64,
    total_drop: AtomicU64,
    queue_len: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub queue_len: usize,
    pub queue_cap: usize,
    pub total_submit: u64,
    pub total_drop: u64,
}

/// Fixed-size pool over a bounded FIFO task queue. `workers <= 0` selects
/// unbounded mode: `submit` spawns a fresh task per call instead of
/// queueing, used only in tests (§4.5).
pub struct WorkerPool {
    workers: usize,
    queue_cap: usize,
    sender: parking_lot::Mutex<Option<mpsc::Sender<BoxedTask>>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(workers: isize, queue_cap: Option<usize>) -> Self {
        let queue_cap = queue_cap.unwrap_or_else(|| (workers.max(1) as usize) * 8);
        Self {
            workers: workers.max(0) as usize,
            queue_cap,
            sender: parking_lot::Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Spawn `workers` consumer tasks plus a usage monitor that logs every
    /// 30s once at least one task has ever been submitted (§4.5). Takes
    /// `&self` (the sender slot is mutex-guarded) so a [`WorkerPool`] can
    /// live behind a single `Arc` shared by the handler, interceptor loop
    /// and facade alike, rather than needing external synchronization for
    /// `start`/`stop`.
    pub fn start(&self) {
        if self.workers == 0 {
            // Unbounded mode: nothing to spawn, `submit` handles it directly.
            return;
        }
        let (tx, rx) = mpsc::channel::<BoxedTask>(self.queue_cap);
        *self.sender.lock() = Some(tx);
        let rx = Arc::new(futures::lock::Mutex::new(rx));
        for _ in 0..self.workers {
            let rx = Arc::clone(&rx);
            let counters = Arc::clone(&self.counters);
            crate::spawn::spawn(async move {
                loop {
                    let task = {
                        let mut guard = rx.lock().await;
                        guard.next().await
                    };
                    match task {
                        Some(task) => {
                            counters.queue_len.fetch_sub(1, Ordering::SeqCst);
                            task.await;
                        }
                        None => break,
                    }
                }
            });
        }
        let counters = Arc::clone(&self.counters);
        let cap = self.queue_cap;
        crate::spawn::spawn(async move {
            monitor_loop(counters, cap).await;
        });
    }

    /// Non-blocking submit. Returns `false` (and increments the drop
    /// counter) if the queue is full — the caller MUST have a degradation
    /// path (§4.5).
    pub fn submit<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.counters.total_submit.fetch_add(1, Ordering::SeqCst);
        if self.workers == 0 {
            crate::spawn::spawn(fut);
            return true;
        }
        let Some(sender) = self.sender.lock().clone() else {
            self.counters.total_drop.fetch_add(1, Ordering::SeqCst);
            return false;
        };
        match sender.try_send(Box::pin(fut)) {
            Ok(()) => {
                self.counters.queue_len.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(_) => {
                self.counters.total_drop.fetch_add(1, Ordering::SeqCst);
                false
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_len: self.counters.queue_len.load(Ordering::SeqCst),
            queue_cap: self.queue_cap,
            total_submit: self.counters.total_submit.load(Ordering::SeqCst),
            total_drop: self.counters.total_drop.load(Ordering::SeqCst),
        }
    }

    /// Drop the sender half so every worker's `rx.next()` observes the
    /// channel closing and exits.
    pub fn stop(&self) {
        *self.sender.lock() = None;
    }
}

async fn monitor_loop(counters: Arc<Counters>, cap: usize) {
    let mut ticked_since_submit = false;
    loop {
        crate::timer::sleep(std::time::Duration::from_secs(30)).await;
        let submitted = counters.total_submit.load(Ordering::SeqCst);
        if submitted == 0 && !ticked_since_submit {
            continue;
        }
        ticked_since_submit = true;
        tracing::info!(
            queue_len = counters.queue_len.load(Ordering::SeqCst),
            queue_cap = cap,
            total_submit = submitted,
            total_drop = counters.total_drop.load(Ordering::SeqCst),
            "worker pool usage"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_mode_always_accepts() {
        let pool = WorkerPool::new(0, None);
        let accepted = pool.submit(async {});
        assert!(accepted);
    }

    #[test]
    fn unstarted_pool_drops_every_submission_but_still_counts_it() {
        // §8: "drop+submitted=total offered" — even degenerate cases (no
        // `start()` call, so every submit finds no sender) must preserve
        // the accounting invariant.
        let pool = WorkerPool::new(4, Some(2));
        for _ in 0..5 {
            assert!(!pool.submit(async {}));
        }
        let stats = pool.stats();
        assert_eq!(stats.total_submit, 5);
        assert_eq!(stats.total_drop, 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queue_cap_defaults_to_eight_times_workers() {
        let pool = WorkerPool::new(3, None);
        assert_eq!(pool.stats().queue_cap, 24);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn started_pool_drains_submitted_work() {
        let pool = WorkerPool::new(2, Some(4));
        pool.start();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            while !pool.submit(async move {
                done.fetch_add(1, Ordering::SeqCst);
            }) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        }
        for _ in 0..50 {
            if done.load(Ordering::SeqCst) == 10 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(done.load(Ordering::SeqCst), 10);
        let stats = pool.stats();
        assert_eq!(stats.total_submit, 10);
    }
}
