//! Delayed retry scheduling for failed upstream sends.
//!
//! Tasks wait in a min-heap keyed by their execute time. A single dispatch loop pops
//! whatever is due and spawns its `retry` future, so a slow retry never holds up the
//! rest of the queue. Tasks due at the same instant fire in push order.

use crate::producer::Message;
use crate::time::Clock;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Scheduling state shared by every retryable unit of work.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Client correlation id of the request being retried.
    pub seq: String,
    /// 0 on the first attempt, incremented each time the work is rescheduled.
    pub retry_count: u32,
    pub execute_at: Instant,
    pub message: Message,
}

impl RetryContext {
    pub fn new(seq: impl Into<String>, message: Message, execute_at: Instant) -> Self {
        Self {
            seq: seq.into(),
            retry_count: 0,
            execute_at,
            message,
        }
    }

    /// Context for the next attempt, due `delay` after `now`.
    pub fn next_attempt(&self, now: Instant, delay: Duration) -> Self {
        Self {
            seq: self.seq.clone(),
            retry_count: self.retry_count + 1,
            execute_at: now + delay,
            message: self.message.clone(),
        }
    }
}

pub type RetryFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Work the scheduler can run again later.
pub trait RetryTask: Send + 'static {
    fn context(&self) -> &RetryContext;
    fn retry(self: Box<Self>) -> RetryFuture;
}

/// What `push_retry` did with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Scheduled,
    /// The task was past the retry limit and was dropped.
    Exhausted,
    /// The scheduler was shut down and the task was dropped.
    Rejected,
}

/// Read-only view of one queued task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRetry {
    pub seq: String,
    pub retry_count: u32,
    pub execute_at: Instant,
    pub topic: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub scheduled: u64,
    pub fired: u64,
    pub exhausted: u64,
}

struct Scheduled {
    execute_at: Instant,
    order: u64,
    task: Box<dyn RetryTask>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.execute_at == other.execute_at && self.order == other.order
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: BinaryHeap is a max-heap and the earliest task must come out first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .execute_at
            .cmp(&self.execute_at)
            .then_with(|| other.order.cmp(&self.order))
    }
}

enum NextRetry {
    Due(Box<dyn RetryTask>),
    Wait(Instant),
    Idle,
}

pub struct Retryer<C: Clock> {
    clock: C,
    max_retries: u32,
    queue: Mutex<BinaryHeap<Scheduled>>,
    next_order: AtomicU64,
    wakeup: Notify,
    shutdown: watch::Sender<bool>,
    scheduled: AtomicU64,
    fired: AtomicU64,
    exhausted: AtomicU64,
}

impl<C: Clock> Retryer<C> {
    pub fn new(clock: C, max_retries: u32) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            clock,
            max_retries,
            queue: Mutex::new(BinaryHeap::new()),
            next_order: AtomicU64::new(0),
            wakeup: Notify::new(),
            shutdown,
            scheduled: AtomicU64::new(0),
            fired: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Queue `task` to run at its context's execute time.
    pub fn push_retry(&self, task: Box<dyn RetryTask>) -> RetryDecision {
        let ctx = task.context();
        let execute_at = ctx.execute_at;
        if ctx.retry_count > self.max_retries {
            self.exhausted.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                seq = %ctx.seq,
                retry_count = ctx.retry_count,
                max_retries = self.max_retries,
                "retry times exceeded, dropping {}",
                ctx.message
            );
            return RetryDecision::Exhausted;
        }
        let (seq, retry_count) = (ctx.seq.clone(), ctx.retry_count);
        {
            // The flag is flipped under this lock, so a task is either rejected here or
            // queued before `shutdown` clears the queue.
            let mut queue = self.queue.lock();
            if *self.shutdown.borrow() {
                drop(queue);
                tracing::warn!(seq = %seq, "retryer is shut down, dropping retry task");
                return RetryDecision::Rejected;
            }
            queue.push(Scheduled {
                execute_at,
                order: self.next_order.fetch_add(1, Ordering::Relaxed),
                task,
            });
        }
        self.scheduled.fetch_add(1, Ordering::Relaxed);
        self.wakeup.notify_one();
        tracing::info!(
            seq = %seq,
            retry_count,
            "push retry task, retry after {}ms",
            execute_at
                .saturating_duration_since(self.clock.now())
                .as_millis()
        );
        RetryDecision::Scheduled
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Queued tasks, earliest first.
    pub fn pending(&self) -> Vec<PendingRetry> {
        let mut pending: Vec<(Instant, u64, PendingRetry)> = self
            .queue
            .lock()
            .iter()
            .map(|entry| {
                let ctx = entry.task.context();
                (
                    entry.execute_at,
                    entry.order,
                    PendingRetry {
                        seq: ctx.seq.clone(),
                        retry_count: ctx.retry_count,
                        execute_at: ctx.execute_at,
                        topic: ctx.message.topic().to_string(),
                    },
                )
            })
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        pending.into_iter().map(|(_, _, p)| p).collect()
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            fired: self.fired.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Spawn the dispatch loop on the current runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// Stop the dispatch loop and drop everything still queued.
    pub fn shutdown(&self) {
        let dropped = {
            let mut queue = self.queue.lock();
            self.shutdown.send_replace(true);
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            tracing::warn!("retryer shutdown dropped {} pending retry tasks", dropped);
        }
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        tracing::info!("retry dispatcher started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.next_due() {
                NextRetry::Due(task) => {
                    let ctx = task.context();
                    tracing::info!(
                        seq = %ctx.seq,
                        retry_count = ctx.retry_count,
                        "retry task fired"
                    );
                    self.fired.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(task.retry());
                }
                NextRetry::Wait(deadline) => {
                    tokio::select! {
                        _ = self.clock.sleep_until(deadline) => {}
                        _ = self.wakeup.notified() => {}
                        _ = shutdown.changed() => {}
                    }
                }
                NextRetry::Idle => {
                    tokio::select! {
                        _ = self.wakeup.notified() => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        tracing::info!("retry dispatcher stopped");
    }

    fn next_due(&self) -> NextRetry {
        let now = self.clock.now();
        let mut queue = self.queue.lock();
        match queue.peek() {
            Some(head) if head.execute_at <= now => match queue.pop() {
                Some(entry) => NextRetry::Due(entry.task),
                None => NextRetry::Idle,
            },
            Some(head) => NextRetry::Wait(head.execute_at),
            None => NextRetry::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemClock;
    use tokio::sync::mpsc;

    struct Marker {
        ctx: RetryContext,
        fired: mpsc::UnboundedSender<(String, Instant)>,
    }

    impl RetryTask for Marker {
        fn context(&self) -> &RetryContext {
            &self.ctx
        }

        fn retry(self: Box<Self>) -> RetryFuture {
            Box::pin(async move {
                let _ = self.fired.send((self.ctx.seq.clone(), SystemClock.now()));
            })
        }
    }

    fn marker(
        seq: &str,
        retry_count: u32,
        execute_at: Instant,
        fired: &mpsc::UnboundedSender<(String, Instant)>,
    ) -> Box<Marker> {
        let mut ctx = RetryContext::new(seq, Message::new("orders", "x"), execute_at);
        ctx.retry_count = retry_count;
        Box::new(Marker {
            ctx,
            fired: fired.clone(),
        })
    }

    #[test]
    fn next_attempt_increments_and_delays() {
        let now = SystemClock.now();
        let ctx = RetryContext::new("1", Message::new("orders", "x"), now);
        let next = ctx.next_attempt(now, Duration::from_secs(10));
        assert_eq!(next.retry_count, 1);
        assert_eq!(next.execute_at, now + Duration::from_secs(10));
        assert_eq!(next.seq, "1");
    }

    #[tokio::test(start_paused = true)]
    async fn fires_no_earlier_than_execute_time_in_order() {
        let clock = SystemClock;
        let retryer = Arc::new(Retryer::new(clock.clone(), 3));
        let _loop = retryer.start();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let base = clock.now();

        retryer.push_retry(marker("late", 1, base + Duration::from_millis(300), &tx));
        retryer.push_retry(marker("early", 1, base + Duration::from_millis(100), &tx));
        retryer.push_retry(marker("tie", 1, base + Duration::from_millis(100), &tx));
        assert_eq!(retryer.len(), 3);
        let pending: Vec<_> = retryer.pending().into_iter().map(|p| p.seq).collect();
        assert_eq!(pending, vec!["early", "tie", "late"]);

        let mut order = Vec::new();
        for _ in 0..3 {
            let (seq, at) = rx.recv().await.unwrap();
            let expected = if seq == "late" { 300 } else { 100 };
            assert!(at >= base + Duration::from_millis(expected));
            order.push(seq);
        }
        assert_eq!(order, vec!["early", "tie", "late"]);
        assert!(retryer.is_empty());
        assert_eq!(retryer.stats().fired, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_push_wakes_sleeping_loop() {
        let clock = SystemClock;
        let retryer = Arc::new(Retryer::new(clock.clone(), 3));
        let _loop = retryer.start();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let base = clock.now();

        retryer.push_retry(marker("far", 1, base + Duration::from_secs(60), &tx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        retryer.push_retry(marker("near", 1, base + Duration::from_secs(1), &tx));

        let (seq, at) = rx.recv().await.unwrap();
        assert_eq!(seq, "near");
        assert!(at < base + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_contexts_are_dropped() {
        let retryer = Retryer::new(SystemClock, 2);
        let (tx, _rx) = mpsc::unbounded_channel();
        let now = SystemClock.now();
        assert_eq!(
            retryer.push_retry(marker("a", 2, now, &tx)),
            RetryDecision::Scheduled
        );
        assert_eq!(
            retryer.push_retry(marker("b", 3, now, &tx)),
            RetryDecision::Exhausted
        );
        assert_eq!(retryer.len(), 1);
        assert_eq!(retryer.stats().exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_loop_and_rejects_pushes() {
        let retryer = Arc::new(Retryer::new(SystemClock, 3));
        let handle = retryer.start();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let now = SystemClock.now();
        retryer.push_retry(marker("a", 1, now + Duration::from_secs(5), &tx));

        retryer.shutdown();
        handle.await.unwrap();
        assert!(retryer.is_empty());
        assert_eq!(
            retryer.push_retry(marker("b", 1, now, &tx)),
            RetryDecision::Rejected
        );
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn pushes_racing_shutdown_never_outlive_it() {
        let retryer = Arc::new(Retryer::new(SystemClock, 3));
        let (tx, _rx) = mpsc::unbounded_channel();
        let due = SystemClock.now() + Duration::from_secs(60);
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let retryer = Arc::clone(&retryer);
                let tx = tx.clone();
                scope.spawn(move || {
                    for i in 0..500 {
                        let seq = format!("{worker}-{i}");
                        retryer.push_retry(marker(&seq, 1, due, &tx));
                    }
                });
            }
            scope.spawn(|| {
                std::thread::yield_now();
                retryer.shutdown();
            });
        });
        assert!(retryer.is_shutdown());
        assert!(retryer.is_empty());
        assert_eq!(
            retryer.push_retry(marker("late", 1, due, &tx)),
            RetryDecision::Rejected
        );
        assert!(retryer.is_empty());
    }
}
