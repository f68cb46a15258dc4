use crate::event::Event;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

/// One unit of asynchronous work: an event headed for every matching async subscriber.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub(crate) event: Arc<Event>,
    pub(crate) priority: i32,
    pub(crate) enqueued_at: Instant,
    seq: u64,
}

impl Job {
    pub(crate) fn new(event: Arc<Event>, priority: i32) -> Self {
        Self { event, priority, enqueued_at: Instant::now(), seq: 0 }
    }
}

// Max-heap order: higher priority, then earlier enqueue, then lower sequence.
impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Job {}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<Job>,
    next_seq: u64,
    closed: bool,
}

/// Shared priority queue feeding the dispatch workers.
#[derive(Debug, Default)]
pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueues a job and wakes one waiting worker. Returns `false` once the queue is closed.
    pub(crate) fn push(&self, mut job: Job) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            job.seq = state.next_seq;
            state.next_seq = state.next_seq.wrapping_add(1);
            state.heap.push(job);
        }
        self.available.notify_one();
        true
    }

    /// Waits for the highest-priority job. Returns `None` once the queue is closed and empty.
    pub(crate) async fn pop(&self) -> Option<Job> {
        loop {
            let mut notified = pin!(self.available.notified());
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(job) = state.heap.pop() {
                    return Some(job);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Rejects further pushes and wakes every waiter. Returns the number of jobs left to drain.
    pub(crate) fn close(&self) -> usize {
        let pending = {
            let mut state = self.state.lock();
            state.closed = true;
            state.heap.len()
        };
        self.available.notify_waiters();
        pending
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(key: &'static str, priority: i32) -> Job {
        Job::new(Arc::new(Event::new(key, Vec::new())), priority)
    }

    #[tokio::test]
    async fn pops_highest_priority_first() {
        let queue = JobQueue::new();
        queue.push(job("low", 1));
        queue.push(job("high", 10));
        queue.push(job("mid", 5));

        assert_eq!(queue.pop().await.unwrap().event.key(), "high");
        assert_eq!(queue.pop().await.unwrap().event.key(), "mid");
        assert_eq!(queue.pop().await.unwrap().event.key(), "low");
    }

    #[tokio::test]
    async fn equal_priority_is_fifo() {
        let queue = JobQueue::new();
        let mut first = job("first", 3);
        let second = job("second", 3);
        // Same instant; the sequence number still decides.
        first.enqueued_at = second.enqueued_at;
        queue.push(first);
        queue.push(second);
        queue.push(job("third", 3));

        assert_eq!(queue.pop().await.unwrap().event.key(), "first");
        assert_eq!(queue.pop().await.unwrap().event.key(), "second");
        assert_eq!(queue.pop().await.unwrap().event.key(), "third");
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = Arc::new(JobQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.map(|j| j.event.key().to_owned()) })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.push(job("late", 0)));

        assert_eq!(consumer.await.unwrap().as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn close_wakes_all_waiters_and_rejects_pushes() {
        let queue = Arc::new(JobQueue::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.pop().await.is_none() })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        queue.close();

        for waiter in waiters {
            assert!(waiter.await.unwrap(), "waiter should observe closure");
        }
        assert!(!queue.push(job("after", 1)));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn close_drains_pending_jobs_before_ending() {
        let queue = JobQueue::new();
        queue.push(job("a", 1));
        queue.push(job("b", 2));
        assert_eq!(queue.close(), 2);
        assert!(!queue.push(job("c", 9)));

        assert_eq!(queue.pop().await.unwrap().event.key(), "b");
        assert_eq!(queue.pop().await.unwrap().event.key(), "a");
        assert!(queue.pop().await.is_none());
    }
}
