use crate::bus::BusInner;
use crate::handler::HandlerFn;
use crate::options::EventOptions;
use crate::pattern::Pattern;
use crate::queue::Job;
use crate::worker::signalled;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Notify, watch};
use tracing::{debug, error};

/// Opaque handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Arc<str>);

impl SubscriptionId {
    pub(crate) fn new(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubscriptionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Bounded FIFO buffer in front of an asynchronous subscriber.
///
/// Unlike a channel, the producer side can evict the oldest entry,
/// which `DropOldest` needs.
#[derive(Debug)]
pub(crate) struct Inbox {
    jobs: Mutex<VecDeque<Job>>,
    capacity: usize,
    items: Notify,
    space: Notify,
}

impl Inbox {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            jobs: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    /// Non-blocking enqueue; hands the job back when full.
    pub(crate) fn try_push(&self, job: Job) -> Result<(), Job> {
        {
            let mut jobs = self.jobs.lock();
            if jobs.len() >= self.capacity {
                return Err(job);
            }
            jobs.push_back(job);
        }
        self.items.notify_one();
        Ok(())
    }

    /// Enqueues, waiting for the consumer to free a slot if needed.
    pub(crate) async fn push(&self, mut job: Job) {
        loop {
            let mut space = pin!(self.space.notified());
            space.as_mut().enable();
            match self.try_push(job) {
                Ok(()) => return,
                Err(rejected) => job = rejected,
            }
            space.await;
        }
    }

    /// Evicts the oldest queued job and enqueues `job` in one step.
    ///
    /// Returns the evicted job, or `None` if there was room after all.
    pub(crate) fn push_evicting(&self, job: Job) -> Option<Job> {
        let evicted = {
            let mut jobs = self.jobs.lock();
            let evicted = if jobs.len() >= self.capacity { jobs.pop_front() } else { None };
            jobs.push_back(job);
            evicted
        };
        self.items.notify_one();
        evicted
    }

    /// Waits for the next job.
    pub(crate) async fn pop(&self) -> Job {
        loop {
            let mut items = pin!(self.items.notified());
            items.as_mut().enable();
            let next = self.jobs.lock().pop_front();
            if let Some(job) = next {
                self.space.notify_one();
                return job;
            }
            items.await;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One registration on the bus.
pub(crate) struct Subscriber {
    pub(crate) id: SubscriptionId,
    pub(crate) pattern: Pattern,
    pub(crate) raw_pattern: String,
    pub(crate) handler: HandlerFn,
    pub(crate) options: EventOptions,
    /// Present only for asynchronous subscribers.
    pub(crate) inbox: Option<Inbox>,
    /// Registration order; breaks priority ties.
    pub(crate) seq: u64,
    closed: watch::Sender<bool>,
    fired: AtomicBool,
}

impl Subscriber {
    pub(crate) fn new(
        id: SubscriptionId,
        raw_pattern: String,
        handler: HandlerFn,
        options: EventOptions,
        seq: u64,
    ) -> Self {
        let inbox = options.async_delivery.then(|| Inbox::new(options.buffer));
        let (closed, _) = watch::channel(false);
        Self {
            id,
            pattern: Pattern::parse(&raw_pattern),
            raw_pattern,
            handler,
            options,
            inbox,
            seq,
            closed,
            fired: AtomicBool::new(false),
        }
    }

    pub(crate) const fn is_async(&self) -> bool {
        self.options.async_delivery
    }

    /// Signals the consumer task to stop. Idempotent.
    pub(crate) fn close(&self) {
        self.closed.send_replace(true);
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Claims the single invocation of a `once` subscriber. Always `true` otherwise.
    pub(crate) fn claim(&self) -> bool {
        !self.options.once
            || self.fired.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Gives a claimed invocation back after a failed synchronous delivery.
    pub(crate) fn release(&self) {
        if self.options.once {
            self.fired.store(false, Ordering::Release);
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("pattern", &self.raw_pattern)
            .field("options", &self.options)
            .field("queued", &self.inbox.as_ref().map(Inbox::len))
            .finish_non_exhaustive()
    }
}

/// Consumer task of an asynchronous subscriber.
///
/// Drains the inbox until the bus shuts down, the subscriber is closed,
/// or a `once` subscriber has handled its first job.
pub(crate) async fn consume(
    sub: Arc<Subscriber>,
    bus: Weak<BusInner>,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(inbox) = sub.inbox.as_ref() else { return };
    let mut closed = sub.closed_signal();
    debug!(subscription = %sub.id, pattern = %sub.raw_pattern, "Subscriber consumer started");

    loop {
        let job = tokio::select! {
            biased;
            () = signalled(&mut shutdown) => break,
            () = signalled(&mut closed) => break,
            job = inbox.pop() => job,
        };
        // Unsubscribed after the job was queued.
        if sub.is_closed() {
            break;
        }
        let Some(inner) = bus.upgrade() else { break };

        if let Err(err) = inner.invoke(&sub, &job.event).await {
            error!(
                subscription = %sub.id,
                pattern = %sub.raw_pattern,
                key = job.event.key(),
                event_id = job.event.id(),
                error = %err,
                "Async event handler failed"
            );
        }
        if sub.options.once {
            inner.unsubscribe(&sub.id);
            break;
        }
    }

    debug!(subscription = %sub.id, "Subscriber consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use std::time::Duration;

    fn job(key: &'static str) -> Job {
        Job::new(Arc::new(Event::new(key, Vec::new())), 0)
    }

    #[tokio::test]
    async fn try_push_rejects_when_full() {
        let inbox = Inbox::new(1);
        assert!(inbox.try_push(job("a")).is_ok());
        let rejected = inbox.try_push(job("b")).unwrap_err();
        assert_eq!(rejected.event.key(), "b");
        assert_eq!(inbox.pop().await.event.key(), "a");
    }

    #[tokio::test]
    async fn push_evicting_keeps_most_recent() {
        let inbox = Inbox::new(2);
        assert!(inbox.push_evicting(job("a")).is_none());
        assert!(inbox.push_evicting(job("b")).is_none());
        let evicted = inbox.push_evicting(job("c")).expect("oldest should be evicted");
        assert_eq!(evicted.event.key(), "a");
        assert_eq!(inbox.pop().await.event.key(), "b");
        assert_eq!(inbox.pop().await.event.key(), "c");
    }

    #[tokio::test]
    async fn blocking_push_resumes_after_pop() {
        let inbox = Arc::new(Inbox::new(1));
        inbox.try_push(job("first")).unwrap();

        let producer = {
            let inbox = inbox.clone();
            tokio::spawn(async move { inbox.push(job("second")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!producer.is_finished(), "producer should wait for space");

        assert_eq!(inbox.pop().await.event.key(), "first");
        producer.await.unwrap();
        assert_eq!(inbox.pop().await.event.key(), "second");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(Inbox::new(0).capacity(), 1);
    }

    #[test]
    fn once_claim_is_exclusive() {
        let handler = crate::handler::from_fn(|_| async { Ok(()) });
        let sub = Subscriber::new(
            SubscriptionId::new("s"),
            "a.*".to_owned(),
            handler,
            EventOptions::synchronous().once(true),
            0,
        );
        assert!(sub.claim());
        assert!(!sub.claim());
        sub.release();
        assert!(sub.claim());
        assert!(sub.pattern.is_wildcard());
    }
}
