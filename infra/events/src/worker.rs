use crate::bus::BusInner;
use crate::options::DropPolicy;
use crate::queue::{Job, JobQueue};
use crate::subscriber::Subscriber;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Resolves once the flag is raised or its sender is gone.
pub(crate) async fn signalled(flag: &mut watch::Receiver<bool>) {
    let _ = flag.wait_for(|raised| *raised).await;
}

/// Dispatch worker: pops jobs from the shared queue and fans them out
/// to the inboxes of matching asynchronous subscribers.
pub(crate) async fn run(
    index: usize,
    queue: Arc<JobQueue>,
    bus: Weak<BusInner>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker = index, "Dispatch worker started");

    while let Some(job) = queue.pop().await {
        // Subscriber state is re-read at dispatch time, not publish time.
        let targets = match bus.upgrade() {
            Some(bus) => bus.resolve(job.event.key()),
            None => break,
        };
        trace!(
            worker = index,
            key = job.event.key(),
            event_id = job.event.id(),
            priority = job.priority,
            waited = ?job.enqueued_at.elapsed(),
            "Dispatching async job"
        );
        if !dispatch(&job, &targets, &mut shutdown).await {
            break;
        }
    }

    debug!(worker = index, "Dispatch worker stopped");
}

/// Returns `false` if shutdown interrupted a blocking delivery.
async fn dispatch(
    job: &Job,
    targets: &[Arc<Subscriber>],
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    for sub in targets.iter().filter(|sub| sub.is_async()) {
        let Some(inbox) = sub.inbox.as_ref() else { continue };
        let Err(job) = inbox.try_push(job.clone()) else { continue };

        match sub.options.drop_policy {
            DropPolicy::Block => {
                let mut closed = sub.closed_signal();
                tokio::select! {
                    biased;
                    () = signalled(shutdown) => return false,
                    () = signalled(&mut closed) => {
                        trace!(subscription = %sub.id, "Subscriber closed while worker was blocked");
                    },
                    () = inbox.push(job) => {},
                }
            },
            DropPolicy::DropNewest => {
                debug!(
                    subscription = %sub.id,
                    key = job.event.key(),
                    event_id = job.event.id(),
                    capacity = inbox.capacity(),
                    "Inbox full; dropped newest event"
                );
            },
            DropPolicy::DropOldest => {
                if let Some(evicted) = inbox.push_evicting(job) {
                    debug!(
                        subscription = %sub.id,
                        key = evicted.event.key(),
                        event_id = evicted.event.id(),
                        capacity = inbox.capacity(),
                        "Inbox full; evicted oldest event"
                    );
                }
            },
        }
    }
    true
}
