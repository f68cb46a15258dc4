use herald_events::{Event, EventBus, HandlerError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipped {
    pub order_id: u64,
    pub user_id: u64,
}

/// Builds a JSON event carrying a [`Shipped`] payload.
/// # Panics
/// * If the payload fails to serialize.
#[must_use]
pub fn shipped(key: &'static str, order_id: u64, user_id: u64) -> Event {
    Event::json(key, &Shipped { order_id, user_id }).expect("payload should serialize")
}

/// Starts a bus with the given number of workers and test logging enabled.
/// # Panics
/// * If the bus cannot be built.
#[must_use]
pub fn bus(workers: usize) -> EventBus {
    init_tracing();
    EventBus::builder().workers(workers).build().expect("bus should start")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("herald_events=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Handler that bumps a shared counter.
pub fn counting(
    counter: &Arc<AtomicUsize>,
) -> impl Fn(Arc<Event>) -> std::future::Ready<Result<(), HandlerError>> + Send + Sync + 'static {
    let counter = counter.clone();
    move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(()))
    }
}

/// Polls `cond` until it holds or `timeout` elapses.
/// # Panics
/// * If the condition does not hold within `timeout`.
pub async fn wait_until(timeout: Duration, cond: impl Fn() -> bool) {
    let poll = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(timeout, poll)
        .await
        .unwrap_or_else(|_| panic!("timeout after {timeout:?} waiting for condition"));
}

/// Runs `fut` and asserts it finishes within `timeout`.
/// # Panics
/// * If `fut` does not complete in time.
pub async fn within<T>(timeout: Duration, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, fut).await.expect("operation should finish in time")
}
