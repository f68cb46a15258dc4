use crate::error::{EventBusError, HandlerError, Result};
use crate::event::Event;
use crate::handler::{self, EventHandler, HandlerFn, PanicHook, PanicReport};
use crate::options::{BusConfig, EventOptions};
use crate::pattern::Pattern;
use crate::queue::{Job, JobQueue};
use crate::subscriber::{self, Subscriber, SubscriptionId};
use crate::worker;
use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};
use std::cmp::Reverse;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Generator for subscription ids.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Default)]
struct Registry {
    subscribers: FxHashMap<SubscriptionId, Arc<Subscriber>>,
    /// Pattern → subscriber ids in registration order.
    patterns: FxHashMap<Pattern, Vec<SubscriptionId>>,
    next_seq: u64,
}

pub(crate) struct BusInner {
    registry: RwLock<Registry>,
    queue: Arc<JobQueue>,
    shutdown: watch::Sender<bool>,
    /// `None` once `close` has taken ownership of the tasks.
    tasks: Mutex<Option<JoinSet<()>>>,
    runtime: Handle,
    panic_hook: Option<PanicHook>,
    id_generator: IdGenerator,
    default_buffer: usize,
}

impl BusInner {
    /// Matching subscribers, highest priority first; ties keep discovery order
    /// (exact pattern first, then wildcards, each in registration order).
    pub(crate) fn resolve(&self, key: &str) -> Vec<Arc<Subscriber>> {
        let registry = self.registry.read();
        let mut exact = Vec::new();
        let mut wildcard = Vec::new();

        for (pattern, ids) in &registry.patterns {
            if !pattern.matches(key) {
                continue;
            }
            let bucket = if pattern.is_wildcard() { &mut wildcard } else { &mut exact };
            bucket.extend(ids.iter().filter_map(|id| registry.subscribers.get(id).cloned()));
        }
        drop(registry);

        wildcard.sort_by_key(|sub| sub.seq);
        exact.append(&mut wildcard);
        exact.sort_by_key(|sub| Reverse(sub.options.priority));
        exact
    }

    pub(crate) fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let removed = {
            let mut registry = self.registry.write();
            let Some(sub) = registry.subscribers.remove(id) else {
                return false;
            };
            let emptied = registry.patterns.get_mut(&sub.pattern).is_some_and(|ids| {
                ids.retain(|other| other != id);
                ids.is_empty()
            });
            if emptied {
                registry.patterns.remove(&sub.pattern);
            }
            sub
        };

        removed.close();
        debug!(subscription = %id, pattern = %removed.raw_pattern, "Unsubscribed");
        true
    }

    pub(crate) async fn invoke(&self, sub: &Subscriber, event: &Arc<Event>) -> Result<()> {
        handler::invoke(
            &sub.handler,
            sub.id.as_str(),
            &sub.raw_pattern,
            event,
            self.panic_hook.as_ref(),
        )
        .await
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        if let Some(set) = tasks.as_mut() {
            while set.try_join_next().is_some() {}
            set.spawn_on(task, &self.runtime);
        } else {
            // Closed bus: nothing waits for this task, and it exits on the shutdown signal.
            drop(self.runtime.spawn(task));
        }
    }

    fn signal_shutdown(&self) -> usize {
        self.shutdown.send_replace(true);
        self.queue.close()
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

impl fmt::Debug for BusInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("BusInner")
            .field("subscribers", &registry.subscribers.len())
            .field("patterns", &registry.patterns.len())
            .field("queued", &self.queue.len())
            .field("closed", &*self.shutdown.borrow())
            .finish_non_exhaustive()
    }
}

/// Builder for [`EventBus`].
#[must_use = "The builder must be finished with `build` to start the bus."]
pub struct EventBusBuilder {
    config: BusConfig,
    panic_hook: Option<PanicHook>,
    id_generator: Option<IdGenerator>,
}

impl EventBusBuilder {
    fn new() -> Self {
        Self { config: BusConfig::default(), panic_hook: None, id_generator: None }
    }

    /// Replaces the whole configuration, e.g. one loaded from a config file.
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of dispatch workers (default 4).
    pub const fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Inbox capacity for subscriptions with `buffer = 0` (default 256).
    pub const fn default_buffer(mut self, capacity: usize) -> Self {
        self.config.default_buffer = capacity;
        self
    }

    /// Called for every recovered handler panic instead of the default error log.
    pub fn panic_hook(mut self, hook: impl Fn(&PanicReport<'_>) + Send + Sync + 'static) -> Self {
        self.panic_hook = Some(Arc::new(hook));
        self
    }

    /// Custom subscription id source. Ids must be unique for the lifetime of the bus.
    pub fn id_generator(mut self, generator: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    /// Starts the worker pool on the current Tokio runtime.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidConfiguration`] for zero workers or a zero
    /// default buffer, and [`EventBusError::RuntimeUnavailable`] when called
    /// outside a Tokio runtime.
    pub fn build(self) -> Result<EventBus> {
        validate_config(&self.config)?;
        let runtime = Handle::try_current().map_err(|e| EventBusError::RuntimeUnavailable {
            message: e.to_string().into(),
            context: Some("EventBus must be built inside a Tokio runtime".into()),
        })?;

        let queue = Arc::new(JobQueue::new());
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(BusInner {
            registry: RwLock::new(Registry::default()),
            queue: queue.clone(),
            shutdown,
            tasks: Mutex::new(Some(JoinSet::new())),
            runtime,
            panic_hook: self.panic_hook,
            id_generator: self.id_generator.unwrap_or_else(|| Arc::new(|| nanoid::nanoid!())),
            default_buffer: self.config.default_buffer,
        });

        for index in 0..self.config.workers {
            inner.spawn(worker::run(
                index,
                queue.clone(),
                Arc::downgrade(&inner),
                inner.shutdown.subscribe(),
            ));
        }

        info!(
            workers = self.config.workers,
            default_buffer = self.config.default_buffer,
            "Event bus started"
        );
        Ok(EventBus { inner })
    }
}

impl fmt::Debug for EventBusBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBusBuilder")
            .field("config", &self.config)
            .field("panic_hook", &self.panic_hook.is_some())
            .field("id_generator", &self.id_generator.is_some())
            .finish()
    }
}

/// In-process publish/subscribe bus with synchronous and asynchronous delivery.
///
/// Cloning is cheap; all clones share the same subscribers and workers.
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Starts a bus with the default configuration.
    ///
    /// # Errors
    /// Returns [`EventBusError::RuntimeUnavailable`] outside a Tokio runtime.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    /// Registers an async function handler for `pattern`.
    ///
    /// Patterns are exact keys (`"order.shipped"`) or prefixes ending in `*`
    /// (`"order.*"`). Asynchronous subscribers get their consumer task immediately.
    ///
    /// # Examples
    /// ```rust
    /// use herald_events::{Event, EventBus, EventOptions};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), herald_events::EventBusError> {
    /// let bus = EventBus::new()?;
    /// let id = bus.subscribe_fn(
    ///     "order.*",
    ///     |event| async move {
    ///         assert_eq!(event.key(), "order.created");
    ///         Ok(())
    ///     },
    ///     EventOptions::synchronous(),
    /// );
    /// bus.publish(Event::new("order.created", b"{}".to_vec())).await?;
    /// assert!(bus.unsubscribe(&id));
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe_fn<F, Fut>(
        &self,
        pattern: impl Into<String>,
        handler: F,
        options: EventOptions,
    ) -> SubscriptionId
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(pattern.into(), handler::from_fn(handler), options)
    }

    /// Registers an object handler for `pattern`; see [`EventBus::subscribe_fn`].
    pub fn subscribe<H: EventHandler>(
        &self,
        pattern: impl Into<String>,
        handler: H,
        options: EventOptions,
    ) -> SubscriptionId {
        self.register(pattern.into(), handler::from_handler(handler), options)
    }

    /// Removes a subscription. Returns `false` if the id is unknown.
    ///
    /// No publish that starts after this returns will reach the subscriber.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    /// Publishes an event.
    ///
    /// Synchronous subscribers run on the caller's task in descending priority.
    /// The first failing synchronous handler aborts the publish: its error is
    /// returned, lower-priority synchronous subscribers are skipped, and nothing
    /// is queued for asynchronous subscribers. Otherwise, if any asynchronous
    /// subscriber matches, one job is queued with the highest matching priority.
    ///
    /// # Errors
    /// Returns [`EventBusError::Handler`] or [`EventBusError::HandlerPanic`] from
    /// the first failing synchronous handler.
    pub async fn publish(&self, event: impl Into<Arc<Event>>) -> Result<()> {
        let event = event.into();
        let subscribers = self.inner.resolve(event.key());
        if subscribers.is_empty() {
            trace!(key = event.key(), event_id = event.id(), "No subscribers for event");
            return Ok(());
        }

        let mut has_async = false;
        for sub in &subscribers {
            if sub.is_async() {
                has_async = true;
                continue;
            }
            if !sub.claim() {
                continue;
            }
            if let Err(err) = self.inner.invoke(sub, &event).await {
                sub.release();
                error!(
                    subscription = %sub.id,
                    pattern = %sub.raw_pattern,
                    key = event.key(),
                    event_id = event.id(),
                    error = %err,
                    "Event handler failed"
                );
                return Err(err);
            }
            if sub.options.once {
                self.inner.unsubscribe(&sub.id);
            }
        }

        if has_async {
            let priority =
                subscribers.iter().map(|sub| sub.options.priority).max().unwrap_or_default();
            let queued = self.inner.queue.push(Job::new(event.clone(), priority));
            if queued {
                trace!(key = event.key(), event_id = event.id(), priority, "Async job queued");
            } else {
                trace!(key = event.key(), event_id = event.id(), "Bus closed; async delivery skipped");
            }
        }

        Ok(())
    }

    /// Stops the bus and waits up to `timeout` for workers and consumers to finish.
    ///
    /// New publishes stop reaching asynchronous subscribers. Workers drain the
    /// jobs already queued, while consumers stop at the shutdown signal. In-flight
    /// handlers are never interrupted; if they outlive the timeout the remaining
    /// tasks are detached and keep winding down in the background.
    ///
    /// # Errors
    /// Returns [`EventBusError::ShutdownTimeout`] if the tasks did not finish in time.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        let pending = self.inner.signal_shutdown();
        let tasks = self.inner.tasks.lock().take();
        let Some(mut tasks) = tasks else {
            debug!("Event bus already closed");
            return Ok(());
        };

        debug!(tasks = tasks.len(), pending, ?timeout, "Closing event bus");
        let drained = tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_ok() {
            info!("Event bus closed");
            return Ok(());
        }

        let remaining = tasks.len();
        tasks.detach_all();
        warn!(remaining, ?timeout, "Event bus close timed out; detaching remaining tasks");
        Err(EventBusError::ShutdownTimeout {
            message: format!("{remaining} task(s) still running after {timeout:?}").into(),
            context: None,
        })
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.read().subscribers.len()
    }

    /// `true` once [`EventBus::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    fn register(&self, pattern: String, handler: HandlerFn, options: EventOptions) -> SubscriptionId {
        let options = options.with_default_buffer(self.inner.default_buffer);
        let id = SubscriptionId::new((self.inner.id_generator)());

        let sub = {
            let mut registry = self.inner.registry.write();
            let seq = registry.next_seq;
            registry.next_seq += 1;
            let sub = Arc::new(Subscriber::new(id.clone(), pattern, handler, options, seq));
            registry.patterns.entry(sub.pattern.clone()).or_default().push(id.clone());
            registry.subscribers.insert(id.clone(), sub.clone());
            sub
        };

        debug!(
            subscription = %id,
            pattern = %sub.raw_pattern,
            async_delivery = options.async_delivery,
            priority = options.priority,
            once = options.once,
            "Subscribed"
        );

        if sub.is_async() {
            self.inner.spawn(subscriber::consume(
                sub,
                Arc::downgrade(&self.inner),
                self.inner.shutdown.subscribe(),
            ));
        }
        id
    }
}

fn validate_config(config: &BusConfig) -> Result<()> {
    if config.workers == 0 {
        return Err(EventBusError::InvalidConfiguration {
            message: "workers must be greater than zero".into(),
            context: None,
        });
    }
    if config.default_buffer == 0 {
        return Err(EventBusError::InvalidConfiguration {
            message: "default_buffer must be greater than zero".into(),
            context: None,
        });
    }
    Ok(())
}
