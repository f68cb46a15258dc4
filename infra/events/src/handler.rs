use crate::error::{EventBusError, HandlerError, Result};
use crate::event::Event;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

/// The single handler shape the bus stores: an async function of the event.
pub(crate) type HandlerFn =
    Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Callback invoked when a handler panics.
pub type PanicHook = Arc<dyn Fn(&PanicReport<'_>) + Send + Sync>;

/// Object-style subscriber.
///
/// # Examples
/// ```rust
/// use herald_events::{Event, EventHandler, HandlerError};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct Counter(AtomicUsize);
///
/// impl EventHandler for Counter {
///     async fn handle(&self, _event: Arc<Event>) -> Result<(), HandlerError> {
///         self.0.fetch_add(1, Ordering::Relaxed);
///         Ok(())
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: Arc<Event>) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

pub(crate) fn from_fn<F, Fut>(handler: F) -> HandlerFn
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |event| handler(event).boxed())
}

pub(crate) fn from_handler<H: EventHandler>(handler: H) -> HandlerFn {
    let handler = Arc::new(handler);
    Arc::new(move |event| {
        let handler = handler.clone();
        async move { handler.handle(event).await }.boxed()
    })
}

/// Everything known about a recovered handler panic.
pub struct PanicReport<'a> {
    pub subscription: &'a str,
    pub pattern: &'a str,
    pub event: &'a Event,
    pub payload: &'a (dyn Any + Send),
    /// Captured where the panic was caught, after unwinding. It shows the
    /// dispatch path (`invoke` and its caller), not the handler's panic site.
    pub backtrace: &'a Backtrace,
}

impl PanicReport<'_> {
    /// Best-effort text of the panic payload.
    #[must_use]
    pub fn message(&self) -> Cow<'static, str> {
        panic_message(self.payload)
    }
}

impl fmt::Debug for PanicReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicReport")
            .field("subscription", &self.subscription)
            .field("pattern", &self.pattern)
            .field("event_id", &self.event.id())
            .field("message", &self.message())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Cow<'static, str> {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        Cow::Borrowed(msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        Cow::Owned(msg.clone())
    } else {
        Cow::Borrowed("unknown panic")
    }
}

pub(crate) fn log_panic(report: &PanicReport<'_>) {
    error!(
        subscription = report.subscription,
        pattern = report.pattern,
        key = report.event.key(),
        event_id = report.event.id(),
        panic = %report.message(),
        backtrace = %report.backtrace,
        "Event handler panicked"
    );
}

/// Runs a handler with panic isolation, turning both failures and panics into errors.
pub(crate) async fn invoke(
    handler: &HandlerFn,
    subscription: &str,
    pattern: &str,
    event: &Arc<Event>,
    hook: Option<&PanicHook>,
) -> Result<()> {
    let call = AssertUnwindSafe(async { handler(event.clone()).await }).catch_unwind().await;

    match call {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(EventBusError::Handler {
            subscription: Cow::Owned(subscription.to_owned()),
            source,
            context: None,
        }),
        Err(payload) => {
            let backtrace = Backtrace::force_capture();
            let report = PanicReport {
                subscription,
                pattern,
                event,
                payload: payload.as_ref(),
                backtrace: &backtrace,
            };
            match hook {
                Some(hook) => hook(&report),
                None => log_panic(&report),
            }
            Err(EventBusError::HandlerPanic {
                subscription: Cow::Owned(subscription.to_owned()),
                message: report.message(),
                context: None,
            })
        },
    }
}
