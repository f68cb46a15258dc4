use std::borrow::Cow;

/// Boxed error returned by subscriber handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A specialized `Result` type for event bus operations.
pub type Result<T, E = EventBusError> = std::result::Result<T, E>;

/// Errors that can occur during event bus operations.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// A handler returned an error while processing an event.
    #[error("Handler failed for subscription {subscription}{}: {source}", format_context(.context))]
    Handler {
        subscription: Cow<'static, str>,
        #[source]
        source: HandlerError,
        context: Option<Cow<'static, str>>,
    },

    /// A handler panicked; the panic was recovered and reported to the panic hook.
    #[error("Handler panic in subscription {subscription}{}: {message}", format_context(.context))]
    HandlerPanic {
        subscription: Cow<'static, str>,
        message: Cow<'static, str>,
        context: Option<Cow<'static, str>>,
    },

    /// Background tasks did not finish before the close deadline.
    #[error("Event bus close timeout{}: {message}", format_context(.context))]
    ShutdownTimeout { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Event payload could not be serialized.
    #[error("Event encode error{}: {source}", format_context(.context))]
    Encode { source: serde_json::Error, context: Option<Cow<'static, str>> },

    /// Event payload could not be deserialized into the requested type.
    #[error("Event decode error{}: {source}", format_context(.context))]
    Decode { source: serde_json::Error, context: Option<Cow<'static, str>> },

    /// The bus was built outside of a Tokio runtime.
    #[error("Tokio runtime unavailable{}: {message}", format_context(.context))]
    RuntimeUnavailable { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Builder or configuration values were rejected.
    #[error("Invalid event bus configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

/// Adds human-readable context to fallible event bus results.
pub trait EventBusErrorExt<T> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T>;
}

impl<T> EventBusErrorExt<T> for Result<T> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        self.map_err(|mut e| {
            match &mut e {
                EventBusError::Handler { context: c, .. }
                | EventBusError::HandlerPanic { context: c, .. }
                | EventBusError::ShutdownTimeout { context: c, .. }
                | EventBusError::Encode { context: c, .. }
                | EventBusError::Decode { context: c, .. }
                | EventBusError::RuntimeUnavailable { context: c, .. }
                | EventBusError::InvalidConfiguration { context: c, .. } => {
                    *c = Some(context.into());
                },
            }
            e
        })
    }
}

impl EventBusError {
    /// Returns `true` for errors raised by a subscriber handler (returned or panicked).
    #[must_use]
    pub const fn is_handler_failure(&self) -> bool {
        matches!(self, Self::Handler { .. } | Self::HandlerPanic { .. })
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
