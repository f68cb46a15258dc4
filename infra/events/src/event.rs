use crate::error::{EventBusError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::sync::Arc;

/// An immutable, routable message carried by the [`EventBus`](crate::EventBus).
///
/// The bus only looks at [`Event::key`]; the payload is opaque bytes that
/// publishers and handlers agree on (JSON via [`Event::json`] / [`Event::decode`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    key: Cow<'static, str>,
    payload: Arc<[u8]>,
    id: String,
    at: DateTime<Utc>,
}

impl Event {
    /// Creates an event with a raw payload, a fresh id and the current time.
    ///
    /// # Examples
    /// ```rust
    /// use herald_events::Event;
    ///
    /// let event = Event::new("user.created", b"42".to_vec());
    /// assert_eq!(event.key(), "user.created");
    /// assert_eq!(event.payload(), b"42");
    /// ```
    pub fn new(key: impl Into<Cow<'static, str>>, payload: impl Into<Arc<[u8]>>) -> Self {
        Self::from_parts(key, payload, nanoid::nanoid!(), Utc::now())
    }

    /// Creates an event from fully specified parts.
    ///
    /// Use this when ids or timestamps come from an external source
    /// (replays, deterministic tests).
    pub fn from_parts(
        key: impl Into<Cow<'static, str>>,
        payload: impl Into<Arc<[u8]>>,
        id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self { key: key.into(), payload: payload.into(), id: id.into(), at }
    }

    /// Serializes `data` as JSON and wraps it in a new event.
    ///
    /// # Errors
    /// Returns [`EventBusError::Encode`] if `data` cannot be serialized.
    ///
    /// # Examples
    /// ```rust
    /// use herald_events::Event;
    /// use serde::{Deserialize, Serialize};
    ///
    /// #[derive(Serialize, Deserialize, Debug, PartialEq)]
    /// struct Shipped { order_id: u64 }
    ///
    /// # fn main() -> Result<(), herald_events::EventBusError> {
    /// let event = Event::json("order.shipped", &Shipped { order_id: 7 })?;
    /// assert_eq!(event.decode::<Shipped>()?, Shipped { order_id: 7 });
    /// # Ok(())
    /// # }
    /// ```
    pub fn json<T: Serialize + ?Sized>(
        key: impl Into<Cow<'static, str>>,
        data: &T,
    ) -> Result<Self> {
        let key = key.into();
        let payload = serde_json::to_vec(data).map_err(|source| EventBusError::Encode {
            source,
            context: Some(Cow::Owned(format!("key '{key}'"))),
        })?;
        Ok(Self::new(key, payload))
    }

    /// Decodes the JSON payload into `T`.
    ///
    /// # Errors
    /// Returns [`EventBusError::Decode`] if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|source| EventBusError::Decode {
            source,
            context: Some(Cow::Owned(format!("event {} ({})", self.id, self.key))),
        })
    }

    /// Routing key matched against subscription patterns.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn at(&self) -> DateTime<Utc> {
        self.at
    }
}
