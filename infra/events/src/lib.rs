//! # Event Bus
//!
//! An in-process publish/subscribe bus with two delivery modes.
//!
//! ## Overview
//!
//! Subscribers register a handler for a *pattern*: an exact routing key
//! (`"order.shipped"`) or a prefix ending in `*` (`"order.*"`).
//!
//! * **Synchronous** subscribers run inline in [`EventBus::publish`], on the
//!   caller's task, in descending priority order. The first failing handler
//!   aborts the publish and its error is returned.
//! * **Asynchronous** subscribers each own a bounded inbox and a consumer task.
//!   A publish queues one job on a shared priority queue; a pool of dispatch
//!   workers fans it out to the inboxes, applying each subscriber's
//!   [`DropPolicy`] when an inbox is full.
//!
//! Handler panics are caught, reported to the panic hook (or logged), and
//! turned into [`EventBusError::HandlerPanic`]. [`EventBus::close`] stops the
//! workers and consumers, waiting up to a deadline.
//!
//! ## Features
//!
//! * **Priorities**: ordering for synchronous handlers, queue priority for async jobs.
//! * **Backpressure**: `Block`, `DropNewest` or `DropOldest` per subscriber.
//! * **Once**: subscriptions that remove themselves after the first event.
//! * **Isolation**: a panicking handler never takes down a worker or the caller.
//! * **Fast registry**: `FxHashMap` + `parking_lot::RwLock`, no lock held across `.await`.
//!
//! # Example
//!
//! ```rust
//! use herald_events::{Event, EventBus, EventBusError, EventOptions, HandlerError};
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Shipped { order_id: u64 }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EventBusError> {
//!     let bus = EventBus::builder().workers(2).build()?;
//!
//!     bus.subscribe_fn(
//!         "order.*",
//!         |event| async move {
//!             let shipped: Shipped = event.decode()?;
//!             assert_eq!(shipped.order_id, 42);
//!             Ok::<_, HandlerError>(())
//!         },
//!         EventOptions::asynchronous().buffer(64),
//!     );
//!
//!     bus.publish(Event::json("order.shipped", &Shipped { order_id: 42 })?).await?;
//!     bus.close(Duration::from_secs(1)).await
//! }
//! ```

mod bus;
mod error;
mod event;
mod handler;
mod options;
mod pattern;
mod queue;
mod subscriber;
mod worker;

pub use bus::{EventBus, EventBusBuilder, IdGenerator};
pub use error::{EventBusError, EventBusErrorExt, HandlerError, Result};
pub use event::Event;
pub use handler::{EventHandler, PanicHook, PanicReport};
pub use options::{BusConfig, DEFAULT_BUFFER, DEFAULT_WORKERS, DropPolicy, EventOptions};
pub use pattern::Pattern;
pub use subscriber::SubscriptionId;
