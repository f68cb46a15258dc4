use serde::Deserialize;

/// Inbox capacity used when a subscription asks for `buffer = 0`.
pub const DEFAULT_BUFFER: usize = 256;

/// Number of dispatch workers started by default.
pub const DEFAULT_WORKERS: usize = 4;

/// What an asynchronous subscriber's inbox does when it is full.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Wait until the subscriber frees a slot.
    #[default]
    Block,
    /// Discard the incoming event for this subscriber.
    DropNewest,
    /// Evict the oldest queued event, then enqueue the incoming one.
    DropOldest,
}

/// Delivery options captured when subscribing.
///
/// # Examples
/// ```rust
/// use herald_events::{DropPolicy, EventOptions};
///
/// let opts = EventOptions::asynchronous().buffer(1).drop_policy(DropPolicy::DropOldest);
/// assert!(opts.async_delivery);
/// assert_eq!(opts.buffer, 1);
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EventOptions {
    /// `false` runs the handler inline in `publish`; `true` queues it for background delivery.
    #[serde(rename = "async")]
    pub async_delivery: bool,
    /// Inbox capacity for asynchronous subscribers; `0` means the bus default.
    pub buffer: usize,
    pub drop_policy: DropPolicy,
    /// Higher runs first; also raises the priority of the shared async job.
    pub priority: i32,
    /// Unsubscribe automatically after the first invocation.
    pub once: bool,
}

impl EventOptions {
    /// Inline delivery with default settings.
    #[must_use]
    pub fn synchronous() -> Self {
        Self::default()
    }

    /// Background delivery with default settings.
    #[must_use]
    pub fn asynchronous() -> Self {
        Self { async_delivery: true, ..Self::default() }
    }

    #[must_use]
    pub const fn buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    #[must_use]
    pub const fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    #[must_use]
    pub const fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    pub(crate) const fn with_default_buffer(mut self, default: usize) -> Self {
        if self.buffer == 0 {
            self.buffer = default;
        }
        self
    }
}

/// Bus-wide configuration, typically loaded from the application config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Size of the dispatch worker pool.
    pub workers: usize,
    /// Inbox capacity applied to subscriptions that do not set one.
    pub default_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { workers: DEFAULT_WORKERS, default_buffer: DEFAULT_BUFFER }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn zero_buffer_falls_back_to_default() {
        let opts = EventOptions::asynchronous().with_default_buffer(DEFAULT_BUFFER);
        assert_eq!(opts.buffer, 256);

        let opts = EventOptions::asynchronous().buffer(8).with_default_buffer(DEFAULT_BUFFER);
        assert_eq!(opts.buffer, 8);
    }

    #[test]
    fn options_deserialize_from_config() {
        let raw = json!({ "async": true, "buffer": 16, "drop_policy": "drop_oldest", "priority": -3 });
        let opts: EventOptions = serde_json::from_value(raw).expect("options deserialize");
        assert!(opts.async_delivery);
        assert_eq!(opts.buffer, 16);
        assert_eq!(opts.drop_policy, DropPolicy::DropOldest);
        assert_eq!(opts.priority, -3);
        assert!(!opts.once);
    }

    #[test]
    fn bus_config_defaults_are_sane() {
        let cfg: BusConfig = serde_json::from_value(json!({})).expect("config deserialize");
        assert_eq!(cfg, BusConfig::default());
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.default_buffer, 256);
    }
}
