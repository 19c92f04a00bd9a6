//! Central diagnostics bus.
//!
//! Admission runs three gates in order: the enabled flag, the category
//! allowlist, then per-category every-Nth sampling. Sampling counters only
//! advance for categories the allowlist admitted. Surviving events are
//! retained in a drop-oldest ring and delivered synchronously to every
//! subscriber in subscription order.
//!
//! The hub is owned by the loop thread; subscribers need not be `Send`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use telltale_core::{
    artifact, schema, CoreError, CoreResult, Event, EveryNth, HubConfig, Level, Metadata,
    RingBuffer, SharedEvent, Value,
};

/// Opaque subscription handle returned by [`Hub::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw numeric token
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

type Subscriber = Box<dyn FnMut(&SharedEvent)>;

/// Admission counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    /// Events offered while enabled
    pub offered: u64,
    /// Events retained and delivered
    pub admitted: u64,
    /// Events dropped by the allowlist
    pub filtered: u64,
    /// Events dropped by sampling
    pub sampled_out: u64,
}

/// `diag.snapshot.v1` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubSnapshot {
    /// Schema tag
    pub schema_version: String,
    /// Retained events, oldest first
    pub events: Vec<Event>,
}

/// The diagnostics event bus
pub struct Hub {
    enabled: bool,
    allowlist: HashSet<String>,
    default_sample_every: u32,
    category_sample_every: HashMap<String, u32>,
    samplers: HashMap<String, EveryNth>,
    buffer: RingBuffer<SharedEvent>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    stats: HubStats,
}

impl Hub {
    /// Build a hub from its configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero capacity or zero sampling rate
    pub fn new(config: &HubConfig) -> CoreResult<Self> {
        let mut hub = Self {
            enabled: config.enabled,
            allowlist: config.category_allowlist.iter().cloned().collect(),
            default_sample_every: 1,
            category_sample_every: HashMap::new(),
            samplers: HashMap::new(),
            buffer: RingBuffer::new(config.capacity)?,
            subscribers: Vec::new(),
            next_subscription: 1,
            stats: HubStats::default(),
        };
        hub.set_default_sample_every(config.default_sample_every)?;
        for (category, every) in &config.category_sample_every {
            hub.set_sample_every(category, *every)?;
        }
        Ok(hub)
    }

    /// Hub with default settings and the given capacity
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `capacity` is zero
    pub fn with_capacity(capacity: usize) -> CoreResult<Self> {
        Self::new(&HubConfig {
            capacity,
            ..HubConfig::default()
        })
    }

    /// Whether `emit*` records anything
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Toggle recording without touching call sites
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            tracing::debug!(enabled, "diagnostics hub toggled");
        }
        self.enabled = enabled;
    }

    /// Replace the category allowlist; empty admits every category
    pub fn set_allowlist<I, S>(&mut self, categories: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowlist = categories.into_iter().map(Into::into).collect();
        tracing::debug!(size = self.allowlist.len(), "allowlist replaced");
    }

    /// Set the sampling rate for one category; resets its counter
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `every` is zero
    pub fn set_sample_every(&mut self, category: &str, every: u32) -> CoreResult<()> {
        if every == 0 {
            return Err(CoreError::invalid_argument(
                format!("sample_every[{category}]"),
                "must be > 0",
            ));
        }
        self.category_sample_every.insert(category.to_string(), every);
        self.samplers.remove(category);
        Ok(())
    }

    /// Set the fallback sampling rate; resets every counter
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `every` is zero
    pub fn set_default_sample_every(&mut self, every: u32) -> CoreResult<()> {
        if every == 0 {
            return Err(CoreError::invalid_argument("default_sample_every", "must be > 0"));
        }
        self.default_sample_every = every;
        self.samplers.clear();
        Ok(())
    }

    /// Emit a value at `Info` level with no metadata
    pub fn emit<V: Into<Value>>(&mut self, tick: u64, category: &str, name: &str, value: V) -> bool {
        self.emit_with(tick, category, name, value, Level::Info, Metadata::new())
    }

    /// Emit with explicit level and metadata
    ///
    /// Returns whether the event was admitted. The event is only built once
    /// every gate has passed.
    pub fn emit_with<V: Into<Value>>(
        &mut self,
        tick: u64,
        category: &str,
        name: &str,
        value: V,
        level: Level,
        metadata: Metadata,
    ) -> bool {
        if !self.admit(category) {
            return false;
        }
        let event = Event::new(tick, category, name)
            .with_value(value)
            .with_level(level)
            .with_metadata(metadata);
        self.publish(Arc::new(event));
        true
    }

    /// Emit a prebuilt event
    pub fn emit_event(&mut self, event: Event) -> bool {
        if !self.admit(&event.category) {
            return false;
        }
        self.publish(Arc::new(event));
        true
    }

    fn admit(&mut self, category: &str) -> bool {
        if !self.enabled {
            return false;
        }
        self.stats.offered += 1;

        if !self.allowlist.is_empty() && !self.allowlist.contains(category) {
            self.stats.filtered += 1;
            return false;
        }

        let every = self
            .category_sample_every
            .get(category)
            .copied()
            .unwrap_or(self.default_sample_every);
        if every <= 1 {
            return true;
        }

        let admitted = match self.samplers.get_mut(category) {
            Some(sampler) => sampler.admit(),
            None => {
                let mut sampler = EveryNth::new(every);
                let admitted = sampler.admit();
                self.samplers.insert(category.to_string(), sampler);
                admitted
            }
        };
        if !admitted {
            self.stats.sampled_out += 1;
        }
        admitted
    }

    fn publish(&mut self, event: SharedEvent) {
        tracing::trace!(category = %event.category, name = %event.name, "event admitted");
        self.buffer.append(Arc::clone(&event));
        self.stats.admitted += 1;
        for (_, subscriber) in &mut self.subscribers {
            subscriber(&event);
        }
    }

    /// Register a callback for every admitted event
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&SharedEvent) + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        tracing::debug!(id = id.0, total = self.subscribers.len(), "subscriber added");
        id
    }

    /// Remove a subscriber; unknown or repeated ids are ignored
    ///
    /// Returns whether a subscriber was removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        let removed = self.subscribers.len() != before;
        if removed {
            tracing::debug!(id = id.0, "subscriber removed");
        }
        removed
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Point-in-time copy of retained events
    ///
    /// `category` and `name` are exact-match filters; `limit` keeps the most
    /// recent matches. Order is always oldest first.
    #[must_use]
    pub fn snapshot(
        &self,
        limit: Option<usize>,
        category: Option<&str>,
        name: Option<&str>,
    ) -> Vec<SharedEvent> {
        let mut matched: Vec<SharedEvent> = self
            .buffer
            .iter()
            .filter(|e| category.is_none_or(|c| e.category == c))
            .filter(|e| name.is_none_or(|n| e.name == n))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    /// Most recent `limit` events, unfiltered
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<SharedEvent> {
        self.buffer.snapshot(Some(limit))
    }

    /// Build the `diag.snapshot.v1` document
    #[must_use]
    pub fn snapshot_document(&self, limit: Option<usize>) -> HubSnapshot {
        HubSnapshot {
            schema_version: schema::SNAPSHOT.to_string(),
            events: self
                .snapshot(limit, None, None)
                .iter()
                .map(|e| Event::clone(e))
                .collect(),
        }
    }

    /// Write the snapshot document to `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn export_snapshot(&self, path: &Path, limit: Option<usize>) -> CoreResult<()> {
        let doc = self.snapshot_document(limit);
        artifact::write_json(path, &doc)?;
        tracing::info!(path = %path.display(), events = doc.events.len(), "hub snapshot written");
        Ok(())
    }

    /// Events currently retained
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Ring capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Admission counters
    #[must_use]
    pub const fn stats(&self) -> HubStats {
        self.stats
    }

    /// Drop retained events and sampling counters; subscribers stay
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.samplers.clear();
        self.stats = HubStats::default();
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("enabled", &self.enabled)
            .field("len", &self.buffer.len())
            .field("capacity", &self.buffer.capacity())
            .field("subscribers", &self.subscribers.len())
            .field("stats", &self.stats)
            .finish()
    }
}
