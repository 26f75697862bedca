//! Event Bus implementation.
//!
//! Provides the per-session EventBus struct. There is no global instance:
//! each session owns its bus and tears down its subscriptions on shutdown.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{EventKind, SessionEvent};

/// Subscription handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Filter to receive only specific event kinds
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Receive all events.
    #[default]
    All,
    /// Receive events matching any of these kinds.
    Kinds(Vec<EventKind>),
}

impl EventFilter {
    /// Check if an event matches this filter
    pub fn matches(&self, event: &SessionEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Kinds(kinds) => kinds.contains(&event.kind()),
        }
    }
}

impl From<EventKind> for EventFilter {
    fn from(kind: EventKind) -> Self {
        EventFilter::Kinds(vec![kind])
    }
}

/// Result returned by event handlers
pub type HandlerResult = anyhow::Result<()>;

/// Type alias for event handler functions
type EventHandler = Arc<dyn Fn(&SessionEvent) -> HandlerResult + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    handler: EventHandler,
}

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for broadcast.
    pub channel_capacity: usize,
    /// Whether to keep event history.
    pub enable_history: bool,
    /// Maximum number of events to retain in history.
    pub max_history_size: usize,
    /// How long to retain events in history.
    pub history_retention: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            enable_history: false,
            max_history_size: 1000,
            history_retention: Duration::from_secs(300),
        }
    }
}

/// Event with timestamp for history
#[derive(Debug, Clone)]
struct TimestampedEvent {
    event: SessionEvent,
    timestamp: Instant,
}

/// Event bus for session lifecycle and error notifications
///
/// Handlers run on the publishing thread, in registration order. A handler
/// that returns an error or panics does not stop dispatch to the remaining
/// handlers; the failure is logged and forwarded to the `Error` handlers.
pub struct EventBus {
    /// Broadcast channel sender
    sender: broadcast::Sender<SessionEvent>,
    /// Registered handlers, in registration order
    handlers: RwLock<Vec<Subscription>>,
    /// Event history (optional)
    history: RwLock<VecDeque<TimestampedEvent>>,
    /// Configuration
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new event bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            handlers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            config,
        }
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of handlers that were invoked. Handler failures
    /// never propagate to the caller.
    pub fn publish(&self, event: SessionEvent) -> usize {
        self.publish_inner(event, true)
    }

    fn publish_inner(&self, event: SessionEvent, forward_failures: bool) -> usize {
        tracing::debug!("Publishing {}", event.description());

        if self.config.enable_history {
            self.add_to_history(&event);
        }

        // Snapshot so handlers may subscribe or unsubscribe while we dispatch
        let matching: Vec<(SubscriptionId, EventHandler)> = self
            .handlers
            .read()
            .iter()
            .filter(|sub| sub.filter.matches(&event))
            .map(|sub| (sub.id, sub.handler.clone()))
            .collect();

        let mut failures = Vec::new();
        for (id, handler) in &matching {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Handler {} failed on {}: {:#}", id, event.kind(), e);
                    failures.push(format!("{}: {:#}", id, e));
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    tracing::error!("Handler {} panicked on {}: {}", id, event.kind(), reason);
                    failures.push(format!("{} panicked: {}", id, reason));
                }
            }
        }

        // Async receivers; no receivers is not an error
        let _ = self.sender.send(event.clone());

        if forward_failures && event.kind() != EventKind::Error {
            for failure in failures {
                self.publish_inner(SessionEvent::error("Event handler failed", failure), false);
            }
        }

        matching.len()
    }

    /// Subscribe a handler to one event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_filtered(kind.into(), handler)
    }

    /// Subscribe a handler to every event
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_filtered(EventFilter::All, handler)
    }

    /// Subscribe a handler with an explicit filter
    pub fn subscribe_filtered<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.handlers.write().push(Subscription {
            id,
            filter,
            handler: Arc::new(handler),
        });
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Get a receiver for manual event polling
    ///
    /// This is useful for async contexts where you want to receive events
    /// in a tokio task.
    pub fn receiver(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Unsubscribe from events
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|sub| sub.id != id);
        let removed = handlers.len() != before;
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Remove every registration
    pub fn unsubscribe_all(&self) {
        let mut handlers = self.handlers.write();
        if !handlers.is_empty() {
            tracing::debug!("Removing {} subscriptions", handlers.len());
        }
        handlers.clear();
    }

    /// Get the number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Get recent event history (if enabled)
    ///
    /// Returns events since the given instant, or all history if None.
    pub fn history(&self, since: Option<Instant>) -> Vec<SessionEvent> {
        if !self.config.enable_history {
            return Vec::new();
        }

        let history = self.history.read();
        match since {
            Some(since) => history
                .iter()
                .filter(|e| e.timestamp >= since)
                .map(|e| e.event.clone())
                .collect(),
            None => history.iter().map(|e| e.event.clone()).collect(),
        }
    }

    /// Clear event history
    pub fn clear_history(&self) {
        self.history.write().clear();
    }

    /// Get the current configuration
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Add an event to history, maintaining size and age limits
    fn add_to_history(&self, event: &SessionEvent) {
        let mut history = self.history.write();
        let now = Instant::now();

        history.push_back(TimestampedEvent {
            event: event.clone(),
            timestamp: now,
        });

        let retention = self.config.history_retention;
        while history
            .front()
            .is_some_and(|e| now.duration_since(e.timestamp) > retention)
        {
            history.pop_front();
        }

        while history.len() > self.config.max_history_size {
            history.pop_front();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("config", &self.config)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
