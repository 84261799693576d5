//! Pattern-matching event bus
//!
//! In-process publish/subscribe used for connection-scoped and
//! namespace-scoped events. Handlers run sequentially in registration
//! order; a failing handler is logged and does not stop its siblings.

use super::Pattern;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Default soft limit of listeners per pattern
pub const DEFAULT_MAX_LISTENERS: usize = 100;

/// Upper bound on cached event name resolutions per bus
const MAX_RESOLVED: usize = 256;

/// Result returned by event handlers
pub type HandlerResult = anyhow::Result<()>;

type Handler<P> = Arc<dyn Fn(String, P) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Error type for event bus operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("Event bus has been disposed")]
    Disposed,
}

/// Identifier returned by [`EventBus::on`], used to remove the listener again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener<P> {
    id: ListenerId,
    pattern: Arc<Pattern>,
    handler: Handler<P>,
}

struct BusState<P> {
    /// Listeners in registration order
    listeners: Vec<Listener<P>>,
    /// Compiled matchers by raw pattern
    compiled: HashMap<String, Arc<Pattern>>,
    /// Non-empty handler lists by concrete event name, at most
    /// [`MAX_RESOLVED`] entries since clients choose the names
    resolved: HashMap<String, Arc<[Handler<P>]>>,
    next_id: u64,
    disposed: bool,
}

impl<P> BusState<P> {
    fn invalidate(&mut self) {
        self.resolved.clear();
    }

    fn prune_compiled(&mut self) {
        let listeners = &self.listeners;
        self.compiled
            .retain(|raw, _| listeners.iter().any(|l| l.pattern.as_str() == raw));
    }
}

/// Event bus with exact and wildcard pattern subscriptions
pub struct EventBus<P> {
    /// Label used in log output
    label: String,
    /// Soft per-pattern listener limit (warns, never rejects)
    max_listeners: usize,
    state: Mutex<BusState<P>>,
}

impl<P> EventBus<P>
where
    P: Clone + Send + 'static,
{
    /// Create a new event bus
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_max_listeners(label, DEFAULT_MAX_LISTENERS)
    }

    /// Create a new event bus with a custom listener limit
    #[must_use]
    pub fn with_max_listeners(label: impl Into<String>, max_listeners: usize) -> Self {
        Self {
            label: label.into(),
            max_listeners,
            state: Mutex::new(BusState {
                listeners: Vec::new(),
                compiled: HashMap::new(),
                resolved: HashMap::new(),
                next_id: 0,
                disposed: false,
            }),
        }
    }

    /// Register a handler for a pattern
    pub fn on<F, Fut>(&self, pattern: &str, handler: F) -> Result<ListenerId, BusError>
    where
        F: Fn(String, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler<P> =
            Arc::new(move |event: String, payload: P| -> BoxFuture<'static, HandlerResult> {
                Box::pin(handler(event, payload))
            });

        let mut state = self.state.lock();
        if state.disposed {
            return Err(BusError::Disposed);
        }

        let compiled = state
            .compiled
            .entry(pattern.to_string())
            .or_insert_with(|| Arc::new(Pattern::compile(pattern)))
            .clone();

        let existing = state
            .listeners
            .iter()
            .filter(|l| l.pattern.as_str() == pattern)
            .count();
        if existing >= self.max_listeners {
            tracing::warn!(
                bus = %self.label,
                pattern = %pattern,
                listeners = existing + 1,
                max_listeners = self.max_listeners,
                "Possible listener leak: listener limit exceeded"
            );
        }

        state.next_id += 1;
        let id = ListenerId(state.next_id);
        state.listeners.push(Listener {
            id,
            pattern: compiled,
            handler,
        });
        state.invalidate();

        Ok(id)
    }

    /// Remove a single handler
    ///
    /// Returns `false` if no such listener was registered for the pattern.
    pub fn off(&self, pattern: &str, id: ListenerId) -> Result<bool, BusError> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(BusError::Disposed);
        }

        let before = state.listeners.len();
        state
            .listeners
            .retain(|l| !(l.id == id && l.pattern.as_str() == pattern));
        let removed = state.listeners.len() != before;

        if removed {
            state.prune_compiled();
            state.invalidate();
        }

        Ok(removed)
    }

    /// Remove every handler of a pattern, or every handler when `pattern` is `None`
    pub fn remove_all(&self, pattern: Option<&str>) -> Result<usize, BusError> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(BusError::Disposed);
        }

        let before = state.listeners.len();
        match pattern {
            Some(pattern) => state.listeners.retain(|l| l.pattern.as_str() != pattern),
            None => state.listeners.clear(),
        }
        let removed = before - state.listeners.len();

        state.prune_compiled();
        state.invalidate();

        Ok(removed)
    }

    /// Emit an event to every matching handler
    ///
    /// Handlers are awaited one after the other. Returns the number of
    /// handlers invoked; zero matching handlers is not an error.
    pub async fn emit(&self, event: &str, payload: P) -> Result<usize, BusError> {
        let handlers = self.resolve(event)?;

        for handler in handlers.iter() {
            if let Err(e) = handler(event.to_string(), payload.clone()).await {
                tracing::error!(
                    bus = %self.label,
                    event = %event,
                    error = %e,
                    "Event handler failed"
                );
            }
        }

        Ok(handlers.len())
    }

    /// Check whether at least one handler matches an event
    pub fn has_listeners(&self, event: &str) -> Result<bool, BusError> {
        Ok(!self.resolve(event)?.is_empty())
    }

    /// Number of registered handlers, for one pattern or in total
    pub fn listener_count(&self, pattern: Option<&str>) -> Result<usize, BusError> {
        let state = self.state.lock();
        if state.disposed {
            return Err(BusError::Disposed);
        }

        Ok(match pattern {
            Some(pattern) => state
                .listeners
                .iter()
                .filter(|l| l.pattern.as_str() == pattern)
                .count(),
            None => state.listeners.len(),
        })
    }

    /// Dispose the bus; every later call fails with [`BusError::Disposed`]
    pub fn destroy(&self) -> Result<(), BusError> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(BusError::Disposed);
        }

        state.disposed = true;
        state.listeners.clear();
        state.compiled.clear();
        state.resolved.clear();

        tracing::trace!(bus = %self.label, "Event bus destroyed");
        Ok(())
    }

    /// Check if the bus has been disposed
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    fn resolve(&self, event: &str) -> Result<Arc<[Handler<P>]>, BusError> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(BusError::Disposed);
        }

        if let Some(handlers) = state.resolved.get(event) {
            return Ok(handlers.clone());
        }

        let handlers: Arc<[Handler<P>]> = state
            .listeners
            .iter()
            .filter(|l| l.pattern.matches(event))
            .map(|l| l.handler.clone())
            .collect();

        if !handlers.is_empty() {
            if state.resolved.len() >= MAX_RESOLVED {
                state.invalidate();
            }
            state.resolved.insert(event.to_string(), handlers.clone());
        }

        Ok(handlers)
    }
}

impl<P> std::fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventBus")
            .field("label", &self.label)
            .field("listeners", &state.listeners.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}
