//! Per-entity event publishing.
//!
//! Every entity embeds a hub for its public events, one behind its observer and, where a parent
//! needs to track it, a private one. Each wraps a set of typed [`event_listener_primitives`] bags
//! and is torn down exactly once when the entity closes, after which emitting is a silent no-op.
//! Engine notifications that race with a local close never reach listeners of a closed entity.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct EventHub<H> {
    handlers: H,
    torn_down: AtomicBool,
}

impl<H: Default> Default for EventHub<H> {
    fn default() -> Self {
        Self {
            handlers: H::default(),
            torn_down: AtomicBool::new(false),
        }
    }
}

impl<H> fmt::Debug for EventHub<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

impl<H> EventHub<H> {
    /// Handler set, used to subscribe.
    pub(crate) fn handlers(&self) -> &H {
        &self.handlers
    }

    /// Publishes through `emitter` unless the hub was torn down already. Returns whether anything
    /// was published.
    pub(crate) fn emit<F>(&self, emitter: F) -> bool
    where
        F: FnOnce(&H),
    {
        if self.torn_down.load(Ordering::SeqCst) {
            return false;
        }

        emitter(&self.handlers);

        true
    }

    /// Runs the final emission and marks the hub as torn down. Only the first call has any effect.
    pub(crate) fn tear_down<F>(&self, last_emitter: F) -> bool
    where
        F: FnOnce(&H),
    {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        last_emitter(&self.handlers);

        true
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}
