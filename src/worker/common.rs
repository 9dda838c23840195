use hash_hasher::HashedMap;
use nohash_hasher::IntMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use uuid::Uuid;

type NotificationCallback<V> = Arc<dyn Fn(V) + Send + Sync>;

struct TargetCallbacks<V> {
    next_index: u32,
    callbacks: IntMap<u32, NotificationCallback<V>>,
}

impl<V> Default for TargetCallbacks<V> {
    fn default() -> Self {
        Self {
            next_index: 0,
            callbacks: IntMap::default(),
        }
    }
}

/// Notification subscribers keyed by the entity the engine addresses notifications to.
pub(super) struct SubscriptionTable<V: Clone + 'static> {
    targets: Arc<Mutex<HashedMap<SubscriptionTarget, TargetCallbacks<V>>>>,
}

impl<V: Clone + 'static> Clone for SubscriptionTable<V> {
    fn clone(&self) -> Self {
        Self {
            targets: Arc::clone(&self.targets),
        }
    }
}

impl<V: Clone + 'static> Default for SubscriptionTable<V> {
    fn default() -> Self {
        Self {
            targets: Arc::default(),
        }
    }
}

impl<V: Clone + 'static> SubscriptionTable<V> {
    pub(super) fn add(
        &self,
        target: SubscriptionTarget,
        callback: NotificationCallback<V>,
    ) -> SubscriptionHandler {
        let index = {
            let mut targets = self.targets.lock();
            let target_callbacks = targets.entry(target).or_default();
            let index = target_callbacks.next_index;
            target_callbacks.next_index = target_callbacks.next_index.wrapping_add(1);
            target_callbacks.callbacks.insert(index, callback);
            index
        };

        let targets_weak: Weak<Mutex<HashedMap<SubscriptionTarget, TargetCallbacks<V>>>> =
            Arc::downgrade(&self.targets);

        SubscriptionHandler {
            remove_callback: Some(Box::new(move || {
                if let Some(targets) = targets_weak.upgrade() {
                    // Callback may own the last reference to an entity that owns another
                    // subscription handler, so it must only be dropped with the lock released
                    let removed_callback = {
                        let mut targets = targets.lock();
                        let removed_callback = targets
                            .get_mut(&target)
                            .and_then(|target_callbacks| target_callbacks.callbacks.remove(&index));
                        if targets
                            .get(&target)
                            .map_or(false, |target_callbacks| target_callbacks.callbacks.is_empty())
                        {
                            targets.remove(&target);
                        }
                        removed_callback
                    };
                    drop(removed_callback);
                }
            })),
        }
    }

    /// Returns `false` if nobody listens to notifications of this target.
    pub(super) fn dispatch(&self, target: &SubscriptionTarget, value: V) -> bool {
        let callbacks = match self.targets.lock().get(target) {
            Some(target_callbacks) => target_callbacks
                .callbacks
                .values()
                .cloned()
                .collect::<Vec<_>>(),
            None => return false,
        };

        for callback in callbacks {
            callback(value.clone());
        }

        true
    }

    pub(super) fn clear(&self) {
        let targets = std::mem::take(&mut *self.targets.lock());
        drop(targets);
    }
}

/// Entity the engine addresses notifications to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SubscriptionTarget {
    /// Entity identified by UUID
    Uuid(Uuid),
}

/// Subscription handler, will remove corresponding subscription when dropped
pub(crate) struct SubscriptionHandler {
    remove_callback: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Drop for SubscriptionHandler {
    fn drop(&mut self) {
        if let Some(remove_callback) = self.remove_callback.take() {
            remove_callback();
        }
    }
}
