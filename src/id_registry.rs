//! Identifier allocation scoped to a single logical server instance.
//!
//! A [`Worker`](crate::worker::Worker) keeps one registry for its routers and WebRTC servers and
//! every [`Router`](crate::router::Router) keeps another one for everything created under it, so
//! that no two live entities in the same scope ever share an id.


use hash_hasher::HashedSet;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Supplied id is already used by a live entity in the same scope.
#[derive(Debug, Error, Eq, PartialEq)]
#[error("Id {0} is already in use")]
pub struct IdTakenError(pub Uuid);

/// Set of live ids, cheap to clone and share between entities of the same scope.
#[derive(Debug, Default, Clone)]
pub(crate) struct IdRegistry {
    ids: Arc<Mutex<HashedSet<Uuid>>>,
}

impl IdRegistry {
    /// Allocates a fresh id that is not in use in this registry yet.
    pub(crate) fn allocate<T: From<Uuid>>(&self) -> T {
        let mut ids = self.ids.lock();
        loop {
            let id = Uuid::new_v4();
            if ids.insert(id) {
                return T::from(id);
            }
        }
    }

    /// Reserves an id supplied by the caller.
    pub(crate) fn register<T: Into<Uuid>>(&self, id: T) -> Result<(), IdTakenError> {
        let id = id.into();
        if self.ids.lock().insert(id) {
            Ok(())
        } else {
            Err(IdTakenError(id))
        }
    }

    pub(crate) fn release<T: Into<Uuid>>(&self, id: T) {
        self.ids.lock().remove(&id.into());
    }

    #[cfg(test)]
    pub(crate) fn contains<T: Into<Uuid>>(&self, id: T) -> bool {
        self.ids.lock().contains(&id.into())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ids.lock().len()
    }
}
