//! Which connections belong to which online users.
//!
//! The registry is the only state shared by every connection handler. Both
//! maps live behind one mutex that is never held across an `.await` or a
//! store call.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

/// A user crossed the online/offline boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    Online(Uuid),
    Offline(Uuid),
}

#[derive(Default)]
struct PresenceMaps {
    by_user: HashMap<Uuid, HashSet<Uuid>>,
    by_connection: HashMap<Uuid, Uuid>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    maps: Mutex<PresenceMaps>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PresenceMaps> {
        // Every mutation leaves both maps consistent, so a poisoned guard is still usable.
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `connection_id` for `user_id`. Returns `Online` only for the
    /// user's first live connection.
    pub fn register(&self, user_id: Uuid, connection_id: Uuid) -> Option<PresenceChange> {
        let mut maps = self.lock();
        maps.by_connection.insert(connection_id, user_id);
        let conns = maps.by_user.entry(user_id).or_default();
        let was_offline = conns.is_empty();
        conns.insert(connection_id);
        was_offline.then_some(PresenceChange::Online(user_id))
    }

    /// Forget `connection_id`. Returns `Offline` only when it was the user's
    /// last live connection. Unknown connections are ignored.
    pub fn unregister(&self, connection_id: Uuid) -> Option<PresenceChange> {
        let mut maps = self.lock();
        let user_id = maps.by_connection.remove(&connection_id)?;
        let conns = maps.by_user.get_mut(&user_id)?;
        conns.remove(&connection_id);
        if conns.is_empty() {
            maps.by_user.remove(&user_id);
            Some(PresenceChange::Offline(user_id))
        } else {
            None
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.lock().by_user.get(&user_id).is_some_and(|c| !c.is_empty())
    }

    /// Snapshot of the user's connections at call time.
    pub fn connections_of(&self, user_id: Uuid) -> Vec<Uuid> {
        self.lock()
            .by_user
            .get(&user_id)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn online_users(&self) -> Vec<Uuid> {
        self.lock().by_user.keys().copied().collect()
    }
}
