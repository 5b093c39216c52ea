use std::collections::HashMap;

use super::{Connection, ConnectionId, ConnectionState};

/// One registered connection and its delivery bookkeeping.
pub struct Member {
    handle: Box<dyn Connection>,
    /// Version of the last frame successfully sent, `0` before the first.
    last_sent: u64,
}

impl Member {
    pub fn handle(&mut self) -> &mut dyn Connection {
        self.handle.as_mut()
    }

    pub fn last_sent(&self) -> u64 {
        self.last_sent
    }

    pub(crate) fn mark_sent(&mut self, version: u64) {
        self.last_sent = self.last_sent.max(version);
    }
}

/// Set of open connections, keyed by identity.
///
/// Owned by the dispatch thread and mutated only there, so it needs no
/// lock. A connection is a member exactly while the transport considers it
/// open: inserted on accept, removed on close or fatal send failure.
#[derive(Default)]
pub struct ConnectionRegistry {
    members: HashMap<ConnectionId, Member>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an accepted connection. Returns `false` (and leaves the
    /// registry untouched) if the id is already present.
    pub fn insert(&mut self, handle: Box<dyn Connection>) -> bool {
        let id = handle.id();
        if self.members.contains_key(&id) {
            tracing::warn!(conn = %id, "duplicate accept ignored");
            return false;
        }

        self.members.insert(
            id,
            Member {
                handle,
                last_sent: 0,
            },
        );
        tracing::debug!(conn = %id, total = self.members.len(), "connection registered");
        true
    }

    /// Remove a connection. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Box<dyn Connection>> {
        let removed = self.members.remove(&id).map(|m| m.handle);
        if removed.is_some() {
            tracing::debug!(conn = %id, total = self.members.len(), "connection unregistered");
        }
        removed
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Member> {
        self.members.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    /// Registered connections are `Open`; anything else is `Closed`.
    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        if self.contains(id) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.members.keys().copied().collect()
    }

    pub fn members_mut(&mut self) -> impl Iterator<Item = &mut Member> {
        self.members.values_mut()
    }

    /// Remove every member, yielding the handles.
    pub fn drain(&mut self) -> impl Iterator<Item = Box<dyn Connection>> + '_ {
        self.members.drain().map(|(_, m)| m.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::MockConnection;

    fn accept(registry: &mut ConnectionRegistry, raw: u64) -> bool {
        let (conn, _probe) = MockConnection::new(raw);
        registry.insert(Box::new(conn))
    }

    #[test]
    fn size_tracks_accepted_minus_closed() {
        let mut registry = ConnectionRegistry::new();
        for raw in 1..=10 {
            assert!(accept(&mut registry, raw));
        }
        for raw in [2, 4, 6] {
            assert!(registry.remove(ConnectionId::from(raw)).is_some());
        }
        assert_eq!(registry.len(), 7);
        assert_eq!(registry.state(ConnectionId::from(3)), ConnectionState::Open);
        assert_eq!(registry.state(ConnectionId::from(4)), ConnectionState::Closed);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut registry = ConnectionRegistry::new();
        assert!(accept(&mut registry, 1));
        assert!(!accept(&mut registry, 1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut registry = ConnectionRegistry::new();
        accept(&mut registry, 1);
        assert!(registry.remove(ConnectionId::from(99)).is_none());
        assert!(registry.remove(ConnectionId::from(1)).is_some());
        assert!(registry.remove(ConnectionId::from(1)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn mark_sent_never_goes_backwards() {
        let mut registry = ConnectionRegistry::new();
        accept(&mut registry, 1);
        let member = registry.get_mut(ConnectionId::from(1)).unwrap();
        member.mark_sent(5);
        member.mark_sent(3);
        assert_eq!(member.last_sent(), 5);
    }

    #[test]
    fn drain_empties_registry() {
        let mut registry = ConnectionRegistry::new();
        accept(&mut registry, 1);
        accept(&mut registry, 2);
        assert_eq!(registry.drain().count(), 2);
        assert!(registry.is_empty());
    }
}
