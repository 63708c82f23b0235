use std::{collections::HashMap, sync::Arc};

use crate::connection::{Connection, ConnectionId};

/// Membership set of the hub: connection identity -> live connection.
///
/// Not synchronised. The hub worker is the only owner and mutates it
/// from its event loop.
#[derive(Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, Arc<dyn Connection>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `connection` under its identity. A connection already stored
    /// under the same identity is replaced and returned.
    pub fn register(&mut self, connection: Arc<dyn Connection>) -> Option<Arc<dyn Connection>> {
        self.connections.insert(connection.id().clone(), connection)
    }

    /// Removes `connection` if it is still the handle stored under its
    /// identity. A handle that was since replaced leaves the replacement in
    /// place and returns `false`.
    pub fn deregister(&mut self, connection: &Arc<dyn Connection>) -> bool {
        let id = connection.id();
        match self.connections.get(id) {
            Some(stored) if same_connection(stored, connection) => {
                self.connections.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Removes the entry for `id` and hands back the connection.
    pub fn take(&mut self, id: &ConnectionId) -> Option<Arc<dyn Connection>> {
        self.connections.remove(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Handles to every current member, for one fan-out pass.
    pub fn snapshot(&self) -> Vec<Arc<dyn Connection>> {
        self.connections.values().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<Arc<dyn Connection>> {
        self.connections.drain().map(|(_, connection)| connection).collect()
    }
}

fn same_connection(a: &Arc<dyn Connection>, b: &Arc<dyn Connection>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
