//! Membership registry: the set of live connections.
//!
//! The map lock is only ever held for a map operation, never across an
//! await. Broadcasts iterate a [`snapshot`](MembershipRegistry::snapshot),
//! so membership can change mid-broadcast without racing.

use std::collections::HashMap;
use std::sync::Arc;

use hubcast_core::{ConnectionId, ConnectionState, HubError, Result};
use parking_lot::RwLock;

use crate::connection::Connection;

/// Proof of registration, redeemed by [`MembershipRegistry::deregister`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationToken(ConnectionId);

impl RegistrationToken {
    pub(crate) fn new(id: ConnectionId) -> Self {
        Self(id)
    }

    /// The registered connection's id.
    pub fn id(&self) -> &ConnectionId {
        &self.0
    }
}

/// Live connections indexed by id.
#[derive(Default)]
pub struct MembershipRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl MembershipRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fully constructed connection and mark it open.
    ///
    /// Fails with [`HubError::RegistrationInconsistency`] if the id is
    /// already present; the existing member is left untouched.
    pub fn register(&self, connection: Arc<Connection>) -> Result<RegistrationToken> {
        let mut conns = self.connections.write();
        if conns.contains_key(&connection.id) {
            return Err(HubError::RegistrationInconsistency(connection.id.clone()));
        }
        let token = RegistrationToken::new(connection.id.clone());
        // Done under the write lock so every snapshot sees an open, complete member
        connection.set_registration(token.clone());
        let _ = connection.advance(ConnectionState::Open);
        let _ = conns.insert(connection.id.clone(), connection);
        Ok(token)
    }

    /// Remove the member named by `token`.
    ///
    /// Returns the removed connection the first time; later calls are no-ops.
    pub fn deregister(&self, token: &RegistrationToken) -> Option<Arc<Connection>> {
        self.connections.write().remove(&token.0)
    }

    /// Point-in-time copy of the members, safe to iterate while the
    /// registry mutates.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Look up a member.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Whether `id` is currently a member.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    /// Member count.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether there are no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
