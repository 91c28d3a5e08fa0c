//! Per-user push channels.
//!
//! A user may hold several live connections (browser tabs, devices). Each
//! connection registers an unbounded sender under the user's id; sending to
//! a user fans the text out to every live connection. Nothing is queued for
//! users without a connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

type Connections = HashMap<u64, mpsc::UnboundedSender<String>>;

/// A registered connection: its id and the receiving end of its channel.
#[derive(Debug)]
pub struct UserConnection {
    /// Id to pass to [`UserChannels::unregister`].
    pub id: u64,
    /// Messages addressed to the user.
    pub receiver: mpsc::UnboundedReceiver<String>,
}

/// Registry of live user channels.
#[derive(Debug, Default)]
pub struct UserChannels {
    users: RwLock<HashMap<Uuid, Connections>>,
    next_id: AtomicU64,
}

impl UserChannels {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for `user`.
    pub fn register(&self, user: Uuid) -> UserConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user)
            .or_default()
            .insert(id, sender);

        tracing::debug!(user_id = %user, connection_id = id, "User channel registered");
        UserConnection { id, receiver }
    }

    /// Remove a connection. Removing an unknown connection is a no-op.
    pub fn unregister(&self, user: Uuid, id: u64) {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(connections) = users.get_mut(&user) {
            connections.remove(&id);
            if connections.is_empty() {
                users.remove(&user);
            }
        }
        tracing::debug!(user_id = %user, connection_id = id, "User channel unregistered");
    }

    /// Send `text` to every live connection of `user`.
    ///
    /// Returns how many connections accepted the message; connections whose
    /// receiver has gone away are pruned.
    pub fn send(&self, user: Uuid, text: &str) -> usize {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let Some(connections) = users.get_mut(&user) else {
            return 0;
        };

        connections.retain(|_, sender| sender.send(text.to_string()).is_ok());
        let delivered = connections.len();
        if connections.is_empty() {
            users.remove(&user);
        }
        delivered
    }

    /// Number of live connections held by `user`.
    #[must_use]
    pub fn connection_count(&self, user: Uuid) -> usize {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .map_or(0, HashMap::len)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_reaches_every_connection_of_the_user() {
        let channels = UserChannels::new();
        let user = Uuid::new_v4();
        let mut tab = channels.register(user);
        let mut phone = channels.register(user);

        assert_eq!(channels.send(user, "hello"), 2);
        assert_eq!(tab.receiver.recv().await.unwrap(), "hello");
        assert_eq!(phone.receiver.recv().await.unwrap(), "hello");
    }

    #[test]
    fn send_to_user_without_connection_is_dropped() {
        let channels = UserChannels::new();
        let other = channels.register(Uuid::new_v4());

        assert_eq!(channels.send(Uuid::new_v4(), "lost"), 0);
        drop(other);
    }

    #[test]
    fn closed_receivers_are_pruned() {
        let channels = UserChannels::new();
        let user = Uuid::new_v4();
        let gone = channels.register(user);
        let _live = channels.register(user);
        drop(gone.receiver);

        assert_eq!(channels.send(user, "ping"), 1);
        assert_eq!(channels.connection_count(user), 1);
    }

    #[test]
    fn unregister_removes_connection() {
        let channels = UserChannels::new();
        let user = Uuid::new_v4();
        let connection = channels.register(user);

        channels.unregister(user, connection.id);
        channels.unregister(user, connection.id);

        assert_eq!(channels.connection_count(user), 0);
        assert_eq!(channels.send(user, "late"), 0);
    }
}
