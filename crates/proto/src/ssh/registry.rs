//! Connection registry: one shared connection per (host, port, user).
//!
//! Editors open many remote files against the same account; the
//! registry hands out shared handles so they ride one connection.
//! Creation is lazy and teardown is explicit, never automatic.

use crate::ssh::client::SshClient;
use scribe_platform::ScribeResult;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Identity of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Account name.
    pub username: String,
}

impl ConnectionKey {
    /// Key for `username@host:port`.
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionKey, Arc<SshClient>>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live connection for `key`, if any.
    pub async fn get(&self, key: &ConnectionKey) -> Option<Arc<SshClient>> {
        self.connections.lock().await.get(key).cloned()
    }

    /// Returns the connection for `key`, establishing it with `connect`
    /// on first use. A failed connect caches nothing.
    pub async fn get_or_connect<F, Fut>(
        &self,
        key: ConnectionKey,
        connect: F,
    ) -> ScribeResult<Arc<SshClient>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ScribeResult<SshClient>>,
    {
        // The map lock is held across connect so two callers cannot
        // race to open the same connection twice.
        let mut connections = self.connections.lock().await;
        if let Some(client) = connections.get(&key) {
            debug!(%key, "reusing connection");
            return Ok(client.clone());
        }
        let client = Arc::new(connect().await?);
        info!(%key, "connection registered");
        connections.insert(key, client.clone());
        Ok(client)
    }

    /// Disconnects and removes the connection for `key`.
    pub async fn disconnect(&self, key: &ConnectionKey) -> ScribeResult<()> {
        let removed = self.connections.lock().await.remove(key);
        if let Some(client) = removed {
            info!(%key, "disconnecting");
            client.disconnect().await?;
        }
        Ok(())
    }

    /// Disconnects everything.
    pub async fn disconnect_all(&self) -> ScribeResult<()> {
        let drained: Vec<_> = self.connections.lock().await.drain().collect();
        for (key, client) in drained {
            info!(%key, "disconnecting");
            client.disconnect().await?;
        }
        Ok(())
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// True when no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::agent::NoAgent;
    use crate::ssh::auth::AuthRequest;
    use crate::ssh::client::{SshClient, SshClientConfig};
    use crate::ssh::message::MessageType;
    use crate::ssh::negotiator::NoPrompt;
    use crate::ssh::transport::{State, Transport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Builds a client whose peer accepts the "none" probe, keeping the
    /// server end alive so the connection stays up.
    async fn stub_client() -> (SshClient, Transport) {
        let (client_transport, mut server) = Transport::test_pair(State::Authenticating).await;
        let server_task = tokio::spawn(async move {
            let request = server.recv_payload().await.unwrap();
            assert_eq!(
                AuthRequest::from_bytes(&request).unwrap().method_name(),
                "none"
            );
            server
                .send_payload(&[MessageType::UserauthSuccess as u8])
                .await
                .unwrap();
            server
        });

        let config = SshClientConfig::default();
        let client = SshClient::from_transport(
            client_transport,
            "testhost",
            22,
            "alice",
            &config,
            &NoAgent,
            &NoPrompt,
        )
        .await
        .unwrap();
        (client, server_task.await.unwrap())
    }

    #[tokio::test]
    async fn test_lazy_creation_and_reuse() {
        let registry = ConnectionRegistry::new();
        let key = ConnectionKey::new("testhost", 22, "alice");
        assert!(registry.is_empty().await);

        let connects = AtomicUsize::new(0);
        let counter = &connects;
        let (client, _server) = stub_client().await;
        let first = registry
            .get_or_connect(key.clone(), || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(client)
            })
            .await
            .unwrap();

        let second = registry
            .get_or_connect(key.clone(), || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("must not connect again");
            })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_connect_caches_nothing() {
        let registry = ConnectionRegistry::new();
        let key = ConnectionKey::new("testhost", 22, "bob");

        let result = registry
            .get_or_connect(key.clone(), || async {
                Err(scribe_platform::ScribeError::Config(
                    "unreachable".to_string(),
                ))
            })
            .await;
        assert!(result.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_explicit_disconnect_removes_entry() {
        let registry = ConnectionRegistry::new();
        let key = ConnectionKey::new("testhost", 22, "alice");
        let (client, _server) = stub_client().await;
        registry
            .get_or_connect(key.clone(), || async move { Ok(client) })
            .await
            .unwrap();

        registry.disconnect(&key).await.unwrap();
        assert!(registry.get(&key).await.is_none());

        // Disconnecting an absent key is a no-op.
        registry.disconnect(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_distinct_users_get_distinct_connections() {
        let registry = ConnectionRegistry::new();
        let alice = ConnectionKey::new("testhost", 22, "alice");
        let bob = ConnectionKey::new("testhost", 22, "bob");

        let (client_a, _server_a) = stub_client().await;
        let (client_b, _server_b) = stub_client().await;
        let first = registry
            .get_or_connect(alice, || async move { Ok(client_a) })
            .await
            .unwrap();
        let second = registry
            .get_or_connect(bob, || async move { Ok(client_b) })
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 2);
    }
}
