use std::sync::Arc;

use async_trait::async_trait;

use super::Connection;
use crate::cluster::{Node, NodeRef};
use crate::errors::ConnectionPoolError;

/// Pool of connections shared by all requests of a session.
#[async_trait]
pub trait ConnectionPool: std::fmt::Debug + Send + Sync {
    /// Obtains a connection to the given node.
    async fn acquire(&self, node: NodeRef<'_>) -> Result<Arc<dyn Connection>, ConnectionPoolError>;

    /// Gives the connection back. Called exactly once per successful [`acquire`](Self::acquire).
    fn release(&self, node: NodeRef<'_>, connection: Arc<dyn Connection>);
}

/// A connection borrowed from a [`ConnectionPool`], given back when dropped.
///
/// Dropping happens on every exit path of an attempt: success, failure
/// and cancellation of the future holding the guard.
#[derive(Debug)]
pub struct PooledConnection {
    pool: Arc<dyn ConnectionPool>,
    node: Arc<Node>,
    connection: Arc<dyn Connection>,
}

impl PooledConnection {
    /// Acquires a connection to `node` from `pool`.
    pub async fn acquire(
        pool: &Arc<dyn ConnectionPool>,
        node: NodeRef<'_>,
    ) -> Result<Self, ConnectionPoolError> {
        let connection = pool.acquire(node).await?;
        Ok(PooledConnection {
            pool: Arc::clone(pool),
            node: Arc::clone(node),
            connection,
        })
    }

    /// The borrowed connection.
    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.release(&self.node, Arc::clone(&self.connection));
    }
}
