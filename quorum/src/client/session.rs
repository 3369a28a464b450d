//! `Session` is the main object used in the engine.\
//! It executes statements against a cluster, using connections of a [`ConnectionPool`].

use std::sync::Arc;

use tracing::trace;

use super::execution_profile::ExecutionProfileHandle;
use super::request_handler::RequestHandler;
use crate::cluster::{Cluster, ClusterState};
use crate::errors::ExecutionError;
use crate::network::ConnectionPool;
#[cfg(feature = "metrics")]
use crate::observability::metrics::Metrics;
use crate::observability::ObserverNotifier;
use crate::response::QueryResponse;
use crate::statement::Statement;

/// `Session` manages execution of requests on a cluster.
///
/// It is created by [`SessionBuilder`](super::session_builder::SessionBuilder).
/// A session is meant to be shared: every method takes `&self`,
/// and any number of requests may run on it concurrently.
pub struct Session {
    pub(crate) cluster: Arc<Cluster>,
    pub(crate) pool: Arc<dyn ConnectionPool>,
    pub(crate) default_execution_profile_handle: ExecutionProfileHandle,
    pub(crate) notifier: ObserverNotifier,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Arc<Metrics>,
}

/// Prints the number of known nodes instead of the nodes themselves.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("Session");
        d.field("known_nodes", &self.cluster.get_state().get_nodes_info().len())
            .field("pool", &self.pool)
            .field(
                "default_execution_profile_handle",
                &self.default_execution_profile_handle,
            )
            .field("notifier", &self.notifier);
        #[cfg(feature = "metrics")]
        d.field("metrics", &self.metrics);
        d.finish()
    }
}

impl Session {
    /// Executes a statement.
    ///
    /// The settings of the statement take precedence over its execution profile,
    /// which in turn defaults to the session's default profile.
    ///
    /// The request is sent to nodes picked by the load balancing policy, retried
    /// according to the retry policy and, if the statement is idempotent, executed
    /// speculatively on further nodes according to the speculative execution policy.
    /// Exactly one outcome is returned and reported to the observers, no matter
    /// how many attempts were made.
    ///
    /// # Example
    /// ```rust
    /// # use quorum::Session;
    /// # use std::error::Error;
    /// # async fn check_only_compiles(session: &Session) -> Result<(), Box<dyn Error>> {
    /// use quorum::statement::{Consistency, Statement};
    ///
    /// let mut statement = Statement::new("SELECT a, b FROM ks.tab");
    /// statement.set_consistency(Consistency::One);
    /// statement.set_is_idempotent(true);
    ///
    /// let response = session.execute(&statement).await?;
    /// println!("Served by {}", response.coordinator.node());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute(&self, statement: &Statement) -> Result<QueryResponse, ExecutionError> {
        let profile = statement
            .get_execution_profile_handle()
            .unwrap_or(&self.default_execution_profile_handle)
            .access();
        trace!(statement = %statement.contents, "Executing statement");

        RequestHandler {
            statement,
            profile,
            cluster_state: self.cluster.get_state(),
            pool: &self.pool,
            notifier: &self.notifier,
            #[cfg(feature = "metrics")]
            metrics: &self.metrics,
        }
        .execute()
        .await
    }

    /// Access the cluster whose nodes the session sends requests to.
    ///
    /// Peers may be updated through it at any time.
    pub fn get_cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// Current snapshot of the cluster.
    pub fn get_cluster_state(&self) -> Arc<ClusterState> {
        self.cluster.get_state()
    }

    /// Access metrics collected by the session.
    #[cfg(feature = "metrics")]
    pub fn get_metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Retrieves the handle to execution profile that is used by this session
    /// by default, i.e. when an executed statement does not define its own handle.
    pub fn get_default_execution_profile_handle(&self) -> &ExecutionProfileHandle {
        &self.default_execution_profile_handle
    }
}
