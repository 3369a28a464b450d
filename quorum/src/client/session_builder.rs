//! SessionBuilder provides an easy way to create new Sessions

use std::sync::Arc;

use tracing::debug;

use super::execution_profile::{ExecutionProfile, ExecutionProfileHandle};
use super::session::Session;
use crate::cluster::{Cluster, Peer};
use crate::errors::NewSessionError;
use crate::network::ConnectionPool;
#[cfg(feature = "metrics")]
use crate::observability::metrics::Metrics;
use crate::observability::{CompositeObserver, ObserverNotifier, RequestObserver};

/// Configuration options for [`Session`].
/// Can be created manually, but usually it's easier to use
/// [SessionBuilder].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SessionConfig {
    /// Pool the session obtains connections from.
    pub pool: Arc<dyn ConnectionPool>,

    /// Cluster shared with other sessions or with topology discovery.
    /// Takes precedence over `known_peers`.
    pub cluster: Option<Arc<Cluster>>,

    /// Peers the session's own cluster consists of, used when `cluster` is not set.
    pub known_peers: Vec<Peer>,

    /// Profile used by statements that do not have their own.
    pub default_execution_profile_handle: ExecutionProfileHandle,

    /// Observers notified about every request of the session, in order.
    pub observers: Vec<Arc<dyn RequestObserver>>,
}

impl SessionConfig {
    /// Creates a [`SessionConfig`] with default configuration
    /// # Default configuration
    /// * No known peers
    /// * Default execution profile
    /// * No observers
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        SessionConfig {
            pool,
            cluster: None,
            known_peers: Vec::new(),
            default_execution_profile_handle: ExecutionProfile::default().into_handle(),
            observers: Vec::new(),
        }
    }
}

/// SessionBuilder is used to create new Session instances
/// # Example
///
/// ```
/// # use quorum::SessionBuilder;
/// # use quorum::cluster::Peer;
/// # use quorum::network::ConnectionPool;
/// # use quorum::observability::HistoryCollector;
/// # use std::sync::Arc;
/// # fn example(pool: Arc<dyn ConnectionPool>, peers: Vec<Peer>) -> Result<(), Box<dyn std::error::Error>> {
/// let history = Arc::new(HistoryCollector::new());
/// let session = SessionBuilder::new(pool)
///     .known_peers(peers)
///     .observer(history.clone())
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct SessionBuilder {
    /// Configuration to build the session from.
    pub config: SessionConfig,
}

impl SessionBuilder {
    /// Creates new SessionBuilder with default configuration,
    /// sending requests through connections of `pool`.
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        SessionBuilder {
            config: SessionConfig::new(pool),
        }
    }

    /// Adds a known peer.
    pub fn known_peer(mut self, peer: Peer) -> Self {
        self.config.known_peers.push(peer);
        self
    }

    /// Adds a list of known peers.
    pub fn known_peers(mut self, peers: impl IntoIterator<Item = Peer>) -> Self {
        self.config.known_peers.extend(peers);
        self
    }

    /// Makes the session use an existing [`Cluster`].
    /// Known peers are ignored then.
    pub fn cluster(mut self, cluster: Arc<Cluster>) -> Self {
        self.config.cluster = Some(cluster);
        self
    }

    /// Sets the execution profile used by statements that do not specify their own.
    ///
    /// # Example
    /// ```
    /// # use quorum::SessionBuilder;
    /// # use quorum::ExecutionProfile;
    /// # use quorum::network::ConnectionPool;
    /// # use quorum::statement::Consistency;
    /// # use std::sync::Arc;
    /// # fn example(pool: Arc<dyn ConnectionPool>) {
    /// let profile = ExecutionProfile::builder()
    ///     .consistency(Consistency::LocalOne)
    ///     .build();
    /// let builder = SessionBuilder::new(pool)
    ///     .default_execution_profile_handle(profile.into_handle());
    /// # }
    /// ```
    pub fn default_execution_profile_handle(
        mut self,
        profile_handle: ExecutionProfileHandle,
    ) -> Self {
        self.config.default_execution_profile_handle = profile_handle;
        self
    }

    /// Registers an observer of requests.
    /// Observers are notified in the order of registration.
    pub fn observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.config.observers.push(observer);
        self
    }

    /// Builds the Session after setting all the options.
    ///
    /// With the `metrics` feature, the session's [`Metrics`] are registered
    /// as the last observer.
    pub fn build(self) -> Result<Session, NewSessionError> {
        let SessionConfig {
            pool,
            cluster,
            known_peers,
            default_execution_profile_handle,
            mut observers,
        } = self.config;

        let cluster = match cluster {
            Some(cluster) => cluster,
            None if known_peers.is_empty() => return Err(NewSessionError::EmptyKnownNodesList),
            None => Arc::new(Cluster::new(known_peers)),
        };

        #[cfg(feature = "metrics")]
        let metrics = Arc::new(Metrics::new()?);
        #[cfg(feature = "metrics")]
        observers.push(metrics.clone());

        debug!(
            nodes = cluster.get_state().get_nodes_info().len(),
            observers = observers.len(),
            "Building session"
        );
        let observer: Option<Arc<dyn RequestObserver>> = match observers.len() {
            0 => None,
            1 => observers.pop(),
            _ => Some(Arc::new(CompositeObserver::new(observers))),
        };

        Ok(Session {
            cluster,
            pool,
            default_execution_profile_handle,
            notifier: ObserverNotifier::new(observer),
            #[cfg(feature = "metrics")]
            metrics,
        })
    }
}
