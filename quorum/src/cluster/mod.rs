//! Host directory: the nodes known to be part of the cluster and their liveness.

mod node;
mod state;

use std::sync::Arc;

use arc_swap::ArcSwap;

pub use node::{Node, NodeRef, Peer};
pub use state::ClusterState;

/// Holds the current [`ClusterState`] and allows replacing it while requests are running.
///
/// Requests take a snapshot with [`Cluster::get_state`] and keep using it until they finish.
#[derive(Debug)]
pub struct Cluster {
    state: ArcSwap<ClusterState>,
}

impl Cluster {
    /// Creates a cluster consisting of given peers, all of them considered up.
    pub fn new(peers: impl IntoIterator<Item = Peer>) -> Self {
        let state = ClusterState::default().with_peers(peers);
        Cluster {
            state: ArcSwap::from_pointee(state),
        }
    }

    /// Current snapshot of the topology.
    pub fn get_state(&self) -> Arc<ClusterState> {
        self.state.load_full()
    }

    /// Replaces the topology. Nodes which didn't change keep their identity and liveness.
    pub fn update_peers(&self, peers: impl IntoIterator<Item = Peer>) {
        let next = self.state.load().with_peers(peers);
        self.state.store(Arc::new(next));
    }
}
