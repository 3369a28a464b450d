use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use super::node::{Node, NodeRef, Peer};

/// Snapshot of the nodes known to be part of the cluster.
///
/// It is immutable after creation and is replaced atomically upon a topology refresh.
/// Liveness of nodes is not part of the snapshot: it is read from each [`Node`] when needed.
#[derive(Debug, Clone, Default)]
pub struct ClusterState {
    /// All nodes known to be part of the cluster, accessible by their host ID.
    pub(crate) known_peers: HashMap<Uuid, Arc<Node>>,

    /// Contains the same set of nodes as `known_peers`, in discovery order.
    pub(crate) all_nodes: Vec<Arc<Node>>,
}

impl ClusterState {
    /// Creates a state out of given nodes. If a host id repeats, the first node wins.
    pub fn new(nodes: impl IntoIterator<Item = Arc<Node>>) -> Self {
        let mut known_peers = HashMap::new();
        let mut all_nodes = Vec::new();
        for node in nodes {
            if known_peers.contains_key(&node.host_id) {
                debug!("Skipping duplicated node {}", node);
                continue;
            }
            known_peers.insert(node.host_id, Arc::clone(&node));
            all_nodes.push(node);
        }
        ClusterState {
            known_peers,
            all_nodes,
        }
    }

    /// Creates the next state from discovered peers.
    /// Uses nodes of `self` to recycle `Arc<Node>`s of peers that didn't change.
    pub(crate) fn with_peers(&self, peers: impl IntoIterator<Item = Peer>) -> Self {
        let nodes = peers.into_iter().map(|peer| match self.known_peers.get(&peer.host_id) {
            Some(node) if node.matches_peer(&peer) => Arc::clone(node),
            Some(node) => Arc::new(Node::inherit_with_peer_changed(node, peer)),
            None => Arc::new(Node::new(peer)),
        });
        ClusterState::new(nodes)
    }

    /// Access to all nodes known to the driver, including those which are down.
    pub fn get_nodes_info(&self) -> &[Arc<Node>] {
        &self.all_nodes
    }

    /// Looks up a node by its host id.
    pub fn get_node(&self, host_id: &Uuid) -> Option<NodeRef<'_>> {
        self.known_peers.get(host_id)
    }

    /// Nodes that are up at the moment of iteration.
    pub fn candidate_hosts(&self) -> impl Iterator<Item = NodeRef<'_>> {
        self.all_nodes.iter().filter(|node| node.is_up())
    }
}
