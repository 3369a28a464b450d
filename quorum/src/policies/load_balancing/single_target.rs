use std::net::SocketAddr;
use std::sync::Arc;

use uuid::Uuid;

use crate::cluster::{ClusterState, Node, NodeRef};

use super::{FallbackPlan, LoadBalancingPolicy, RoutingInfo};

/// Node identifier used by [`SingleTargetLoadBalancingPolicy`].
#[derive(Debug, Clone)] // <- Cheaply clonable
#[non_exhaustive]
pub enum NodeIdentifier {
    /// Identifies a node by its [`Node`] reference.
    /// If this variant is used, the node will be returned immediately, without
    /// lookup in the cluster state.
    Node(Arc<Node>),
    /// Identifies a node by its host ID.
    /// The node will be looked up in the cluster state based on it.
    HostId(Uuid),
    /// Identifies a node by its address.
    /// The node will be looked up in the cluster state based on it.
    NodeAddress(SocketAddr),
}

/// Load balancing policy that enforces a single target.
///
/// It may be useful for queries to node-local system tables.
/// The plan is empty if the node can't be found or is down.
#[derive(Debug)]
pub struct SingleTargetLoadBalancingPolicy {
    node_identifier: NodeIdentifier,
}

impl SingleTargetLoadBalancingPolicy {
    /// Creates a new instance of [`SingleTargetLoadBalancingPolicy`].
    #[allow(clippy::new_ret_no_self)]
    pub fn new(node_identifier: NodeIdentifier) -> Arc<dyn LoadBalancingPolicy> {
        Arc::new(Self { node_identifier })
    }
}

impl LoadBalancingPolicy for SingleTargetLoadBalancingPolicy {
    fn pick<'a>(
        &'a self,
        _request: &'a RoutingInfo,
        cluster: &'a ClusterState,
    ) -> Option<NodeRef<'a>> {
        let node = match &self.node_identifier {
            NodeIdentifier::Node(node) => Some(node),
            NodeIdentifier::HostId(host_id) => cluster.get_node(host_id),
            NodeIdentifier::NodeAddress(addr) => cluster
                .get_nodes_info()
                .iter()
                .find(|node| node.address == *addr),
        };

        if node.is_none() {
            tracing::warn!(
                "SingleTargetLoadBalancingPolicy failed to find requested node {:?} in cluster metadata.",
                self.node_identifier
            );
        }
        node
    }

    fn fallback<'a>(
        &'a self,
        _request: &'a RoutingInfo,
        _cluster: &'a ClusterState,
    ) -> FallbackPlan<'a> {
        Box::new(std::iter::empty())
    }

    fn name(&self) -> String {
        "SingleTargetLoadBalancingPolicy".to_string()
    }
}
