use uuid::Uuid;

use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Description of a cluster member as reported by topology discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Unique identifier of the node.
    pub host_id: Uuid,
    /// Address used to connect to the node.
    pub address: SocketAddr,
    /// Datacenter of the node, if known.
    pub datacenter: Option<String>,
    /// Rack of the node, if known.
    pub rack: Option<String>,
}

/// Node represents a cluster node along with its liveness.
///
/// Identity of a node is its `host_id`. If a node changes its address, datacenter
/// or rack, it is represented by a new instance of `Node`, but compares equal to the old one.
#[derive(Debug)]
pub struct Node {
    /// Unique identifier of the node.
    pub host_id: Uuid,
    /// Address of the node, which is used to connect to it.
    pub address: SocketAddr,
    /// Datacenter of the node, if known.
    pub datacenter: Option<String>,
    /// Rack of the node, if known.
    pub rack: Option<String>,

    // Written by health checking, read by load balancing at the moment a node is picked.
    up: AtomicBool,
}

/// A way that Nodes are often passed and accessed in the driver's code.
pub type NodeRef<'a> = &'a Arc<Node>;

impl Node {
    /// Creates a node which is considered up.
    pub fn new(peer: Peer) -> Self {
        Node {
            host_id: peer.host_id,
            address: peer.address,
            datacenter: peer.datacenter,
            rack: peer.rack,
            up: AtomicBool::new(true),
        }
    }

    /// Recreates a Node after its address or location changed, preserving its liveness.
    pub(crate) fn inherit_with_peer_changed(node: &Node, peer: Peer) -> Self {
        Node {
            host_id: node.host_id,
            address: peer.address,
            datacenter: peer.datacenter,
            rack: peer.rack,
            up: AtomicBool::new(node.is_up()),
        }
    }

    /// Whether the node is currently believed to be reachable.
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// Marks the node as reachable.
    pub fn mark_up(&self) {
        self.up.store(true, Ordering::Release);
    }

    /// Marks the node as unreachable. Plans created before will skip it from now on.
    pub fn mark_down(&self) {
        self.up.store(false, Ordering::Release);
    }

    pub(crate) fn matches_peer(&self, peer: &Peer) -> bool {
        self.host_id == peer.host_id
            && self.address == peer.address
            && self.datacenter == peer.datacenter
            && self.rack == peer.rack
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.host_id == other.host_id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host_id.hash(state);
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.address, self.host_id)
    }
}
