use std::{net::SocketAddr, sync::Arc};

use crate::{
    cluster::{Node, NodeRef},
    network::Connection,
};

/// The coordinator of a CQL request, i.e., the node that received
/// and processed the request, and eventually sent the response.
#[derive(Debug, Clone)]
pub struct Coordinator {
    /// Address the connection was opened against.
    connection_address: SocketAddr,
    /// The node that served as coordinator.
    node: Arc<Node>,
}

impl Coordinator {
    pub(crate) fn new(node: NodeRef, connection: &dyn Connection) -> Self {
        Self {
            connection_address: connection.connect_address(),
            node: Arc::clone(node),
        }
    }

    /// Address the connection was opened against.
    #[inline]
    pub fn connection_address(&self) -> SocketAddr {
        self.connection_address
    }

    /// The node that served as coordinator of the request.
    #[inline]
    pub fn node(&self) -> NodeRef<'_> {
        &self.node
    }
}
