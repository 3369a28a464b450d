use std::sync::Arc;

use uuid::Uuid;

use crate::cluster::{ClusterState, Node, Peer};

pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

/// Builds a cluster of live nodes listening on 127.0.0.1 at the given ports,
/// each placed in the given datacenter. Host ids are random.
pub(crate) fn mock_cluster_state(nodes: &[(u16, &str)]) -> ClusterState {
    let nodes = nodes.iter().map(|(port, dc)| {
        Arc::new(Node::new(Peer {
            host_id: Uuid::new_v4(),
            address: format!("127.0.0.1:{port}")
                .parse()
                .expect("valid socket address"),
            datacenter: Some(dc.to_string()),
            rack: None,
        }))
    });
    ClusterState::new(nodes)
}
