use std::sync::Arc;

use rand::rng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand_pcg::Pcg32;
use smallvec::SmallVec;
use tracing::debug;

use super::{FallbackPlan, LoadBalancingPolicy, RoutingInfo};
use crate::cluster::{ClusterState, NodeRef};

type Nodes<'a> = SmallVec<[NodeRef<'a>; 8]>;

/// The default load balancing policy.
///
/// It can be configured to be datacenter-aware. Nodes of the preferred datacenter
/// are always tried first, remote ones only if datacenter failover is permitted
/// and the consistency of the statement is not datacenter-local.
/// Within each group the order of nodes is randomized, which spreads the load
/// across the cluster.
#[derive(Default)]
pub struct DefaultPolicy {
    preferred_datacenter: Option<String>,
    permit_dc_failover: bool,
    fixed_seed: Option<u64>,
}

impl std::fmt::Debug for DefaultPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultPolicy")
            .field("preferred_datacenter", &self.preferred_datacenter)
            .field("permit_dc_failover", &self.permit_dc_failover)
            .field("fixed_seed", &self.fixed_seed)
            .finish()
    }
}

impl LoadBalancingPolicy for DefaultPolicy {
    fn pick<'a>(
        &'a self,
        _request: &'a RoutingInfo,
        cluster: &'a ClusterState,
    ) -> Option<NodeRef<'a>> {
        let alive_local: Nodes<'a> = self
            .local_nodes(cluster)
            .filter(|node| Self::is_alive(node))
            .collect();

        if let Some(fixed) = self.fixed_seed {
            let mut generator = Pcg32::new(fixed, 0);
            alive_local.choose(&mut generator).copied()
        } else {
            alive_local.choose(&mut rng()).copied()
        }
    }

    fn fallback<'a>(
        &'a self,
        request: &'a RoutingInfo,
        cluster: &'a ClusterState,
    ) -> FallbackPlan<'a> {
        let local = self.shuffle(self.local_nodes(cluster));

        // Liveness is checked lazily, so that nodes going down while the plan
        // is being consumed are skipped.
        let plan = if self.is_datacenter_failover_possible(request) {
            let remote = self.shuffle(self.remote_nodes(cluster));
            itertools::Either::Left(local.into_iter().chain(remote))
        } else {
            itertools::Either::Right(local.into_iter())
        };

        Box::new(plan.filter(|node| Self::is_alive(node)))
    }

    fn name(&self) -> String {
        "DefaultPolicy".to_string()
    }
}

impl DefaultPolicy {
    /// Creates a builder used to customise configuration of a new DefaultPolicy.
    pub fn builder() -> DefaultPolicyBuilder {
        DefaultPolicyBuilder::new()
    }

    fn is_local(&self, node: NodeRef<'_>) -> bool {
        match &self.preferred_datacenter {
            Some(dc) => node.datacenter.as_deref() == Some(dc.as_str()),
            None => true,
        }
    }

    fn local_nodes<'a>(&'a self, cluster: &'a ClusterState) -> impl Iterator<Item = NodeRef<'a>> {
        cluster
            .get_nodes_info()
            .iter()
            .filter(move |node| self.is_local(node))
    }

    fn remote_nodes<'a>(&'a self, cluster: &'a ClusterState) -> impl Iterator<Item = NodeRef<'a>> {
        cluster
            .get_nodes_info()
            .iter()
            .filter(move |node| !self.is_local(node))
    }

    fn shuffle<'a>(&self, iter: impl Iterator<Item = NodeRef<'a>>) -> Nodes<'a> {
        let mut nodes: Nodes<'a> = iter.collect();

        if let Some(fixed) = self.fixed_seed {
            let mut generator = Pcg32::new(fixed, 0);
            nodes.shuffle(&mut generator);
        } else {
            nodes.shuffle(&mut rng());
        }

        nodes
    }

    /// Returns true iff the node should be considered to be alive.
    fn is_alive(node: NodeRef<'_>) -> bool {
        node.is_up()
    }

    /// Returns true iff the datacenter failover is permitted for the statement being executed.
    fn is_datacenter_failover_possible(&self, request: &RoutingInfo) -> bool {
        self.preferred_datacenter.is_some()
            && self.permit_dc_failover
            && !request.consistency.is_dc_local()
    }
}

/// The intended way to instantiate the DefaultPolicy.
///
/// # Example
/// ```
/// use quorum::policies::load_balancing::DefaultPolicy;
///
/// let default_policy = DefaultPolicy::builder()
///     .prefer_datacenter("dc1".to_string())
///     .permit_dc_failover(true)
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct DefaultPolicyBuilder {
    preferred_datacenter: Option<String>,
    permit_dc_failover: bool,
    enable_shuffling: bool,
}

impl DefaultPolicyBuilder {
    /// Creates a builder used to customise configuration of a new DefaultPolicy.
    pub fn new() -> Self {
        Self {
            preferred_datacenter: None,
            permit_dc_failover: false,
            enable_shuffling: true,
        }
    }

    /// Builds a new DefaultPolicy with the previously set configuration.
    pub fn build(self) -> Arc<dyn LoadBalancingPolicy> {
        Arc::new(DefaultPolicy {
            preferred_datacenter: self.preferred_datacenter,
            permit_dc_failover: self.permit_dc_failover,
            fixed_seed: (!self.enable_shuffling).then(|| {
                let seed = rand::random();
                debug!("DefaultPolicy: setting fixed seed to {}", seed);
                seed
            }),
        })
    }

    /// Sets the datacenter to be preferred by this policy.
    ///
    /// When a preferred datacenter is set, the policy will treat nodes in that
    /// datacenter as "local" nodes, and nodes in other datacenters as "remote" nodes.
    /// If no preferred datacenter is specified, the policy will treat all nodes as local nodes.
    ///
    /// When datacenter failover is disabled (`permit_dc_failover` is set to false),
    /// the default policy will only include local nodes in load balancing plans.
    pub fn prefer_datacenter(mut self, datacenter_name: String) -> Self {
        self.preferred_datacenter = Some(datacenter_name);
        self
    }

    /// Sets whether this policy permits datacenter failover, i.e. ever attempts
    /// to send requests to nodes from a non-preferred datacenter.
    ///
    /// Remote nodes are still never used for statements with a datacenter-local
    /// consistency (LOCAL_ONE, LOCAL_QUORUM, LOCAL_SERIAL).
    pub fn permit_dc_failover(mut self, permit: bool) -> Self {
        self.permit_dc_failover = permit;
        self
    }

    /// Sets whether this policy should randomize the order of nodes on every plan.
    /// When disabled, every plan lists nodes in the same order.
    ///
    /// Shuffling is enabled by default.
    pub fn enable_shuffling(mut self, enable: bool) -> Self {
        self.enable_shuffling = enable;
        self
    }
}

impl Default for DefaultPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
