//! Load balancing configurations\
//! `Session` can use any load balancing policy which implements the `LoadBalancingPolicy` trait.

use crate::cluster::{ClusterState, NodeRef};
use crate::errors::RequestAttemptError;
use crate::statement::{Consistency, SerialConsistency};
use std::time::Duration;

mod default;
mod plan;
mod single_target;

pub use default::{DefaultPolicy, DefaultPolicyBuilder};
pub use plan::Plan;
pub use single_target::{NodeIdentifier, SingleTargetLoadBalancingPolicy};

/// Represents info about statement that can be used by load balancing policies.
#[derive(Default, Clone, Debug)]
pub struct RoutingInfo<'a> {
    /// Requested consistency information allows to route requests to the appropriate
    /// datacenters. E.g. requests with a LOCAL_ONE consistency should be routed to the same
    /// datacenter.
    pub consistency: Consistency,
    /// Serial consistency of the statement, if any.
    pub serial_consistency: Option<SerialConsistency>,
    /// Keyspace the statement operates on, if known.
    pub keyspace: Option<&'a str>,
    /// Whether the statement may be executed more than once.
    pub is_idempotent: bool,
}

/// The fallback list of nodes in the request plan.
///
/// It is computed on-demand, only if querying the most preferred node fails
/// (or when speculative execution is triggered).
pub type FallbackPlan<'a> = Box<dyn Iterator<Item = NodeRef<'a>> + Send + Sync + 'a>;

/// Policy that decides which nodes to contact for each request.
///
/// When a request is prepared to be sent, a `LoadBalancingPolicy` implementation
/// constructs a load balancing plan: the list of nodes to which the driver will try
/// to send the request, best first.
///
/// Most requests are sent on the first try, so the request execution layer rarely needs to know more
/// than one node from the plan. To better optimize that case, `LoadBalancingPolicy` has two methods:
/// `pick` and `fallback`. `pick` returns the first node to contact for a given request, `fallback`
/// returns the rest of the load balancing plan.
///
/// `fallback` is called not only if a send to `pick`ed node failed (or when executing
/// speculatively), but also if `pick` returns `None`.
pub trait LoadBalancingPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the first node to contact for a given request.
    fn pick<'a>(&'a self, request: &'a RoutingInfo, cluster: &'a ClusterState)
        -> Option<NodeRef<'a>>;

    /// Returns all contact-appropriate nodes for a given request.
    fn fallback<'a>(
        &'a self,
        request: &'a RoutingInfo,
        cluster: &'a ClusterState,
    ) -> FallbackPlan<'a>;

    /// Invoked each time a request succeeds.
    fn on_request_success(&self, _request: &RoutingInfo, _latency: Duration, _node: NodeRef<'_>) {}

    /// Invoked each time a request fails.
    fn on_request_failure(
        &self,
        _request: &RoutingInfo,
        _latency: Duration,
        _node: NodeRef<'_>,
        _error: &RequestAttemptError,
    ) {
    }

    /// Returns the name of load balancing policy.
    fn name(&self) -> String;
}
