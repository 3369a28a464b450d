use smallvec::SmallVec;
use tracing::{error, trace};
use uuid::Uuid;

use super::{FallbackPlan, LoadBalancingPolicy, NodeRef, RoutingInfo};
use crate::cluster::ClusterState;

enum PlanState<'a> {
    Created,
    PickedNone, // This always means an abnormal situation: it means that no nodes satisfied locality requirements.
    Picked,
    Fallback(FallbackPlan<'a>),
}

/// The list of nodes constituting the query plan.
///
/// The plan is lazily computed: the first node comes from [`LoadBalancingPolicy::pick`],
/// and the remaining ones are pulled from [`LoadBalancingPolicy::fallback`] only when needed.
/// This significantly reduces the allocation overhead on "the happy path"
/// (when the first node successfully handles the request).
///
/// Each node is checked for liveness at the moment it is yielded, so a node
/// marked down after the plan was created is skipped. A node is never yielded twice.
pub struct Plan<'a> {
    policy: &'a dyn LoadBalancingPolicy,
    routing_info: &'a RoutingInfo<'a>,
    cluster: &'a ClusterState,

    state: PlanState<'a>,
    yielded: SmallVec<[Uuid; 8]>,
}

impl<'a> Plan<'a> {
    /// Asks the given [LoadBalancingPolicy] to compute a load balancing plan for the given `RoutingInfo`.
    pub fn new(
        policy: &'a dyn LoadBalancingPolicy,
        routing_info: &'a RoutingInfo<'a>,
        cluster: &'a ClusterState,
    ) -> Self {
        Self {
            policy,
            routing_info,
            cluster,
            state: PlanState::Created,
            yielded: SmallVec::new(),
        }
    }

    fn accept(&mut self, node: NodeRef<'a>) -> bool {
        if self.yielded.contains(&node.host_id) {
            return false;
        }
        if !node.is_up() {
            trace!(node = %node, "Skipping node which is down");
            return false;
        }
        self.yielded.push(node.host_id);
        true
    }

    fn next_from_fallback(&mut self) -> Option<NodeRef<'a>> {
        loop {
            let PlanState::Fallback(iter) = &mut self.state else {
                return None;
            };
            let node = iter.next()?;
            if self.accept(node) {
                return Some(node);
            }
        }
    }
}

impl<'a> Iterator for Plan<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match &self.state {
            PlanState::Created => {
                if let Some(picked) = self.policy.pick(self.routing_info, self.cluster) {
                    if self.accept(picked) {
                        self.state = PlanState::Picked;
                        return Some(picked);
                    }
                }
                // `pick()` returned None (or a node that went down in the meantime), which
                // does not imply that fallback would return an empty plan, too.
                self.state = PlanState::Fallback(self.policy.fallback(self.routing_info, self.cluster));
                let first_fallback_node = self.next_from_fallback();
                if first_fallback_node.is_none() {
                    error!(
                        "Load balancing policy returned an empty plan! The query cannot be executed. Routing info: {:?}",
                        self.routing_info
                    );
                    self.state = PlanState::PickedNone;
                }
                first_fallback_node
            }
            PlanState::Picked => {
                self.state = PlanState::Fallback(self.policy.fallback(self.routing_info, self.cluster));
                self.next_from_fallback()
            }
            PlanState::Fallback(_) => self.next_from_fallback(),
            PlanState::PickedNone => None,
        }
    }
}
