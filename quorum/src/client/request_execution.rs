//! A single execution of a request: a sequence of attempts, driven by the
//! retry policy, over the nodes of the load balancing plan.

use std::iter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use quorum_cql::frame::response::NonErrorResponse;
use tokio::time::Instant;
use tracing::trace;

use crate::cluster::NodeRef;
use crate::errors::{ExecutionError, HostError, RequestAttemptError, RequestErrorType};
use crate::network::{ConnectionPool, PooledConnection};
use crate::observability::{HostTrackingInfo, ObserverNotifier, RequestTrackingInfo};
use crate::policies::load_balancing::{LoadBalancingPolicy, RoutingInfo};
use crate::policies::retry::{RequestInfo, RetryDecision, RetryPolicy};
use crate::response::{Coordinator, QueryResponse};
use crate::statement::{Consistency, SerialConsistency, Statement};

/// Decides which party resolves a request.
///
/// Attempts, executions and the request deadline race for it;
/// only the first [`try_claim`](Self::try_claim) succeeds.
#[derive(Debug, Default)]
pub(crate) struct ResolutionClaim {
    claimed: AtomicBool,
}

impl ResolutionClaim {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns true if the caller is the one to resolve the request.
    pub(crate) fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

/// State shared by all executions of one request.
pub(crate) struct ExecutionContext<'a> {
    pub(crate) statement: &'a Statement,
    pub(crate) routing_info: &'a RoutingInfo<'a>,
    pub(crate) load_balancing_policy: &'a dyn LoadBalancingPolicy,
    pub(crate) retry_policy: &'a dyn RetryPolicy,
    pub(crate) pool: &'a Arc<dyn ConnectionPool>,
    pub(crate) notifier: &'a ObserverNotifier,
    pub(crate) tracking: &'a RequestTrackingInfo<'a>,
    pub(crate) claim: &'a ResolutionClaim,
    pub(crate) host_errors: &'a Mutex<Vec<HostError>>,

    pub(crate) consistency: Consistency,
    pub(crate) serial_consistency: Option<SerialConsistency>,
    pub(crate) attempt_timeout: Option<Duration>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) max_same_target_retries: usize,
}

impl ExecutionContext<'_> {
    fn record_host_error(&self, node: NodeRef<'_>, error: RequestAttemptError) {
        self.host_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(HostError::new(node, error));
    }
}

/// How an execution ended.
#[derive(Debug)]
pub(crate) enum ExecutionOutcome {
    /// The execution resolved the request.
    Resolved(Result<QueryResponse, ExecutionError>),
    /// The request was resolved by someone else.
    Cancelled,
    /// No node is left in the plan.
    /// `last_ignored` is set if the last attempt of the execution ended with an ignored error.
    Exhausted {
        last_ignored: Option<RequestAttemptError>,
    },
}

/// Runs attempts on `first` and then on the nodes of `rest`, until one of them
/// resolves the request or the nodes run out.
pub(crate) async fn run_execution<'a>(
    context: &ExecutionContext<'_>,
    execution_index: usize,
    first: NodeRef<'a>,
    rest: impl Iterator<Item = NodeRef<'a>>,
) -> ExecutionOutcome {
    let mut consistency = context.consistency;
    let mut attempt_number: usize = 0;
    let mut last_ignored: Option<RequestAttemptError> = None;

    'nodes_in_plan: for node in iter::once(first).chain(rest) {
        let mut same_target_retries: usize = 0;

        'same_node_retries: loop {
            if context.claim.is_claimed() {
                trace!("Request already resolved, not starting another attempt");
                return ExecutionOutcome::Cancelled;
            }

            attempt_number += 1;
            let attempt = Attempt::new(node, execution_index, attempt_number);
            let (error, decision) = match attempt.run(context, consistency).await {
                AttemptOutcome::Succeeded(response) => {
                    return ExecutionOutcome::Resolved(Ok(response))
                }
                AttemptOutcome::Cancelled => return ExecutionOutcome::Cancelled,
                AttemptOutcome::Failed { error, decision } => (error, decision),
            };

            match decision {
                RetryDecision::Rethrow => {
                    return ExecutionOutcome::Resolved(Err(ExecutionError::LastAttemptError(
                        error,
                    )));
                }
                RetryDecision::Ignore => {
                    context.record_host_error(node, error.clone());
                    last_ignored = Some(error);
                    continue 'nodes_in_plan;
                }
                RetryDecision::RetrySameTarget(new_cl) => {
                    context.record_host_error(node, error);
                    last_ignored = None;
                    consistency = new_cl.unwrap_or(consistency);
                    if same_target_retries < context.max_same_target_retries && node.is_up() {
                        same_target_retries += 1;
                        continue 'same_node_retries;
                    }
                    trace!(
                        node = %node,
                        same_target_retries,
                        "Not retrying on the same node anymore, moving to the next one"
                    );
                    continue 'nodes_in_plan;
                }
                RetryDecision::RetryNextTarget(new_cl) => {
                    context.record_host_error(node, error);
                    last_ignored = None;
                    consistency = new_cl.unwrap_or(consistency);
                    continue 'nodes_in_plan;
                }
            }
        }
    }

    trace!("Load balancing plan exhausted");
    ExecutionOutcome::Exhausted { last_ignored }
}

/// Lifecycle of an attempt. An attempt dropped while `Pending` was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptState {
    Pending,
    Succeeded,
    Failed(RequestErrorType),
    Cancelled,
}

#[derive(Debug)]
enum AttemptOutcome {
    Succeeded(QueryResponse),
    Failed {
        error: RequestAttemptError,
        decision: RetryDecision,
    },
    Cancelled,
}

/// A single request sent to a single node.
struct Attempt<'a> {
    node: NodeRef<'a>,
    execution_index: usize,
    attempt_number: usize,
    started: Instant,
    state: AttemptState,
}

impl<'a> Attempt<'a> {
    fn new(node: NodeRef<'a>, execution_index: usize, attempt_number: usize) -> Self {
        Self {
            node,
            execution_index,
            attempt_number,
            started: Instant::now(),
            state: AttemptState::Pending,
        }
    }

    async fn run(mut self, context: &ExecutionContext<'_>, consistency: Consistency) -> AttemptOutcome {
        let host = HostTrackingInfo::new(
            Arc::clone(self.node),
            self.execution_index,
            self.attempt_number,
        );
        trace!(
            node = %self.node,
            attempt = self.attempt_number,
            consistency = %consistency,
            "Attempt started"
        );

        let result = self.send(context, &host, consistency).await;
        let latency = self.started.elapsed();

        match result {
            Ok(response) => {
                context.load_balancing_policy.on_request_success(
                    context.routing_info,
                    latency,
                    self.node,
                );
                if !context.claim.try_claim() {
                    trace!("Attempt succeeded, but the request was already resolved");
                    self.state = AttemptState::Cancelled;
                    return AttemptOutcome::Cancelled;
                }
                trace!(?latency, "Attempt succeeded");
                self.state = AttemptState::Succeeded;
                context.notifier.node_success(context.tracking, &host).await;
                AttemptOutcome::Succeeded(response)
            }
            Err(error) => self.fail(context, &host, consistency, latency, error).await,
        }
    }

    async fn send(
        &self,
        context: &ExecutionContext<'_>,
        host: &HostTrackingInfo,
        consistency: Consistency,
    ) -> Result<QueryResponse, RequestAttemptError> {
        context.notifier.node_start(context.tracking, host).await;
        let connection = PooledConnection::acquire(context.pool, self.node).await?;

        let request = connection.connection().send_request(
            context.statement,
            consistency,
            context.serial_consistency,
        );
        let response = match self.deadline(context) {
            Some((deadline, timeout)) => tokio::time::timeout_at(deadline, request)
                .await
                .map_err(|_| RequestAttemptError::AttemptTimeout(timeout))??,
            None => request.await?,
        };

        let coordinator = Coordinator::new(self.node, connection.connection());
        match response.into_non_error_response() {
            Ok(response @ NonErrorResponse::Result(_)) => Ok(QueryResponse {
                response,
                coordinator,
            }),
            Ok(other) => Err(RequestAttemptError::UnexpectedResponse(
                other.to_response_kind(),
            )),
            Err(error) => Err(RequestAttemptError::DbError(error.error, error.reason)),
        }
    }

    /// The attempt timeout applies only if it ends before the request deadline.
    /// Otherwise the request deadline, enforced by the request handler, comes first.
    fn deadline(&self, context: &ExecutionContext<'_>) -> Option<(Instant, Duration)> {
        let timeout = context.attempt_timeout?;
        let own = self.started + timeout;
        match context.deadline {
            Some(request_deadline) if request_deadline <= own => None,
            _ => Some((own, timeout)),
        }
    }

    async fn fail(
        mut self,
        context: &ExecutionContext<'_>,
        host: &HostTrackingInfo,
        consistency: Consistency,
        latency: Duration,
        error: RequestAttemptError,
    ) -> AttemptOutcome {
        let error_type = error.error_type();
        if error.was_sent() {
            context.load_balancing_policy.on_request_failure(
                context.routing_info,
                latency,
                self.node,
                &error,
            );
        }

        let decision = context.retry_policy.decide_should_retry(RequestInfo {
            error: &error,
            error_type,
            statement: context.statement,
            is_idempotent: context.statement.get_is_idempotent(),
            consistency,
            attempt_number: self.attempt_number,
        });
        trace!(error = %error, %error_type, ?decision, "Attempt failed");

        let may_report = match decision {
            RetryDecision::Rethrow => context.claim.try_claim(),
            _ => !context.claim.is_claimed(),
        };
        if !may_report {
            trace!("Attempt failed, but the request was already resolved");
            self.state = AttemptState::Cancelled;
            return AttemptOutcome::Cancelled;
        }

        self.state = AttemptState::Failed(error_type);
        context
            .notifier
            .node_request_error(context.tracking, host, error_type, &decision, &error)
            .await;
        AttemptOutcome::Failed { error, decision }
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if self.state == AttemptState::Pending {
            self.state = AttemptState::Cancelled;
            trace!(
                node = %self.node,
                execution = self.execution_index,
                attempt = self.attempt_number,
                "Attempt cancelled"
            );
        }
    }
}
