//! Drives a logical request to its resolution: runs the initial execution,
//! starts speculative executions, enforces the request timeout and reports
//! the outcome to the observer exactly once.

use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{Fuse, FusedFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::time::{sleep, sleep_until, Instant, Sleep};
use tracing::{trace, trace_span, Instrument};

use super::execution_profile::ExecutionProfileInner;
use super::request_execution::{run_execution, ExecutionContext, ExecutionOutcome, ResolutionClaim};
use crate::cluster::{ClusterState, NodeRef};
use crate::errors::{ExecutionError, NoHostAvailableError, RequestAttemptError};
use crate::network::ConnectionPool;
#[cfg(feature = "metrics")]
use crate::observability::metrics::Metrics;
use crate::observability::{HostTrackingInfo, ObserverNotifier, RequestTrackingInfo};
use crate::policies::load_balancing::{Plan, RoutingInfo};
use crate::policies::speculative_execution::{self, SpeculativeExecutionPolicy};
use crate::response::QueryResponse;
use crate::statement::Statement;

// Executions running concurrently share one plan, so that no node is tried twice.
struct SharedPlan<'a, I>
where
    I: Iterator<Item = NodeRef<'a>>,
{
    iter: Mutex<I>,
}

impl<'a, I> Iterator for &SharedPlan<'a, I>
where
    I: Iterator<Item = NodeRef<'a>>,
{
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next()
    }
}

// Reports the request as cancelled if it is dropped before being disarmed.
struct CancellationGuard<'a, 'b> {
    notifier: &'a ObserverNotifier,
    tracking: &'a RequestTrackingInfo<'b>,
    armed: bool,
}

impl CancellationGuard<'_, '_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancellationGuard<'_, '_> {
    fn drop(&mut self) {
        if self.armed {
            trace!("Request dropped before resolving");
            self.notifier.request_cancelled(self.tracking);
        }
    }
}

pub(crate) struct RequestHandler<'a> {
    pub(crate) statement: &'a Statement,
    pub(crate) profile: Arc<ExecutionProfileInner>,
    pub(crate) cluster_state: Arc<ClusterState>,
    pub(crate) pool: &'a Arc<dyn ConnectionPool>,
    pub(crate) notifier: &'a ObserverNotifier,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: &'a Metrics,
}

impl RequestHandler<'_> {
    pub(crate) async fn execute(self) -> Result<QueryResponse, ExecutionError> {
        let tracking = RequestTrackingInfo::new(Some(self.statement));
        self.notifier.request_start(&tracking).await;
        // Declared before the runner, so that attempts are dropped first.
        let mut cancellation = CancellationGuard {
            notifier: self.notifier,
            tracking: &tracking,
            armed: true,
        };

        let claim = ResolutionClaim::new();
        let request_timeout = self
            .statement
            .get_request_timeout()
            .or(self.profile.request_timeout);
        let deadline = request_timeout.map(|timeout| Instant::now() + timeout);

        let result = {
            let mut runner = pin!(self.run(&tracking, &claim, deadline).fuse());
            match (request_timeout, deadline) {
                (Some(timeout), Some(deadline)) => {
                    let mut timer = pin!(sleep_until(deadline).fuse());
                    futures::select! {
                        result = runner => result,
                        () = timer => {
                            if claim.try_claim() {
                                trace!(?timeout, "Request timed out");
                                Err(ExecutionError::RequestTimeout(timeout))
                            } else {
                                // An attempt already won, let it finish reporting.
                                runner.await
                            }
                        }
                    }
                }
                _ => runner.await,
            }
        };

        cancellation.disarm();
        match &result {
            Ok(response) => self.notifier.request_success(&tracking, response).await,
            Err(error) => self.notifier.request_failure(&tracking, error).await,
        }
        result
    }

    async fn run(
        &self,
        tracking: &RequestTrackingInfo<'_>,
        claim: &ResolutionClaim,
        deadline: Option<Instant>,
    ) -> Result<QueryResponse, ExecutionError> {
        let statement = self.statement;
        let profile = &*self.profile;

        let consistency = statement.config.determine_consistency(profile.consistency);
        let serial_consistency = statement
            .config
            .serial_consistency
            .unwrap_or(profile.serial_consistency);
        let is_idempotent = statement.get_is_idempotent();

        let routing_info = RoutingInfo {
            consistency,
            serial_consistency,
            keyspace: statement.get_keyspace(),
            is_idempotent,
        };
        let load_balancing_policy = statement
            .config
            .load_balancing_policy
            .as_deref()
            .unwrap_or(profile.load_balancing_policy.as_ref());
        let retry_policy = statement
            .config
            .retry_policy
            .as_deref()
            .unwrap_or(profile.retry_policy.as_ref());
        // Speculative executions would duplicate non-idempotent statements.
        let speculative_policy: Option<&dyn SpeculativeExecutionPolicy> = statement
            .config
            .speculative_execution_policy
            .as_deref()
            .or(profile.speculative_execution_policy.as_deref())
            .filter(|_| is_idempotent);

        let host_errors = Mutex::new(Vec::new());
        let context = ExecutionContext {
            statement,
            routing_info: &routing_info,
            load_balancing_policy,
            retry_policy,
            pool: self.pool,
            notifier: self.notifier,
            tracking,
            claim,
            host_errors: &host_errors,
            consistency,
            serial_consistency,
            attempt_timeout: profile.attempt_timeout,
            deadline,
            max_same_target_retries: profile.max_same_target_retries,
        };

        let plan = SharedPlan {
            iter: Mutex::new(Plan::new(
                load_balancing_policy,
                &routing_info,
                &self.cluster_state,
            )),
        };

        let Some(first) = (&plan).next() else {
            claim.try_claim();
            return Err(ExecutionError::NoHostAvailable(NoHostAvailableError::default()));
        };

        let start_execution = |execution_index: usize, node| {
            run_execution(&context, execution_index, node, &plan)
                .instrument(trace_span!("Request execution", execution = execution_index))
        };

        let next_delay = |executions_started: usize| -> Option<Duration> {
            speculative_policy?.next_delay(&speculative_execution::Context {
                statement,
                executions_started,
                #[cfg(feature = "metrics")]
                metrics: self.metrics,
            })
        };

        let mut executions = FuturesUnordered::new();
        executions.push(start_execution(0, first));
        let mut executions_started: usize = 1;

        let mut timer = pin!(Fuse::<Sleep>::terminated());
        let mut delay = Duration::ZERO;
        if let Some(first_delay) = next_delay(executions_started) {
            delay = first_delay;
            timer.set(sleep(delay).fuse());
        }

        let mut last_ignored: Option<RequestAttemptError> = None;
        loop {
            futures::select! {
                () = timer => {
                    let node = if claim.is_claimed() { None } else { (&plan).next() };
                    match node {
                        Some(node) => {
                            let execution_index = executions_started;
                            executions_started += 1;
                            self.notifier.speculative_execution(
                                tracking,
                                &HostTrackingInfo::new(Arc::clone(node), execution_index, 1),
                                delay,
                            );
                            executions.push(start_execution(execution_index, node));

                            if let Some(next) = next_delay(executions_started) {
                                delay = next;
                                timer.set(sleep(delay).fuse());
                            }
                        }
                        None => trace!("No node left for a speculative execution"),
                    }
                }
                outcome = executions.select_next_some() => match outcome {
                    ExecutionOutcome::Resolved(result) => return result,
                    ExecutionOutcome::Cancelled => {}
                    ExecutionOutcome::Exhausted { last_ignored: ignored } => {
                        // The plan is shared, so nobody else will find a node either.
                        last_ignored = ignored;
                        timer.set(Fuse::terminated());
                    }
                },
                complete => break,
            }

            if executions.is_empty() && timer.is_terminated() {
                break;
            }
        }

        claim.try_claim();
        if let Some(error) = last_ignored {
            return Err(ExecutionError::LastAttemptError(error));
        }
        let errors = std::mem::take(
            &mut *host_errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        Err(ExecutionError::NoHostAvailable(NoHostAvailableError { errors }))
    }
}
