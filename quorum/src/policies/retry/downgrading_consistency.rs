use quorum_cql::Consistency;
use tracing::debug;

use super::{RequestInfo, RetryDecision, RetryPolicy};
use crate::errors::{DbError, RequestAttemptError, WriteType};

/// Downgrading consistency retry policy - retries with lower consistency level if it knows\
/// that the initial CL is unreachable. Also, it behaves as [DefaultRetryPolicy](crate::policies::retry::DefaultRetryPolicy)
/// when it believes that the initial CL is reachable.
/// Behaviour based on [DataStax Java Driver]\
///(<https://docs.datastax.com/en/drivers/java/3.11/com/datastax/driver/core/policies/DowngradingConsistencyRetryPolicy.html>)
#[derive(Debug)]
pub struct DowngradingConsistencyRetryPolicy;

impl DowngradingConsistencyRetryPolicy {
    /// Creates a new instance of [DowngradingConsistencyRetryPolicy].
    pub fn new() -> DowngradingConsistencyRetryPolicy {
        DowngradingConsistencyRetryPolicy
    }
}

impl Default for DowngradingConsistencyRetryPolicy {
    fn default() -> DowngradingConsistencyRetryPolicy {
        DowngradingConsistencyRetryPolicy::new()
    }
}

fn max_likely_to_work_cl(known_ok: i32, previous_cl: Consistency) -> RetryDecision {
    let decision = if known_ok >= 3 {
        RetryDecision::RetrySameTarget(Some(Consistency::Three))
    } else if known_ok == 2 {
        RetryDecision::RetrySameTarget(Some(Consistency::Two))
    } else if known_ok == 1 || previous_cl == Consistency::EachQuorum {
        // EACH_QUORUM does not report a global number of alive replicas
        // so even if we get 0 alive replicas, there might be
        // a node up in some other datacenter
        RetryDecision::RetrySameTarget(Some(Consistency::One))
    } else {
        RetryDecision::Rethrow
    };
    if let RetryDecision::RetrySameTarget(new_cl) = decision {
        debug!(
            "Decided to lower required consistency from {} to {:?}.",
            previous_cl, new_cl
        );
    }
    decision
}

impl RetryPolicy for DowngradingConsistencyRetryPolicy {
    fn decide_should_retry(&self, request_info: RequestInfo) -> RetryDecision {
        let cl = match request_info.consistency {
            Consistency::Serial | Consistency::LocalSerial => {
                return match request_info.error {
                    RequestAttemptError::DbError(DbError::Unavailable { .. }, _) => {
                        // The operation failed at the paxos phase of a LWT.
                        // Retry on the next target, on the assumption that the initial coordinator could be network-isolated.
                        RetryDecision::RetryNextTarget(None)
                    }
                    _ => RetryDecision::Rethrow,
                };
            }
            cl => cl,
        };
        let first_attempt = request_info.is_first_attempt();

        // Do not remove this lint!
        // It's there for a reason - we don't want new variants
        // automatically fall under `_` pattern when they are introduced.
        #[deny(clippy::wildcard_enum_match_arm)]
        match request_info.error {
            // With connection broken or the response late, we don't know if request was executed.
            RequestAttemptError::BrokenConnectionError(_)
            | RequestAttemptError::AttemptTimeout(_) => {
                if request_info.is_idempotent {
                    RetryDecision::RetryNextTarget(None)
                } else {
                    RetryDecision::Rethrow
                }
            }
            // Nothing was sent, so another node can safely be asked.
            RequestAttemptError::ConnectionPoolError(_) => RetryDecision::RetryNextTarget(None),
            // DbErrors
            RequestAttemptError::DbError(db_error, _) => match db_error {
                // Basic errors - there are some problems on this node
                // Retry on a different one if possible
                DbError::Overloaded | DbError::ServerError | DbError::TruncateError => {
                    if request_info.is_idempotent {
                        RetryDecision::RetryNextTarget(None)
                    } else {
                        RetryDecision::Rethrow
                    }
                }
                // Unavailable - the current node believes that not enough nodes
                // are alive to satisfy specified consistency requirements.
                DbError::Unavailable { alive, .. } => {
                    if first_attempt {
                        max_likely_to_work_cl(*alive, cl)
                    } else {
                        RetryDecision::Rethrow
                    }
                }
                // ReadTimeout - coordinator didn't receive enough replies in time.
                DbError::ReadTimeout {
                    received,
                    required,
                    data_present,
                    ..
                } => {
                    if !first_attempt {
                        RetryDecision::Rethrow
                    } else if received < required {
                        max_likely_to_work_cl(*received, cl)
                    } else if !*data_present {
                        RetryDecision::RetrySameTarget(None)
                    } else {
                        RetryDecision::Rethrow
                    }
                }
                // Write timeout - coordinator didn't receive enough replies in time.
                DbError::WriteTimeout {
                    write_type,
                    received,
                    ..
                } => {
                    if !first_attempt || !request_info.is_idempotent {
                        RetryDecision::Rethrow
                    } else {
                        match write_type {
                            WriteType::UnloggedBatch => {
                                // Since only part of the batch could have been persisted,
                                // retry with whatever consistency should allow to persist all
                                max_likely_to_work_cl(*received, cl)
                            }
                            WriteType::BatchLog => RetryDecision::RetrySameTarget(None),

                            WriteType::Counter
                            | WriteType::Cas
                            | WriteType::View
                            | WriteType::Cdc
                            // A replica may already have the write, it must not be sent again.
                            | WriteType::Simple
                            | WriteType::Batch
                            | WriteType::Other(_) => RetryDecision::Rethrow,
                        }
                    }
                }
                // The node is still bootstrapping it can't execute the request, we should try another one
                DbError::IsBootstrapping => RetryDecision::RetryNextTarget(None),
                // In all other cases propagate the error to the user
                _ => RetryDecision::Rethrow,
            },
            RequestAttemptError::UnexpectedResponse(_) => RetryDecision::Rethrow,
        }
    }
}
