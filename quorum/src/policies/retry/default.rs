use quorum_cql::frame::response::error::{DbError, WriteType};

use crate::errors::RequestAttemptError;

use super::{RequestInfo, RetryDecision, RetryPolicy};

/// Default retry policy - retries when there is a high chance that a retry might help.\
/// Behaviour based on [DataStax Java Driver](https://docs.datastax.com/en/developer/java-driver/4.10/manual/core/retries/)
///
/// Rules that allow "at most one retry" only fire for the first attempt of an execution.
#[derive(Debug)]
pub struct DefaultRetryPolicy;

impl DefaultRetryPolicy {
    /// Creates a new instance of [DefaultRetryPolicy].
    pub fn new() -> DefaultRetryPolicy {
        DefaultRetryPolicy
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> DefaultRetryPolicy {
        DefaultRetryPolicy::new()
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn decide_should_retry(&self, request_info: RequestInfo) -> RetryDecision {
        if request_info.consistency.is_serial() {
            return RetryDecision::Rethrow;
        };
        match request_info.error {
            // Basic errors - there are some problems on this node
            // Retry on a different one if possible
            RequestAttemptError::BrokenConnectionError(_)
            | RequestAttemptError::AttemptTimeout(_)
            | RequestAttemptError::DbError(DbError::Overloaded, _)
            | RequestAttemptError::DbError(DbError::ServerError, _)
            | RequestAttemptError::DbError(DbError::TruncateError, _) => {
                if request_info.is_idempotent {
                    RetryDecision::RetryNextTarget(None)
                } else {
                    RetryDecision::Rethrow
                }
            }
            // The request never left the driver, any node is as good as this one
            RequestAttemptError::ConnectionPoolError(_) => RetryDecision::RetryNextTarget(None),
            // Unavailable - the current node believes that not enough nodes
            // are alive to satisfy specified consistency requirements.
            // Maybe this node has network problems - try a different one.
            // Perform at most one retry - it's unlikely that two nodes
            // have network problems at the same time
            RequestAttemptError::DbError(DbError::Unavailable { .. }, _) => {
                if request_info.is_first_attempt() {
                    RetryDecision::RetryNextTarget(None)
                } else {
                    RetryDecision::Rethrow
                }
            }
            // ReadTimeout - coordinator didn't receive enough replies in time.
            // Retry at most once and only if there were actually enough replies
            // to satisfy consistency but they were all just checksums (data_present == false).
            // This happens when the coordinator picked replicas that were overloaded/dying.
            // Retried request should have some useful response because the node will detect
            // that these replicas are dead.
            RequestAttemptError::DbError(
                DbError::ReadTimeout {
                    received,
                    required,
                    data_present,
                    ..
                },
                _,
            ) => {
                if request_info.is_first_attempt() && received >= required && !*data_present {
                    RetryDecision::RetrySameTarget(None)
                } else {
                    RetryDecision::Rethrow
                }
            }
            // Write timeout - coordinator didn't receive enough replies in time.
            // Retry at most once and only for BatchLog write.
            // Coordinator probably didn't detect the nodes as dead.
            // By the time we retry they should be detected as dead.
            RequestAttemptError::DbError(DbError::WriteTimeout { write_type, .. }, _) => {
                if request_info.is_first_attempt()
                    && request_info.is_idempotent
                    && *write_type == WriteType::BatchLog
                {
                    RetryDecision::RetrySameTarget(None)
                } else {
                    RetryDecision::Rethrow
                }
            }
            // The node is still bootstrapping it can't execute the request, we should try another one
            RequestAttemptError::DbError(DbError::IsBootstrapping, _) => {
                RetryDecision::RetryNextTarget(None)
            }
            // In all other cases propagate the error to the user
            _ => RetryDecision::Rethrow,
        }
    }
}
