//! Request retries configurations\
//! To decide when to retry a request the `Session` can use any object which implements
//! the `RetryPolicy` trait

use crate::errors::{RequestAttemptError, RequestErrorType};
use crate::statement::{Consistency, Statement};

/// Information about a failed attempt
pub struct RequestInfo<'a> {
    /// The error with which the attempt failed
    pub error: &'a RequestAttemptError,
    /// Classification of `error`
    pub error_type: RequestErrorType,
    /// The statement being executed
    pub statement: &'a Statement,
    /// A request is idempotent if it can be applied multiple times without changing the result of the initial application\
    /// If set to `true` we can be sure that it is idempotent\
    /// If set to `false` it is unknown whether it is idempotent
    pub is_idempotent: bool,
    /// Consistency with which the attempt failed
    pub consistency: Consistency,
    /// Number of the failed attempt within its execution, starting from 1.
    /// Speculative executions count their attempts separately.
    pub attempt_number: usize,
}

impl RequestInfo<'_> {
    /// Whether the failed attempt was the first one of its execution.
    pub fn is_first_attempt(&self) -> bool {
        self.attempt_number <= 1
    }
}

/// What to do after an attempt failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again on the same node.
    RetrySameTarget(Option<Consistency>), // None means that the same consistency should be used as before
    /// Try the next node of the plan.
    RetryNextTarget(Option<Consistency>), // ditto
    /// Stop and return the error to the caller.
    Rethrow,
    /// Treat the error as non-fatal: move on to the next node,
    /// or return the error if no node is left.
    Ignore,
}

impl RetryDecision {
    /// Whether the decision leads to another attempt of this execution.
    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            RetryDecision::RetrySameTarget(_) | RetryDecision::RetryNextTarget(_)
        )
    }
}

/// Specifies a policy used to decide when to retry a request.
///
/// Decisions must depend only on the given [`RequestInfo`]: the same input
/// always yields the same decision.
pub trait RetryPolicy: std::fmt::Debug + Send + Sync {
    /// Called after an attempt failed - decide what to do next
    fn decide_should_retry(&self, request_info: RequestInfo) -> RetryDecision;
}
