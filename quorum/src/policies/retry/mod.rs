//! Retry policies decide what happens after an attempt fails:
//! another attempt on the same node, on the next node, or the end of the request.

mod default;
mod downgrading_consistency;
mod fallthrough;
mod retry_policy;

pub use default::DefaultRetryPolicy;
pub use downgrading_consistency::DowngradingConsistencyRetryPolicy;
pub use fallthrough::FallthroughRetryPolicy;
pub use retry_policy::{RequestInfo, RetryDecision, RetryPolicy};
