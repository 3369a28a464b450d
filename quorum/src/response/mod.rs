//! Successful outcome of a request.

mod coordinator;

use quorum_cql::frame::response::NonErrorResponse;

pub use coordinator::Coordinator;

/// Response of the attempt that won the request.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    /// Decoded, non-error response sent by the coordinator.
    pub response: NonErrorResponse,
    /// Node that produced the response.
    pub coordinator: Coordinator,
}
