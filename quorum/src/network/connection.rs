use std::net::SocketAddr;

use async_trait::async_trait;
use quorum_cql::frame::response::Response;

use crate::errors::BrokenConnectionError;
use crate::statement::{Consistency, SerialConsistency, Statement};

/// A single established connection to a node.
///
/// Implementations take care of stream id allocation, frame encoding and decoding.
/// A response carrying an ERROR frame is a successful exchange from the point of view
/// of the connection, so it is returned as `Ok(Response::Error(_))`.
#[async_trait]
pub trait Connection: std::fmt::Debug + Send + Sync {
    /// Address this connection is connected to.
    fn connect_address(&self) -> SocketAddr;

    /// Sends the statement and waits for the response.
    ///
    /// Dropping the returned future abandons the request. The connection must stay usable
    /// for other requests in such case.
    async fn send_request(
        &self,
        statement: &Statement,
        consistency: Consistency,
        serial_consistency: Option<SerialConsistency>,
    ) -> Result<Response, BrokenConnectionError>;
}
