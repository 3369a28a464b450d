//! Errors that may be returned by the request execution engine.
//!
//! Two layers are distinguished:
//! - [`RequestAttemptError`] - failure of a single attempt against a single node.
//!   Such errors are classified into a [`RequestErrorType`] and handed to the retry policy.
//! - [`ExecutionError`] - the final error of a whole logical request, as seen by the caller.

use std::error::Error;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use thiserror::Error;
use uuid::Uuid;

pub use quorum_cql::{CqlResponseKind, DbError, WriteType};

use crate::cluster::NodeRef;

/// Classification of the reason an attempt failed.
///
/// This is what retry policies and observers reason about, instead of
/// the concrete error values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RequestErrorType {
    /// Not enough replicas were alive to satisfy the consistency level.
    Unavailable,
    /// The coordinator did not receive enough read responses in time.
    ReadTimeout,
    /// The coordinator did not receive enough write acknowledgements in time.
    WriteTimeout,
    /// The coordinator was overloaded or not ready to serve requests.
    Overloaded,
    /// The coordinator failed internally.
    ServerError,
    /// A client-side deadline elapsed before any response was received.
    ClientTimeout,
    /// The connection could not be obtained or broke during the attempt.
    ConnectionError,
    /// The statement needs to be prepared again on the node.
    Unprepared,
    /// Any other error.
    Other,
}

impl Display for RequestErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestErrorType::Unavailable => "Unavailable",
            RequestErrorType::ReadTimeout => "ReadTimeout",
            RequestErrorType::WriteTimeout => "WriteTimeout",
            RequestErrorType::Overloaded => "Overloaded",
            RequestErrorType::ServerError => "ServerError",
            RequestErrorType::ClientTimeout => "ClientTimeout",
            RequestErrorType::ConnectionError => "ConnectionError",
            RequestErrorType::Unprepared => "Unprepared",
            RequestErrorType::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Error that occurred during a single attempt of a request.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum RequestAttemptError {
    /// Database sent a response containing some error with a message
    #[error("Database returned an error: {0}, Error message: {1}")]
    DbError(DbError, String),

    /// Connection broke while the request was in flight.
    #[error(transparent)]
    BrokenConnectionError(#[from] BrokenConnectionError),

    /// Selected node's connection pool is in invalid state.
    /// The request was never sent.
    #[error("No connections in the pool: {0}")]
    ConnectionPoolError(#[from] ConnectionPoolError),

    /// No response arrived within the per-attempt timeout.
    #[error("Attempt timed out after {0:?}")]
    AttemptTimeout(Duration),

    /// Received a response that is neither RESULT nor ERROR.
    #[error("Received unexpected response from the server: {0}. Expected RESULT or ERROR response.")]
    UnexpectedResponse(CqlResponseKind),
}

impl RequestAttemptError {
    /// Classifies this error.
    pub fn error_type(&self) -> RequestErrorType {
        match self {
            RequestAttemptError::DbError(db_error, _) => match db_error {
                DbError::Unavailable { .. } => RequestErrorType::Unavailable,
                DbError::ReadTimeout { .. } => RequestErrorType::ReadTimeout,
                DbError::WriteTimeout { .. } => RequestErrorType::WriteTimeout,
                DbError::Overloaded | DbError::IsBootstrapping => RequestErrorType::Overloaded,
                DbError::ServerError | DbError::TruncateError => RequestErrorType::ServerError,
                DbError::Unprepared { .. } => RequestErrorType::Unprepared,
                _ => RequestErrorType::Other,
            },
            RequestAttemptError::BrokenConnectionError(_)
            | RequestAttemptError::ConnectionPoolError(_) => RequestErrorType::ConnectionError,
            RequestAttemptError::AttemptTimeout(_) => RequestErrorType::ClientTimeout,
            RequestAttemptError::UnexpectedResponse(_) => RequestErrorType::Other,
        }
    }

    /// Whether the request could have reached the node.
    ///
    /// Pool errors happen before anything is written to a connection.
    pub fn was_sent(&self) -> bool {
        !matches!(self, RequestAttemptError::ConnectionPoolError(_))
    }
}

/// Error returned to the caller of [`Session::execute`](crate::client::session::Session::execute).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ExecutionError {
    /// Every host of the plan was tried and none succeeded,
    /// or the load balancing policy produced no host at all.
    #[error(transparent)]
    NoHostAvailable(#[from] NoHostAvailableError),

    /// Request didn't finish within the overall request timeout.
    #[error("Request timeout: {0:?}")]
    RequestTimeout(Duration),

    /// The error of the last attempt, surfaced unchanged because the retry policy
    /// decided not to try further.
    #[error(transparent)]
    LastAttemptError(#[from] RequestAttemptError),
}

impl ExecutionError {
    /// Classification of the error that ended the request.
    ///
    /// `NoHostAvailable` has no single classification, so `None` is returned for it.
    pub fn error_type(&self) -> Option<RequestErrorType> {
        match self {
            ExecutionError::NoHostAvailable(_) => None,
            ExecutionError::RequestTimeout(_) => Some(RequestErrorType::ClientTimeout),
            ExecutionError::LastAttemptError(e) => Some(e.error_type()),
        }
    }
}

/// An attempt error together with the host it happened on.
#[derive(Debug, Clone)]
pub struct HostError {
    /// Host id of the node.
    pub host_id: Uuid,
    /// Address of the node.
    pub address: SocketAddr,
    /// What went wrong there.
    pub error: RequestAttemptError,
}

impl HostError {
    pub(crate) fn new(node: NodeRef<'_>, error: RequestAttemptError) -> Self {
        Self {
            host_id: node.host_id,
            address: node.address,
            error,
        }
    }
}

/// Per-host breakdown of a request that ran out of hosts.
///
/// Errors are listed in the order in which the attempts finished.
#[derive(Debug, Clone, Default)]
pub struct NoHostAvailableError {
    /// Errors of every failed attempt.
    pub errors: Vec<HostError>,
}

impl Display for NoHostAvailableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("No host available: the load balancing plan was empty");
        }
        write!(
            f,
            "No host available, tried {} host(s): [{}]",
            self.errors.len(),
            self.errors
                .iter()
                .format_with(", ", |e, f| f(&format_args!("{}: {}", e.address, e.error)))
        )
    }
}

impl Error for NoHostAvailableError {}

/// Error indicating that the connection used by an attempt broke.
#[derive(Error, Debug, Clone)]
#[error("Connection broken, reason: {0}")]
pub struct BrokenConnectionError(Arc<dyn Error + Sync + Send>);

impl BrokenConnectionError {
    /// Retrieve an error reason by downcasting to specific type.
    pub fn downcast_ref<T: Error + 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

/// A reason why connection was broken.
///
/// Connection implementations may also use their own error types
/// through `BrokenConnectionError::from`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BrokenConnectionErrorKind {
    /// Failed to read from or write to the socket.
    #[error("Input/output error on the connection: {0}")]
    IoError(#[from] std::io::Error),

    /// The node closed the connection.
    #[error("Connection closed by the server")]
    ClosedByServer,

    /// Keepalive request didn't complete in time.
    #[error("Timed out while waiting for response to keepalive request on connection to {0}")]
    KeepaliveTimeout(SocketAddr),
}

impl From<BrokenConnectionErrorKind> for BrokenConnectionError {
    fn from(value: BrokenConnectionErrorKind) -> Self {
        BrokenConnectionError(Arc::new(value))
    }
}

/// Error caused by failed pool acquisition.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectionPoolError {
    /// The pool has no working connection.
    #[error("The pool is broken; Last connection failed with: {last_connection_error}")]
    Broken {
        /// The error that broke the last connection.
        last_connection_error: BrokenConnectionError,
    },

    /// The pool is still being filled.
    #[error("Pool is still being initialized")]
    Initializing,

    /// The node is excluded from connecting.
    #[error("The node has been disabled")]
    NodeDisabled,
}

/// Error that occurred during session creation
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum NewSessionError {
    /// Neither a cluster nor any known peer was given to the session builder.
    /// There needs to be at least one node to send requests to.
    #[error("Empty known nodes list")]
    EmptyKnownNodesList,

    /// Session metrics could not be set up.
    #[cfg(feature = "metrics")]
    #[error("Failed to initialize metrics: {0}")]
    MetricsError(#[from] crate::observability::metrics::MetricsError),
}
