use std::error::Error;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tracing::{error, warn};

use super::{HostTrackingInfo, RequestTrackingInfo};
use crate::errors::{ExecutionError, RequestAttemptError, RequestErrorType};
use crate::policies::retry::RetryDecision;
use crate::response::QueryResponse;

/// Error reported by a [`RequestObserver`] callback.
///
/// Such errors are logged and otherwise ignored, they never affect the request.
#[derive(Error, Debug)]
#[error("Request observer failed: {0}")]
pub struct ObserverError(Box<dyn Error + Send + Sync>);

impl ObserverError {
    /// Wraps any error.
    pub fn new(error: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self(error.into())
    }
}

/// Receives notifications about the lifecycle of requests and their attempts.
///
/// For every request:
/// - `on_request_start` comes first,
/// - each attempt gets `on_node_start` followed by at most one of
///   `on_node_success` and `on_node_request_error`, the latter also when no
///   connection to the node could be acquired;
///   attempts cancelled because the request was already resolved get neither,
/// - exactly one of `on_request_success`, `on_request_failure` and
///   `on_request_cancelled` comes last.
///
/// Callbacks of concurrent executions may interleave. All methods default to no-ops.
/// Errors and panics raised by callbacks are logged and never reach the caller
/// of the request.
#[async_trait]
pub trait RequestObserver: std::fmt::Debug + Send + Sync {
    /// A speculative execution is about to start on `host`, `delay` after the previous one.
    fn on_speculative_execution(
        &self,
        _request: &RequestTrackingInfo<'_>,
        _host: &HostTrackingInfo,
        _delay: Duration,
    ) -> Result<(), ObserverError> {
        Ok(())
    }

    /// A connection to `host` was obtained and the request is about to be sent.
    async fn on_node_start(
        &self,
        _request: &RequestTrackingInfo<'_>,
        _host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        Ok(())
    }

    /// An attempt on `host` failed. `decision` is what the retry policy decided to do about it.
    async fn on_node_request_error(
        &self,
        _request: &RequestTrackingInfo<'_>,
        _host: &HostTrackingInfo,
        _error_type: RequestErrorType,
        _decision: &RetryDecision,
        _error: &RequestAttemptError,
    ) -> Result<(), ObserverError> {
        Ok(())
    }

    /// An attempt on `host` succeeded and resolved the request.
    async fn on_node_success(
        &self,
        _request: &RequestTrackingInfo<'_>,
        _host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        Ok(())
    }

    /// The request started.
    async fn on_request_start(&self, _request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        Ok(())
    }

    /// The request resolved with an error.
    async fn on_request_failure(
        &self,
        _request: &RequestTrackingInfo<'_>,
        _error: &ExecutionError,
    ) -> Result<(), ObserverError> {
        Ok(())
    }

    /// The caller dropped the request before it resolved.
    ///
    /// Called synchronously, after all attempts of the request were cancelled.
    fn on_request_cancelled(&self, _request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        Ok(())
    }

    /// The request resolved with a response.
    async fn on_request_success(
        &self,
        _request: &RequestTrackingInfo<'_>,
        _response: &QueryResponse,
    ) -> Result<(), ObserverError> {
        Ok(())
    }
}

/// Runs an observer callback, swallowing its error or panic.
pub(crate) async fn guarded(
    callback: &'static str,
    notification: impl Future<Output = Result<(), ObserverError>>,
) {
    match AssertUnwindSafe(notification).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(callback, error = %e, "Request observer returned an error"),
        Err(_) => error!(callback, "Request observer panicked"),
    }
}

/// Synchronous counterpart of [`guarded`].
pub(crate) fn guarded_sync(
    callback: &'static str,
    notification: impl FnOnce() -> Result<(), ObserverError>,
) {
    match std::panic::catch_unwind(AssertUnwindSafe(notification)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(callback, error = %e, "Request observer returned an error"),
        Err(_) => error!(callback, "Request observer panicked"),
    }
}

/// The observer of a session, as seen by the request execution code.
///
/// Every notification goes through [`guarded`], so none of them can fail.
#[derive(Debug, Clone)]
pub(crate) struct ObserverNotifier {
    observer: Option<Arc<dyn RequestObserver>>,
}

impl ObserverNotifier {
    pub(crate) fn new(observer: Option<Arc<dyn RequestObserver>>) -> Self {
        Self { observer }
    }

    pub(crate) fn speculative_execution(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
        delay: Duration,
    ) {
        if let Some(observer) = &self.observer {
            guarded_sync("on_speculative_execution", || {
                observer.on_speculative_execution(request, host, delay)
            });
        }
    }

    pub(crate) async fn node_start(&self, request: &RequestTrackingInfo<'_>, host: &HostTrackingInfo) {
        if let Some(observer) = &self.observer {
            guarded("on_node_start", observer.on_node_start(request, host)).await;
        }
    }

    pub(crate) async fn node_request_error(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
        error_type: RequestErrorType,
        decision: &RetryDecision,
        error: &RequestAttemptError,
    ) {
        if let Some(observer) = &self.observer {
            guarded(
                "on_node_request_error",
                observer.on_node_request_error(request, host, error_type, decision, error),
            )
            .await;
        }
    }

    pub(crate) async fn node_success(&self, request: &RequestTrackingInfo<'_>, host: &HostTrackingInfo) {
        if let Some(observer) = &self.observer {
            guarded("on_node_success", observer.on_node_success(request, host)).await;
        }
    }

    pub(crate) async fn request_start(&self, request: &RequestTrackingInfo<'_>) {
        if let Some(observer) = &self.observer {
            guarded("on_request_start", observer.on_request_start(request)).await;
        }
    }

    pub(crate) async fn request_failure(&self, request: &RequestTrackingInfo<'_>, error: &ExecutionError) {
        if let Some(observer) = &self.observer {
            guarded("on_request_failure", observer.on_request_failure(request, error)).await;
        }
    }

    pub(crate) fn request_cancelled(&self, request: &RequestTrackingInfo<'_>) {
        if let Some(observer) = &self.observer {
            guarded_sync("on_request_cancelled", || observer.on_request_cancelled(request));
        }
    }

    pub(crate) async fn request_success(
        &self,
        request: &RequestTrackingInfo<'_>,
        response: &QueryResponse,
    ) {
        if let Some(observer) = &self.observer {
            guarded("on_request_success", observer.on_request_success(request, response)).await;
        }
    }
}
