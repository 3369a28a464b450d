use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::observer::{guarded, guarded_sync};
use super::{HostTrackingInfo, ObserverError, RequestObserver, RequestTrackingInfo};
use crate::errors::{ExecutionError, RequestAttemptError, RequestErrorType};
use crate::policies::retry::RetryDecision;
use crate::response::QueryResponse;

/// Forwards every notification to each of its observers, in registration order.
///
/// A failing (or panicking) observer is logged and skipped, the remaining ones are
/// still notified. The composite itself never reports an error.
#[derive(Debug, Default, Clone)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn RequestObserver>>,
}

impl CompositeObserver {
    /// Creates a composite of the given observers.
    pub fn new(observers: Vec<Arc<dyn RequestObserver>>) -> Self {
        Self { observers }
    }

    /// Appends an observer.
    pub fn push(&mut self, observer: Arc<dyn RequestObserver>) {
        self.observers.push(observer);
    }

    /// Number of composed observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether there are no composed observers.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[async_trait]
impl RequestObserver for CompositeObserver {
    fn on_speculative_execution(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
        delay: Duration,
    ) -> Result<(), ObserverError> {
        for observer in &self.observers {
            guarded_sync("on_speculative_execution", || {
                observer.on_speculative_execution(request, host, delay)
            });
        }
        Ok(())
    }

    async fn on_node_start(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        for observer in &self.observers {
            guarded("on_node_start", observer.on_node_start(request, host)).await;
        }
        Ok(())
    }

    async fn on_node_request_error(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
        error_type: RequestErrorType,
        decision: &RetryDecision,
        error: &RequestAttemptError,
    ) -> Result<(), ObserverError> {
        for observer in &self.observers {
            guarded(
                "on_node_request_error",
                observer.on_node_request_error(request, host, error_type, decision, error),
            )
            .await;
        }
        Ok(())
    }

    async fn on_node_success(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        for observer in &self.observers {
            guarded("on_node_success", observer.on_node_success(request, host)).await;
        }
        Ok(())
    }

    async fn on_request_start(&self, request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        for observer in &self.observers {
            guarded("on_request_start", observer.on_request_start(request)).await;
        }
        Ok(())
    }

    async fn on_request_failure(
        &self,
        request: &RequestTrackingInfo<'_>,
        error: &ExecutionError,
    ) -> Result<(), ObserverError> {
        for observer in &self.observers {
            guarded("on_request_failure", observer.on_request_failure(request, error)).await;
        }
        Ok(())
    }

    fn on_request_cancelled(&self, request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        for observer in &self.observers {
            guarded_sync("on_request_cancelled", || observer.on_request_cancelled(request));
        }
        Ok(())
    }

    async fn on_request_success(
        &self,
        request: &RequestTrackingInfo<'_>,
        response: &QueryResponse,
    ) -> Result<(), ObserverError> {
        for observer in &self.observers {
            guarded("on_request_success", observer.on_request_success(request, response)).await;
        }
        Ok(())
    }
}
