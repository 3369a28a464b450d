use std::time::Duration;

use async_trait::async_trait;
use tracing::field::{debug, Empty};
use tracing::{trace, Span};

use super::{HostTrackingInfo, ObserverError, RequestObserver, RequestTrackingInfo};
use crate::errors::{ExecutionError, RequestAttemptError, RequestErrorType};
use crate::policies::retry::RetryDecision;
use crate::response::QueryResponse;
use crate::utils::{otel_span, SpanExt};

/// Key of the request span in [`RequestTrackingInfo`].
///
/// Attempt spans are stored under [`HostTrackingInfo::item_key`] of this key.
pub const REQUEST_SPAN_KEY: &str = "request_span";

/// Observer that represents requests and their attempts as `tracing` spans.
///
/// A `Request` span is opened when the request starts and closed when it resolves.
/// Each attempt gets an `Attempt` span, a child of the request span.
/// Spans nobody is interested in are not created at all.
#[derive(Debug, Default, Clone)]
pub struct RequestTracer {
    include_statement: bool,
}

impl RequestTracer {
    /// Creates a tracer that does not record statement contents.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `db.namespace` and `db.query.text` should be recorded on request spans.
    ///
    /// Statements may contain sensitive data, so this is disabled by default.
    pub fn include_statement(mut self, include: bool) -> Self {
        self.include_statement = include;
        self
    }
}

#[async_trait]
impl RequestObserver for RequestTracer {
    fn on_speculative_execution(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
        delay: Duration,
    ) -> Result<(), ObserverError> {
        if let Some(span) = request.get_item::<Span>(REQUEST_SPAN_KEY) {
            span.in_scope(|| {
                trace!(
                    node = %host.node(),
                    execution = host.execution_index(),
                    ?delay,
                    "Starting speculative execution"
                )
            });
        }
        Ok(())
    }

    async fn on_node_start(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        let Some(parent) = request.get_item::<Span>(REQUEST_SPAN_KEY) else {
            return Ok(());
        };
        let span = otel_span!(
            parent: &*parent,
            "Attempt",
            server.address = %host.node().address,
            host_id = %host.host_id(),
            execution = host.execution_index(),
            attempt = host.attempt_number(),
            retry_decision = Empty,
        );
        if !span.is_disabled() {
            request.insert_item(host.item_key(REQUEST_SPAN_KEY), span);
        }
        Ok(())
    }

    async fn on_node_request_error(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
        _error_type: RequestErrorType,
        decision: &RetryDecision,
        error: &RequestAttemptError,
    ) -> Result<(), ObserverError> {
        if let Some(span) = request.take_item::<Span>(&host.item_key(REQUEST_SPAN_KEY)) {
            span.record("retry_decision", debug(decision));
            span.record_error(error);
        }
        Ok(())
    }

    async fn on_node_success(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        if let Some(span) = request.take_item::<Span>(&host.item_key(REQUEST_SPAN_KEY)) {
            span.in_scope(|| trace!("Attempt succeeded"));
        }
        Ok(())
    }

    async fn on_request_start(&self, request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        let span = otel_span!("Request", db.namespace = Empty, db.query.text = Empty,);
        if span.is_disabled() {
            return Ok(());
        }
        if self.include_statement {
            if let Some(statement) = request.statement() {
                span.record_none_explicitly("db.namespace", statement.get_keyspace());
                span.record("db.query.text", statement.contents.as_str());
            }
        }
        request.insert_item(REQUEST_SPAN_KEY, span);
        Ok(())
    }

    async fn on_request_failure(
        &self,
        request: &RequestTrackingInfo<'_>,
        error: &ExecutionError,
    ) -> Result<(), ObserverError> {
        if let Some(span) = request.take_item::<Span>(REQUEST_SPAN_KEY) {
            span.record_error(error);
        }
        Ok(())
    }

    fn on_request_cancelled(&self, request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        if let Some(span) = request.take_item::<Span>(REQUEST_SPAN_KEY) {
            span.in_scope(|| trace!("Request cancelled"));
        }
        Ok(())
    }

    async fn on_request_success(
        &self,
        request: &RequestTrackingInfo<'_>,
        response: &QueryResponse,
    ) -> Result<(), ObserverError> {
        if let Some(span) = request.take_item::<Span>(REQUEST_SPAN_KEY) {
            span.in_scope(|| {
                trace!(
                    coordinator = %response.coordinator.node(),
                    "Request succeeded"
                )
            });
        }
        Ok(())
    }
}
