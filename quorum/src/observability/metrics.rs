//! Counters and latency statistics of the requests of a session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use histogram::{AtomicHistogram, Histogram};
use thiserror::Error;
use tokio::time::Instant;

use super::{HostTrackingInfo, ObserverError, RequestObserver, RequestTrackingInfo};
use crate::errors::{ExecutionError, RequestAttemptError, RequestErrorType};
use crate::policies::retry::RetryDecision;

const ORDER_TYPE: Ordering = Ordering::Relaxed;

const ATTEMPT_START_KEY: &str = "metrics.attempt_start";

/// Error that occured upon a metrics operation.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum MetricsError {
    /// The histogram rejected an operation.
    #[error("Histogram error: {0}")]
    HistogramError(#[from] Arc<dyn std::error::Error + Send + Sync>),
    /// Nothing was recorded yet.
    #[error("Histogram is empty")]
    Empty,
}

/// Request counters and attempt latencies of a session.
///
/// It is a [`RequestObserver`]; a session built with the `metrics` feature
/// registers one automatically.
pub struct Metrics {
    requests_num: AtomicU64,
    errors_num: AtomicU64,
    request_timeouts_num: AtomicU64,
    cancelled_requests_num: AtomicU64,
    attempt_errors_num: AtomicU64,
    retries_num: AtomicU64,
    speculative_executions_num: AtomicU64,
    histogram: Arc<AtomicHistogram>,
}

impl Metrics {
    /// Creates metrics with all counters set to zero.
    pub fn new() -> Result<Self, MetricsError> {
        // Configuration:
        //  - exponent of max value: n = 16
        //  - inverse exponent of relative error: p = 12,
        //  - max value: N = 65535,
        //  - relative error: e = 0.000244,
        //  - total number of buckets: (n - p + 1) * 2^p = 20480,
        //  - histogram size: 1.7 MiB.
        // Reference for calculating these values:
        //  - https://observablehq.com/@iopsystems/h2histogram
        let max_value_power = 16;
        let grouping_power = 12;
        let histogram = AtomicHistogram::new(grouping_power, max_value_power)
            .map_err(|err| MetricsError::HistogramError(Arc::new(err)))?;

        Ok(Self {
            requests_num: AtomicU64::new(0),
            errors_num: AtomicU64::new(0),
            request_timeouts_num: AtomicU64::new(0),
            cancelled_requests_num: AtomicU64::new(0),
            attempt_errors_num: AtomicU64::new(0),
            retries_num: AtomicU64::new(0),
            speculative_executions_num: AtomicU64::new(0),
            histogram: Arc::new(histogram),
        })
    }

    /// Saves to histogram latency of completing single attempt.
    ///
    /// # Arguments
    ///
    /// * `latency` - time in milliseconds that should be logged
    pub(crate) fn log_attempt_latency(&self, latency: u64) -> Result<(), MetricsError> {
        self.histogram
            .increment(latency)
            .map_err(|err| MetricsError::HistogramError(Arc::new(err)))
    }

    /// Returns average latency in milliseconds
    pub fn get_latency_avg_ms(&self) -> Result<u64, MetricsError> {
        Self::mean(&self.histogram.load())
    }

    /// Returns latency from histogram for a given percentile
    /// # Arguments
    ///
    /// * `percentile` - float value (0.0 - 100.0)
    pub fn get_latency_percentile_ms(&self, percentile: f64) -> Result<u64, MetricsError> {
        let res = self.histogram.load().percentile(percentile);

        match res {
            Err(err) => Err(MetricsError::HistogramError(Arc::new(err))),

            Ok(None) => Err(MetricsError::Empty),

            Ok(Some(p)) => Ok(p.end()),
        }
    }

    /// Returns counter for started requests
    pub fn get_requests_num(&self) -> u64 {
        self.requests_num.load(ORDER_TYPE)
    }

    /// Returns counter for requests that ended with an error
    pub fn get_errors_num(&self) -> u64 {
        self.errors_num.load(ORDER_TYPE)
    }

    /// Returns counter for requests that ran out of time
    pub fn get_request_timeouts_num(&self) -> u64 {
        self.request_timeouts_num.load(ORDER_TYPE)
    }

    /// Returns counter for requests dropped by their callers before resolving
    pub fn get_cancelled_requests_num(&self) -> u64 {
        self.cancelled_requests_num.load(ORDER_TYPE)
    }

    /// Returns counter for failed attempts
    pub fn get_attempt_errors_num(&self) -> u64 {
        self.attempt_errors_num.load(ORDER_TYPE)
    }

    /// Returns counter measuring how many times a retry policy has decided to retry a request
    pub fn get_retries_num(&self) -> u64 {
        self.retries_num.load(ORDER_TYPE)
    }

    /// Returns counter for started speculative executions
    pub fn get_speculative_executions_num(&self) -> u64 {
        self.speculative_executions_num.load(ORDER_TYPE)
    }

    // The histogram only knows buckets, so the mean counts each bucket as its interval's center.
    fn mean(h: &Histogram) -> Result<u64, MetricsError> {
        let mut weighted_sum = 0_u128;
        let mut count = 0_u128;

        for bucket in h {
            let mid = ((bucket.start() + bucket.end()) / 2) as u128;
            weighted_sum += mid * bucket.count() as u128;
            count += bucket.count() as u128;
        }

        if count != 0 {
            Ok((weighted_sum / count) as u64)
        } else {
            Err(MetricsError::Empty)
        }
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("requests_num", &self.requests_num)
            .field("errors_num", &self.errors_num)
            .field("request_timeouts_num", &self.request_timeouts_num)
            .field("cancelled_requests_num", &self.cancelled_requests_num)
            .field("attempt_errors_num", &self.attempt_errors_num)
            .field("retries_num", &self.retries_num)
            .field("speculative_executions_num", &self.speculative_executions_num)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RequestObserver for Metrics {
    fn on_speculative_execution(
        &self,
        _request: &RequestTrackingInfo<'_>,
        _host: &HostTrackingInfo,
        _delay: Duration,
    ) -> Result<(), ObserverError> {
        self.speculative_executions_num.fetch_add(1, ORDER_TYPE);
        Ok(())
    }

    async fn on_node_start(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        request.insert_item(host.item_key(ATTEMPT_START_KEY), Instant::now());
        Ok(())
    }

    async fn on_node_request_error(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
        _error_type: RequestErrorType,
        decision: &RetryDecision,
        _error: &RequestAttemptError,
    ) -> Result<(), ObserverError> {
        request.take_item::<Instant>(&host.item_key(ATTEMPT_START_KEY));
        self.attempt_errors_num.fetch_add(1, ORDER_TYPE);
        if decision.is_retry() {
            self.retries_num.fetch_add(1, ORDER_TYPE);
        }
        Ok(())
    }

    async fn on_node_success(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        let Some(started) = request.take_item::<Instant>(&host.item_key(ATTEMPT_START_KEY)) else {
            return Err(ObserverError::new("Metrics: attempt finished but was not started"));
        };
        let latency = started.elapsed().as_millis() as u64;
        self.log_attempt_latency(latency).map_err(ObserverError::new)
    }

    async fn on_request_start(&self, _request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        self.requests_num.fetch_add(1, ORDER_TYPE);
        Ok(())
    }

    fn on_request_cancelled(&self, _request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        self.cancelled_requests_num.fetch_add(1, ORDER_TYPE);
        Ok(())
    }

    async fn on_request_failure(
        &self,
        _request: &RequestTrackingInfo<'_>,
        error: &ExecutionError,
    ) -> Result<(), ObserverError> {
        self.errors_num.fetch_add(1, ORDER_TYPE);
        if let ExecutionError::RequestTimeout(_) = error {
            self.request_timeouts_num.fetch_add(1, ORDER_TYPE);
        }
        Ok(())
    }
}
