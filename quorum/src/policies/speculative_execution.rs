//! Speculative execution mechanism allows the driver to send speculative requests to
//! multiple nodes in the cluster when the current target takes too long to respond.
//! This can help reduce latency for requests that may be slow due to network issues
//! or node load.
//!
//! Speculative executions are only ever started for idempotent statements.

use std::time::Duration;

#[cfg(feature = "metrics")]
use crate::observability::metrics::Metrics;
use crate::statement::Statement;

/// [`Context`] is passed as an argument to [`SpeculativeExecutionPolicy`] methods.
#[non_exhaustive]
pub struct Context<'a> {
    /// The statement being executed.
    pub statement: &'a Statement,

    /// How many executions were started so far, the initial one included.
    pub executions_started: usize,

    #[cfg(feature = "metrics")]
    /// Metrics instance that can be used as a context for deciding on speculative
    /// execution.
    pub metrics: &'a Metrics,
}

/// The policy that decides if the driver will send speculative queries to the
/// next targets when the current target takes too long to respond.
///
/// The policy holds no per-request state. After each started execution the
/// request handler asks for the delay after which the next one should start.
pub trait SpeculativeExecutionPolicy: std::fmt::Debug + Send + Sync {
    /// Returns the delay after which another execution should be started,
    /// or `None` if no further speculative execution should happen.
    fn next_delay(&self, context: &Context) -> Option<Duration>;
}

/// A [`SpeculativeExecutionPolicy`] that schedules a given number of speculative
/// executions, separated by a fixed delay.
#[derive(Debug, Clone)]
pub struct SimpleSpeculativeExecutionPolicy {
    /// The maximum number of speculative executions that will be triggered
    /// for a given request (does not include the initial request)
    pub max_retry_count: usize,

    /// The delay between each speculative execution
    pub retry_interval: Duration,
}

impl SpeculativeExecutionPolicy for SimpleSpeculativeExecutionPolicy {
    fn next_delay(&self, context: &Context) -> Option<Duration> {
        let speculative_started = context.executions_started.saturating_sub(1);
        (speculative_started < self.max_retry_count).then_some(self.retry_interval)
    }
}

/// A policy that triggers speculative executions when the request to the current
/// target is above a given percentile.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct PercentileSpeculativeExecutionPolicy {
    /// The maximum number of speculative executions that will be triggered
    /// for a given request (does not include the initial request)
    pub max_retry_count: usize,

    /// The percentile that a request's latency must fall into to be considered
    /// slow (ex: 99.0)
    pub percentile: f64,
}

#[cfg(feature = "metrics")]
impl SpeculativeExecutionPolicy for PercentileSpeculativeExecutionPolicy {
    fn next_delay(&self, context: &Context) -> Option<Duration> {
        if context.executions_started.saturating_sub(1) >= self.max_retry_count {
            return None;
        }
        let interval = context.metrics.get_latency_percentile_ms(self.percentile);
        let ms = match interval {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(
                    "Failed to get latency percentile ({}), defaulting to 100 ms",
                    e
                );
                100
            }
        };
        Some(Duration::from_millis(ms))
    }
}
