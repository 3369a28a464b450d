//! Observing the lifecycle of requests.
//!
//! A session notifies a single [`RequestObserver`] about request starts,
//! attempts on nodes, speculative executions and outcomes.
//! Several observers can be combined with [`CompositeObserver`].
//!
//! Provided observers:
//! - [`HistoryCollector`] records every event with a timestamp,
//! - [`RequestTracer`] represents requests and attempts as `tracing` spans,
//! - `Metrics` (with the `metrics` feature) counts requests and aggregates latencies.

mod composite;
pub mod history;
#[cfg(feature = "metrics")]
pub mod metrics;
mod observer;
mod request_tracer;
mod tracking;

pub use composite::CompositeObserver;
pub use history::HistoryCollector;
pub use observer::{ObserverError, RequestObserver};
pub(crate) use observer::ObserverNotifier;
pub use request_tracer::{RequestTracer, REQUEST_SPAN_KEY};
pub use tracking::{HostTrackingInfo, RequestTrackingInfo};
