use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use quorum::errors::{DbError, RequestAttemptError};
use quorum::observability::history::{AttemptResult, HistoryCollector, RequestHistoryResult};
use quorum::observability::{
    HostTrackingInfo, ObserverError, RequestObserver, RequestTracer, RequestTrackingInfo,
};
use quorum::policies::retry::RetryDecision;
use quorum::policies::speculative_execution::SimpleSpeculativeExecutionPolicy;
use quorum::response::QueryResponse;
use quorum::{ExecutionProfile, Session, SessionBuilder};

use crate::utils::{
    coordinator_port, idempotent, overloaded, peers, setup_tracing, Event, InOrderPolicy,
    MockPool, Outcome, Reaction, RecordingObserver,
};

const NODES: [u16; 3] = [9042, 9043, 9044];

fn session_observed_by(
    pool: &MockPool,
    profile: ExecutionProfile,
    observers: Vec<Arc<dyn RequestObserver>>,
) -> Session {
    let profile = profile
        .to_builder()
        .load_balancing_policy(Arc::new(InOrderPolicy))
        .build();
    let mut builder = SessionBuilder::new(Arc::new(pool.clone()))
        .known_peers(peers(&NODES))
        .default_execution_profile_handle(profile.into_handle());
    for observer in observers {
        builder = builder.observer(observer);
    }
    builder.build().unwrap()
}

#[derive(Debug)]
struct FaultyObserver;

#[async_trait]
impl RequestObserver for FaultyObserver {
    fn on_speculative_execution(
        &self,
        _request: &RequestTrackingInfo<'_>,
        _host: &HostTrackingInfo,
        _delay: Duration,
    ) -> Result<(), ObserverError> {
        panic!("on_speculative_execution")
    }

    async fn on_node_start(
        &self,
        _request: &RequestTrackingInfo<'_>,
        _host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        Err(ObserverError::new("on_node_start"))
    }

    async fn on_node_success(
        &self,
        _request: &RequestTrackingInfo<'_>,
        _host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        panic!("on_node_success")
    }

    async fn on_request_start(&self, _request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        Err(ObserverError::new("on_request_start"))
    }

    async fn on_request_success(
        &self,
        _request: &RequestTrackingInfo<'_>,
        _response: &QueryResponse,
    ) -> Result<(), ObserverError> {
        panic!("on_request_success")
    }
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn faulty_observer_does_not_affect_requests() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::after(Duration::from_millis(500), Outcome::Rows)])
        .script(9043, [Reaction::now(Outcome::Rows)]);
    let profile = ExecutionProfile::builder()
        .speculative_execution_policy(Some(Arc::new(SimpleSpeculativeExecutionPolicy {
            max_retry_count: 1,
            retry_interval: Duration::from_millis(100),
        })))
        .build();
    let recording = Arc::new(RecordingObserver::default());
    let session = session_observed_by(
        &pool,
        profile,
        vec![
            Arc::new(FaultyObserver) as Arc<dyn RequestObserver>,
            recording.clone(),
        ],
    );

    let response = session.execute(&idempotent("SELECT 1")).await.unwrap();

    assert_eq!(coordinator_port(&response), 9043);
    // Observers after the faulty one are still notified.
    assert_eq!(
        recording.events(),
        vec![
            Event::RequestStart,
            Event::NodeStart(9042),
            Event::Speculative(9043),
            Event::NodeStart(9043),
            Event::NodeSuccess(9043),
            Event::RequestSuccess(9043),
        ]
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn history_of_retried_request() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(overloaded())]);
    let history = Arc::new(HistoryCollector::new());
    let session = session_observed_by(
        &pool,
        ExecutionProfile::default(),
        vec![history.clone() as Arc<dyn RequestObserver>],
    );

    session.execute(&idempotent("SELECT 1")).await.unwrap();

    let structured = history.clone_structured_history();
    assert_eq!(structured.requests.len(), 1);
    let request = &structured.requests[0];
    assert!(request.speculative_executions.is_empty());
    assert_matches!(request.result, Some(RequestHistoryResult::Success(_)));

    let attempts = &request.non_speculative_execution.attempts;
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].node_addr.port(), 9042);
    assert_matches!(
        &attempts[0].result,
        Some(AttemptResult::Error(
            _,
            RequestAttemptError::DbError(DbError::Overloaded, _),
            RetryDecision::RetryNextTarget(None)
        ))
    );
    assert_eq!(attempts[1].node_addr.port(), 9043);
    assert_matches!(attempts[1].result, Some(AttemptResult::Success(_)));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn history_of_speculative_request() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::after(Duration::from_millis(1000), Outcome::Rows)])
        .script(9043, [Reaction::after(Duration::from_millis(10), Outcome::Rows)]);
    let profile = ExecutionProfile::builder()
        .speculative_execution_policy(Some(Arc::new(SimpleSpeculativeExecutionPolicy {
            max_retry_count: 1,
            retry_interval: Duration::from_millis(100),
        })))
        .build();
    let history = Arc::new(HistoryCollector::new());
    let session = session_observed_by(
        &pool,
        profile,
        vec![history.clone() as Arc<dyn RequestObserver>],
    );

    session.execute(&idempotent("SELECT 1")).await.unwrap();

    let structured = history.take_structured_history();
    let request = &structured.requests[0];
    assert_matches!(request.result, Some(RequestHistoryResult::Success(_)));

    // The cancelled attempt never gets a result.
    let initial = &request.non_speculative_execution.attempts;
    assert_eq!(initial.len(), 1);
    assert_eq!(initial[0].node_addr.port(), 9042);
    assert!(initial[0].result.is_none());

    assert_eq!(request.speculative_executions.len(), 1);
    let speculative = &request.speculative_executions[0].attempts;
    assert_eq!(speculative.len(), 1);
    assert_eq!(speculative[0].node_addr.port(), 9043);
    assert_matches!(speculative[0].result, Some(AttemptResult::Success(_)));

    assert!(history.clone_structured_history().requests.is_empty());
}

/// Passes state between callbacks through the tracking items.
#[derive(Debug, Default)]
struct ItemsObserver {
    handoffs: AtomicUsize,
}

const MARKER_KEY: &str = "test.marker";
const ATTEMPT_KEY: &str = "test.attempt";

#[async_trait]
impl RequestObserver for ItemsObserver {
    async fn on_node_start(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        if request.get_item::<u32>(MARKER_KEY).as_deref() != Some(&7) {
            return Err(ObserverError::new("marker missing on node start"));
        }
        request.insert_item(host.item_key(ATTEMPT_KEY), host.attempt_number());
        Ok(())
    }

    async fn on_node_request_error(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
        _error_type: quorum::errors::RequestErrorType,
        _decision: &RetryDecision,
        _error: &RequestAttemptError,
    ) -> Result<(), ObserverError> {
        if request.take_item::<usize>(&host.item_key(ATTEMPT_KEY)).is_some() {
            self.handoffs.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn on_node_success(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        if request.take_item::<usize>(&host.item_key(ATTEMPT_KEY)).is_some() {
            self.handoffs.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn on_request_start(&self, request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        request.insert_item(MARKER_KEY, 7_u32);
        Ok(())
    }

    async fn on_request_success(
        &self,
        request: &RequestTrackingInfo<'_>,
        _response: &QueryResponse,
    ) -> Result<(), ObserverError> {
        let statement = request.statement().map(|s| s.contents.as_str());
        if request.take_item::<u32>(MARKER_KEY).is_some() && statement == Some("SELECT 1") {
            self.handoffs.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn tracking_items_are_shared_between_callbacks() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(overloaded())]);
    let observer = Arc::new(ItemsObserver::default());
    let session = session_observed_by(
        &pool,
        ExecutionProfile::default(),
        vec![observer.clone() as Arc<dyn RequestObserver>],
    );

    session.execute(&idempotent("SELECT 1")).await.unwrap();

    // Node error, node success and request success each found what was stored before.
    assert_eq!(observer.handoffs.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn request_tracer_does_not_affect_requests() {
    setup_tracing();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry());
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(overloaded())]);
    let recording = Arc::new(RecordingObserver::default());
    let session = session_observed_by(
        &pool,
        ExecutionProfile::default(),
        vec![
            Arc::new(RequestTracer::new().include_statement(true)) as Arc<dyn RequestObserver>,
            recording.clone(),
        ],
    );

    let response = session.execute(&idempotent("SELECT 1")).await.unwrap();

    assert_eq!(coordinator_port(&response), 9043);
    assert_eq!(recording.events().last(), Some(&Event::RequestSuccess(9043)));
}

#[cfg(feature = "metrics")]
#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn session_metrics_count_requests() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(overloaded())])
        .script(9043, [Reaction::after(Duration::from_millis(20), Outcome::Rows)]);
    let session = session_observed_by(&pool, ExecutionProfile::default(), Vec::new());

    session.execute(&idempotent("SELECT 1")).await.unwrap();
    // Not idempotent, so 9042 fails it for good.
    session
        .execute(&quorum::statement::Statement::new("INSERT"))
        .await
        .unwrap_err();

    let metrics = session.get_metrics();
    assert_eq!(metrics.get_requests_num(), 2);
    assert_eq!(metrics.get_errors_num(), 1);
    assert_eq!(metrics.get_attempt_errors_num(), 2);
    assert_eq!(metrics.get_retries_num(), 1);
    assert_eq!(metrics.get_request_timeouts_num(), 0);
    assert_eq!(metrics.get_speculative_executions_num(), 0);
    assert_eq!(metrics.get_latency_avg_ms().unwrap(), 20);
}
