use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use quorum::cluster::{ClusterState, NodeRef, Peer};
use quorum::errors::{
    BrokenConnectionError, BrokenConnectionErrorKind, ConnectionPoolError, ExecutionError,
    RequestAttemptError, RequestErrorType,
};
use quorum::network::{Connection, ConnectionPool};
use quorum::observability::{
    HostTrackingInfo, ObserverError, RequestObserver, RequestTrackingInfo,
};
use quorum::policies::load_balancing::{FallbackPlan, LoadBalancingPolicy, RoutingInfo};
use quorum::policies::retry::{RequestInfo, RetryDecision, RetryPolicy};
use quorum::response::QueryResponse;
use quorum::statement::{Consistency, SerialConsistency, Statement};
use quorum::{ExecutionProfile, Session, SessionBuilder};
use quorum_cql::frame::response::error::Error as ErrorResponse;
use quorum_cql::frame::response::Response;
use quorum_cql::DbError;
use uuid::Uuid;

pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

pub(crate) fn peers(ports: &[u16]) -> Vec<Peer> {
    ports
        .iter()
        .map(|port| Peer {
            host_id: Uuid::new_v4(),
            address: SocketAddr::from(([127, 0, 0, 1], *port)),
            datacenter: Some("dc1".to_owned()),
            rack: None,
        })
        .collect()
}

/// What a mock node answers to a request.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    /// A RESULT response.
    Rows,
    /// An ERROR response.
    Error(DbError),
    /// A READY response, which no statement should get.
    Ready,
    /// The connection breaks.
    Broken,
    /// No response ever comes.
    Hang,
}

#[derive(Debug, Clone)]
pub(crate) struct Reaction {
    delay: Duration,
    outcome: Outcome,
}

impl Reaction {
    pub(crate) fn now(outcome: Outcome) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome,
        }
    }

    pub(crate) fn after(delay: Duration, outcome: Outcome) -> Self {
        Self { delay, outcome }
    }
}

#[derive(Debug, Default)]
struct NodeScript {
    reactions: VecDeque<Reaction>,
    refuse_connections: bool,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: Mutex<HashMap<u16, NodeScript>>,
    requests: Mutex<Vec<(u16, Consistency)>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockState {
    fn next_reaction(&self, port: u16, consistency: Consistency) -> Reaction {
        self.requests.lock().unwrap().push((port, consistency));
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.entry(port).or_default();
        // The last reaction of a script repeats forever.
        match script.reactions.len() {
            0 => Reaction::now(Outcome::Rows),
            1 => script.reactions[0].clone(),
            _ => script.reactions.pop_front().unwrap(),
        }
    }
}

struct InFlight<'a>(&'a MockState);

impl<'a> InFlight<'a> {
    fn start(state: &'a MockState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connection pool whose nodes answer according to per-node scripts.
/// Nodes without a script answer every request with rows.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockPool {
    state: Arc<MockState>,
}

impl MockPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answers requests to `port` with `reactions`, in order.
    pub(crate) fn script(&self, port: u16, reactions: impl IntoIterator<Item = Reaction>) -> &Self {
        let mut scripts = self.state.scripts.lock().unwrap();
        scripts.entry(port).or_default().reactions.extend(reactions);
        drop(scripts);
        self
    }

    /// Makes acquiring a connection to `port` fail.
    pub(crate) fn refuse(&self, port: u16) -> &Self {
        let mut scripts = self.state.scripts.lock().unwrap();
        scripts.entry(port).or_default().refuse_connections = true;
        drop(scripts);
        self
    }

    /// Ports and consistencies of all requests sent so far, in order.
    pub(crate) fn requests(&self) -> Vec<(u16, Consistency)> {
        self.state.requests.lock().unwrap().clone()
    }

    pub(crate) fn requested_ports(&self) -> Vec<u16> {
        self.requests().into_iter().map(|(port, _)| port).collect()
    }

    pub(crate) fn acquired(&self) -> usize {
        self.state.acquired.load(Ordering::SeqCst)
    }

    /// Connections acquired and not released yet.
    pub(crate) fn in_use(&self) -> usize {
        self.acquired() - self.state.released.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    async fn acquire(&self, node: NodeRef<'_>) -> Result<Arc<dyn Connection>, ConnectionPoolError> {
        let port = node.address.port();
        let refused = self
            .state
            .scripts
            .lock()
            .unwrap()
            .get(&port)
            .is_some_and(|script| script.refuse_connections);
        if refused {
            return Err(ConnectionPoolError::Initializing);
        }
        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection {
            address: node.address,
            state: Arc::clone(&self.state),
        }))
    }

    fn release(&self, _node: NodeRef<'_>, _connection: Arc<dyn Connection>) {
        self.state.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct MockConnection {
    address: SocketAddr,
    state: Arc<MockState>,
}

#[async_trait]
impl Connection for MockConnection {
    fn connect_address(&self) -> SocketAddr {
        self.address
    }

    async fn send_request(
        &self,
        _statement: &Statement,
        consistency: Consistency,
        _serial_consistency: Option<SerialConsistency>,
    ) -> Result<Response, BrokenConnectionError> {
        let port = self.address.port();
        let reaction = self.state.next_reaction(port, consistency);
        let _in_flight = InFlight::start(&self.state);

        tokio::time::sleep(reaction.delay).await;
        match reaction.outcome {
            Outcome::Rows => Ok(Response::Result(Bytes::from(port.to_string()))),
            Outcome::Error(error) => Ok(Response::Error(ErrorResponse::new(
                error,
                format!("mock error from {port}"),
            ))),
            Outcome::Ready => Ok(Response::Ready),
            Outcome::Broken => Err(BrokenConnectionErrorKind::ClosedByServer.into()),
            Outcome::Hang => futures::future::pending().await,
        }
    }
}

/// Tries nodes in the order in which they were given to the cluster.
#[derive(Debug)]
pub(crate) struct InOrderPolicy;

impl LoadBalancingPolicy for InOrderPolicy {
    fn pick<'a>(
        &'a self,
        _request: &'a RoutingInfo,
        cluster: &'a ClusterState,
    ) -> Option<NodeRef<'a>> {
        cluster.candidate_hosts().next()
    }

    fn fallback<'a>(
        &'a self,
        _request: &'a RoutingInfo,
        cluster: &'a ClusterState,
    ) -> FallbackPlan<'a> {
        Box::new(cluster.get_nodes_info().iter())
    }

    fn name(&self) -> String {
        "InOrderPolicy".to_owned()
    }
}

/// Retry policy defined by a closure.
pub(crate) struct FnRetryPolicy<F>(F);

impl<F> FnRetryPolicy<F>
where
    F: Fn(&RequestInfo) -> RetryDecision + Send + Sync,
{
    pub(crate) fn new(decide: F) -> Self {
        Self(decide)
    }
}

impl<F> std::fmt::Debug for FnRetryPolicy<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnRetryPolicy")
    }
}

impl<F> RetryPolicy for FnRetryPolicy<F>
where
    F: Fn(&RequestInfo) -> RetryDecision + Send + Sync,
{
    fn decide_should_retry(&self, request_info: RequestInfo) -> RetryDecision {
        (self.0)(&request_info)
    }
}

/// A notification, with hosts identified by port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    RequestStart,
    Speculative(u16),
    NodeStart(u16),
    NodeError(u16, RequestErrorType, RetryDecision),
    NodeSuccess(u16),
    RequestSuccess(u16),
    RequestFailure,
    RequestCancelled,
}

#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

fn port(host: &HostTrackingInfo) -> u16 {
    host.node().address.port()
}

#[async_trait]
impl RequestObserver for RecordingObserver {
    fn on_speculative_execution(
        &self,
        _request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
        _delay: Duration,
    ) -> Result<(), ObserverError> {
        self.record(Event::Speculative(port(host)));
        Ok(())
    }

    async fn on_node_start(
        &self,
        _request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        self.record(Event::NodeStart(port(host)));
        Ok(())
    }

    async fn on_node_request_error(
        &self,
        _request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
        error_type: RequestErrorType,
        decision: &RetryDecision,
        _error: &RequestAttemptError,
    ) -> Result<(), ObserverError> {
        self.record(Event::NodeError(port(host), error_type, decision.clone()));
        Ok(())
    }

    async fn on_node_success(
        &self,
        _request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        self.record(Event::NodeSuccess(port(host)));
        Ok(())
    }

    async fn on_request_start(&self, _request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        self.record(Event::RequestStart);
        Ok(())
    }

    async fn on_request_failure(
        &self,
        _request: &RequestTrackingInfo<'_>,
        _error: &ExecutionError,
    ) -> Result<(), ObserverError> {
        self.record(Event::RequestFailure);
        Ok(())
    }

    fn on_request_cancelled(&self, _request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        self.record(Event::RequestCancelled);
        Ok(())
    }

    async fn on_request_success(
        &self,
        _request: &RequestTrackingInfo<'_>,
        response: &QueryResponse,
    ) -> Result<(), ObserverError> {
        self.record(Event::RequestSuccess(
            response.coordinator.connection_address().port(),
        ));
        Ok(())
    }
}

/// A session over `ports` that tries nodes in order and reports to the returned observer.
pub(crate) fn session_with(
    pool: &MockPool,
    ports: &[u16],
    profile: ExecutionProfile,
) -> (Session, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    let profile = profile
        .to_builder()
        .load_balancing_policy(Arc::new(InOrderPolicy))
        .build();
    let session = SessionBuilder::new(Arc::new(pool.clone()))
        .known_peers(peers(ports))
        .default_execution_profile_handle(profile.into_handle())
        .observer(observer.clone())
        .build()
        .unwrap();
    (session, observer)
}

pub(crate) fn idempotent(text: &str) -> Statement {
    let mut statement = Statement::new(text);
    statement.set_is_idempotent(true);
    statement
}

pub(crate) fn coordinator_port(response: &QueryResponse) -> u16 {
    response.coordinator.node().address.port()
}

pub(crate) fn overloaded() -> Outcome {
    Outcome::Error(DbError::Overloaded)
}
