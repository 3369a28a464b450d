//! Collecting history of request executions - retries, speculative, etc.
use std::{
    collections::BTreeMap,
    fmt::{Debug, Display},
    net::SocketAddr,
    sync::Mutex,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::{HostTrackingInfo, ObserverError, RequestObserver, RequestTrackingInfo};
use crate::errors::{ExecutionError, RequestAttemptError, RequestErrorType};
use crate::policies::retry::RetryDecision;
use crate::response::QueryResponse;

const REQUEST_ID_KEY: &str = "history.request_id";
const ATTEMPT_ID_KEY: &str = "history.attempt_id";

/// Id of a single request, i.e. a single call to `Session::execute`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RequestId(pub usize);

/// Id of a single attempt within a request run - a single request sent on some connection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct AttemptId(pub usize);

/// A point in time, in UTC.
pub type TimePoint = DateTime<Utc>;

/// HistoryCollector can be registered as a [`RequestObserver`]
/// to collect all the request history events.
/// Each event is marked with an UTC timestamp.
///
/// It's important to note that even after a request is finished there still might come events related to it,
/// e.g. from attempts that were in progress when the request got resolved.
#[derive(Debug, Default)]
pub struct HistoryCollector {
    data: Mutex<HistoryCollectorData>,
}

/// Raw events collected by [`HistoryCollector`].
#[derive(Debug, Clone)]
pub struct HistoryCollectorData {
    events: Vec<(HistoryEvent, TimePoint)>,
    next_request_id: RequestId,
    next_attempt_id: AttemptId,
}

/// A single collected event.
#[derive(Debug, Clone)]
pub enum HistoryEvent {
    /// A request started.
    NewRequest(RequestId),
    /// A request resolved with a response.
    RequestSuccess(RequestId),
    /// A request resolved with an error.
    RequestError(RequestId, ExecutionError),
    /// A request was dropped by its caller before it resolved.
    RequestCancelled(RequestId),
    /// A speculative execution with the given index started.
    NewSpeculativeExecution(RequestId, usize),
    /// An attempt of the execution with the given index was sent to a node.
    NewAttempt(AttemptId, RequestId, usize, SocketAddr),
    /// An attempt succeeded.
    AttemptSuccess(AttemptId),
    /// An attempt failed and the retry policy made a decision about it.
    AttemptError(AttemptId, RequestAttemptError, RetryDecision),
}

impl HistoryCollectorData {
    fn new() -> HistoryCollectorData {
        HistoryCollectorData {
            events: Vec::new(),
            next_request_id: RequestId(0),
            next_attempt_id: AttemptId(0),
        }
    }

    fn add_event(&mut self, event: HistoryEvent) {
        let event_time: TimePoint = SystemTime::now().into();
        self.events.push((event, event_time));
    }

    /// Collected events, in order of arrival.
    pub fn events(&self) -> &[(HistoryEvent, TimePoint)] {
        &self.events
    }
}

impl Default for HistoryCollectorData {
    fn default() -> HistoryCollectorData {
        HistoryCollectorData::new()
    }
}

impl HistoryCollector {
    /// Creates a new HistoryCollector with empty data.
    pub fn new() -> HistoryCollector {
        HistoryCollector::default()
    }

    /// Clones the data collected by the collector.
    pub fn clone_collected(&self) -> HistoryCollectorData {
        self.do_with_data(|data| data.clone())
    }

    /// Takes the data out of the collector. The collected events are cleared.\
    /// It's possible that after finishing a request and taking out the events
    /// new ones will still come - from attempts that haven't been cancelled yet.
    pub fn take_collected(&self) -> HistoryCollectorData {
        self.do_with_data(|data| {
            let mut data_to_swap = HistoryCollectorData {
                events: Vec::new(),
                next_request_id: data.next_request_id,
                next_attempt_id: data.next_attempt_id,
            };
            std::mem::swap(&mut data_to_swap, data);
            data_to_swap
        })
    }

    /// Clone the collected events and convert them to StructuredHistory.
    pub fn clone_structured_history(&self) -> StructuredHistory {
        StructuredHistory::from(&self.clone_collected())
    }

    /// Take the collected events out, just like in `take_collected` and convert them to StructuredHistory.
    pub fn take_structured_history(&self) -> StructuredHistory {
        StructuredHistory::from(&self.take_collected())
    }

    /// Lock the data mutex and perform an operation on it.
    fn do_with_data<OpRetType>(
        &self,
        do_fn: impl FnOnce(&mut HistoryCollectorData) -> OpRetType,
    ) -> OpRetType {
        match self.data.lock() {
            Ok(mut data) => do_fn(&mut data),
            Err(poison_error) => {
                // HistoryCollector isn't that important, keep going on dummy data.
                warn!("HistoryCollector - mutex poisoned! Error: {}", poison_error);
                let mut dummy_data: HistoryCollectorData = HistoryCollectorData::default();
                do_fn(&mut dummy_data)
            }
        }
    }

    fn request_id(request: &RequestTrackingInfo<'_>) -> Result<RequestId, ObserverError> {
        request
            .get_item::<RequestId>(REQUEST_ID_KEY)
            .map(|id| *id)
            .ok_or_else(|| ObserverError::new("HistoryCollector: request was not started"))
    }

    fn finished_attempt_id(
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<AttemptId, ObserverError> {
        request
            .take_item::<AttemptId>(&host.item_key(ATTEMPT_ID_KEY))
            .map(|id| *id)
            .ok_or_else(|| {
                ObserverError::new(format!(
                    "HistoryCollector: attempt on {} finished but was not started",
                    host.node()
                ))
            })
    }
}

#[async_trait]
impl RequestObserver for HistoryCollector {
    fn on_speculative_execution(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
        _delay: Duration,
    ) -> Result<(), ObserverError> {
        let request_id = Self::request_id(request)?;
        self.do_with_data(|data| {
            data.add_event(HistoryEvent::NewSpeculativeExecution(
                request_id,
                host.execution_index(),
            ))
        });
        Ok(())
    }

    async fn on_node_start(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        let request_id = Self::request_id(request)?;
        let attempt_id = self.do_with_data(|data| {
            let new_attempt_id: AttemptId = data.next_attempt_id;
            data.next_attempt_id.0 += 1;
            data.add_event(HistoryEvent::NewAttempt(
                new_attempt_id,
                request_id,
                host.execution_index(),
                host.node().address,
            ));
            new_attempt_id
        });
        request.insert_item(host.item_key(ATTEMPT_ID_KEY), attempt_id);
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
        let attempt_id = Self::finished_attempt_id(request, host)?;
        self.do_with_data(|data| {
            data.add_event(HistoryEvent::AttemptError(
                attempt_id,
                error.clone(),
                decision.clone(),
            ))
        });
        Ok(())
    }

    async fn on_node_success(
        &self,
        request: &RequestTrackingInfo<'_>,
        host: &HostTrackingInfo,
    ) -> Result<(), ObserverError> {
        let attempt_id = Self::finished_attempt_id(request, host)?;
        self.do_with_data(|data| data.add_event(HistoryEvent::AttemptSuccess(attempt_id)));
        Ok(())
    }

    async fn on_request_start(&self, request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        let request_id = self.do_with_data(|data| {
            let new_request_id: RequestId = data.next_request_id;
            data.next_request_id.0 += 1;
            data.add_event(HistoryEvent::NewRequest(new_request_id));
            new_request_id
        });
        request.insert_item(REQUEST_ID_KEY, request_id);
        Ok(())
    }

    async fn on_request_failure(
        &self,
        request: &RequestTrackingInfo<'_>,
        error: &ExecutionError,
    ) -> Result<(), ObserverError> {
        let request_id = Self::request_id(request)?;
        self.do_with_data(|data| {
            data.add_event(HistoryEvent::RequestError(request_id, error.clone()))
        });
        Ok(())
    }

    fn on_request_cancelled(&self, request: &RequestTrackingInfo<'_>) -> Result<(), ObserverError> {
        let request_id = Self::request_id(request)?;
        self.do_with_data(|data| data.add_event(HistoryEvent::RequestCancelled(request_id)));
        Ok(())
    }

    async fn on_request_success(
        &self,
        request: &RequestTrackingInfo<'_>,
        _response: &QueryResponse,
    ) -> Result<(), ObserverError> {
        let request_id = Self::request_id(request)?;
        self.do_with_data(|data| data.add_event(HistoryEvent::RequestSuccess(request_id)));
        Ok(())
    }
}

/// Structured representation of requests history.\
/// HistoryCollector collects raw events which later can be converted
/// to this pretty representation.\
/// It has a `Display` impl which can be used for printing pretty request history.
#[derive(Debug, Clone)]
pub struct StructuredHistory {
    /// Requests in order of their start.
    pub requests: Vec<RequestHistory>,
}

/// History of one request.
#[derive(Debug, Clone)]
pub struct RequestHistory {
    /// When the request started.
    pub start_time: TimePoint,
    /// The initial execution.
    pub non_speculative_execution: ExecutionHistory,
    /// Speculative executions, in order of their start.
    pub speculative_executions: Vec<ExecutionHistory>,
    /// How the request ended, if it did.
    pub result: Option<RequestHistoryResult>,
}

/// How a request ended.
#[derive(Debug, Clone)]
pub enum RequestHistoryResult {
    /// With a response.
    Success(TimePoint),
    /// With an error.
    Error(TimePoint, ExecutionError),
    /// Dropped by the caller.
    Cancelled(TimePoint),
}

/// Sequence of attempts of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    /// When the execution started.
    pub start_time: TimePoint,
    /// Attempts in order of sending.
    pub attempts: Vec<AttemptHistory>,
}

/// History of one attempt.
#[derive(Debug, Clone)]
pub struct AttemptHistory {
    /// When the attempt was sent.
    pub send_time: TimePoint,
    /// Where it was sent.
    pub node_addr: SocketAddr,
    /// How the attempt ended, if it did.
    pub result: Option<AttemptResult>,
}

/// How an attempt ended.
#[derive(Debug, Clone)]
pub enum AttemptResult {
    /// It succeeded.
    Success(TimePoint),
    /// It failed, and the retry policy decided what next.
    Error(TimePoint, RequestAttemptError, RetryDecision),
}

impl From<&HistoryCollectorData> for StructuredHistory {
    fn from(data: &HistoryCollectorData) -> StructuredHistory {
        let mut attempts: BTreeMap<AttemptId, AttemptHistory> = BTreeMap::new();
        let mut requests: BTreeMap<RequestId, RequestHistory> = BTreeMap::new();
        let mut executions: BTreeMap<(RequestId, usize), ExecutionHistory> = BTreeMap::new();

        // Collect basic data about requests, attempts and speculative executions
        for (event, event_time) in &data.events {
            match event {
                HistoryEvent::NewAttempt(attempt_id, _, _, node_addr) => {
                    attempts.insert(
                        *attempt_id,
                        AttemptHistory {
                            send_time: *event_time,
                            node_addr: *node_addr,
                            result: None,
                        },
                    );
                }
                HistoryEvent::AttemptSuccess(attempt_id) => {
                    if let Some(attempt) = attempts.get_mut(attempt_id) {
                        attempt.result = Some(AttemptResult::Success(*event_time));
                    }
                }
                HistoryEvent::AttemptError(attempt_id, error, retry_decision) => {
                    match attempts.get_mut(attempt_id) {
                        Some(attempt) => {
                            if attempt.result.is_some() {
                                warn!("StructuredHistory - attempt with id {:?} has multiple results", attempt_id);
                            }
                            attempt.result = Some(AttemptResult::Error(*event_time, error.clone(), retry_decision.clone()));
                        },
                        None => warn!("StructuredHistory - attempt with id {:?} finished with an error but not created", attempt_id)
                    }
                }
                HistoryEvent::NewRequest(request_id) => {
                    requests.insert(
                        *request_id,
                        RequestHistory {
                            start_time: *event_time,
                            non_speculative_execution: ExecutionHistory {
                                start_time: *event_time,
                                attempts: Vec::new(),
                            },
                            speculative_executions: Vec::new(),
                            result: None,
                        },
                    );
                }
                HistoryEvent::RequestSuccess(request_id) => {
                    if let Some(request) = requests.get_mut(request_id) {
                        request.result = Some(RequestHistoryResult::Success(*event_time));
                    }
                }
                HistoryEvent::RequestError(request_id, error) => {
                    if let Some(request) = requests.get_mut(request_id) {
                        request.result =
                            Some(RequestHistoryResult::Error(*event_time, error.clone()));
                    }
                }
                HistoryEvent::RequestCancelled(request_id) => {
                    if let Some(request) = requests.get_mut(request_id) {
                        request.result = Some(RequestHistoryResult::Cancelled(*event_time));
                    }
                }
                HistoryEvent::NewSpeculativeExecution(request_id, execution_index) => {
                    executions.insert(
                        (*request_id, *execution_index),
                        ExecutionHistory {
                            start_time: *event_time,
                            attempts: Vec::new(),
                        },
                    );
                }
            }
        }

        // Move attempts to their executions
        for (event, _) in &data.events {
            if let HistoryEvent::NewAttempt(attempt_id, request_id, execution_index, _) = event {
                if let Some(attempt) = attempts.remove(attempt_id) {
                    if *execution_index == 0 {
                        if let Some(request) = requests.get_mut(request_id) {
                            request.non_speculative_execution.attempts.push(attempt);
                        }
                    } else if let Some(execution) =
                        executions.get_mut(&(*request_id, *execution_index))
                    {
                        execution.attempts.push(attempt);
                    }
                }
            }
        }

        // Move speculative executions to their requests, ordered by index
        for ((request_id, _), execution) in executions {
            if let Some(request) = requests.get_mut(&request_id) {
                request.speculative_executions.push(execution);
            }
        }

        StructuredHistory {
            requests: requests.into_values().collect(),
        }
    }
}

/// StructuredHistory should be used for printing request history.
impl Display for StructuredHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Requests History:")?;
        for (i, request) in self.requests.iter().enumerate() {
            writeln!(f, "=== Request #{i} ===")?;
            writeln!(f, "| start_time: {}", request.start_time)?;
            writeln!(f, "| Non-speculative attempts:")?;
            write_execution_attempts(&request.non_speculative_execution, f)?;
            for (spec_i, speculative) in request.speculative_executions.iter().enumerate() {
                writeln!(f, "|")?;
                writeln!(f, "|")?;
                writeln!(f, "| > Speculative execution #{spec_i}")?;
                writeln!(f, "| execution start time: {}", speculative.start_time)?;
                write_execution_attempts(speculative, f)?;
            }
            writeln!(f, "|")?;
            match &request.result {
                Some(RequestHistoryResult::Success(succ_time)) => {
                    writeln!(f, "| Request successful at {succ_time}")?;
                }
                Some(RequestHistoryResult::Error(err_time, error)) => {
                    writeln!(f, "| Request failed at {err_time}")?;
                    writeln!(f, "| Error: {error}")?;
                }
                Some(RequestHistoryResult::Cancelled(cancel_time)) => {
                    writeln!(f, "| Request cancelled at {cancel_time}")?;
                }
                None => writeln!(f, "| Request still running - no final result yet")?,
            };
            writeln!(f, "=================")?;
        }
        Ok(())
    }
}

fn write_execution_attempts(
    execution: &ExecutionHistory,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    for (i, attempt) in execution.attempts.iter().enumerate() {
        if i != 0 {
            writeln!(f, "|")?;
        }
        writeln!(f, "| - Attempt #{} sent to {}", i, attempt.node_addr)?;
        writeln!(f, "|   request send time: {}", attempt.send_time)?;
        match &attempt.result {
            Some(AttemptResult::Success(time)) => writeln!(f, "|   Success at {time}")?,
            Some(AttemptResult::Error(time, err, retry_decision)) => {
                writeln!(f, "|   Error at {time}")?;
                writeln!(f, "|   Error: {err}")?;
                writeln!(f, "|   Retry decision: {retry_decision:?}")?;
            }
            None => writeln!(f, "|   No result yet")?,
        };
    }

    Ok(())
}
