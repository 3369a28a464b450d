use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use quorum::errors::{
    CqlResponseKind, DbError, ExecutionError, RequestAttemptError, RequestErrorType, WriteType,
};
use quorum::policies::retry::{
    DowngradingConsistencyRetryPolicy, FallthroughRetryPolicy, RetryDecision,
};
use quorum::statement::{Consistency, Statement};
use quorum::ExecutionProfile;
use tokio::time::Instant;

use crate::utils::{
    coordinator_port, idempotent, overloaded, session_with, setup_tracing, Event, FnRetryPolicy,
    MockPool, Outcome, Reaction,
};

const NODES: [u16; 3] = [9042, 9043, 9044];

fn write_timeout() -> Outcome {
    Outcome::Error(DbError::WriteTimeout {
        consistency: Consistency::LocalQuorum,
        received: 1,
        required: 2,
        write_type: WriteType::Simple,
    })
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn first_node_answers() {
    setup_tracing();
    let pool = MockPool::new();
    let (session, observer) = session_with(&pool, &NODES, ExecutionProfile::default());

    let response = session.execute(&idempotent("SELECT 1")).await.unwrap();

    assert_eq!(coordinator_port(&response), 9042);
    assert_eq!(
        observer.events(),
        vec![
            Event::RequestStart,
            Event::NodeStart(9042),
            Event::NodeSuccess(9042),
            Event::RequestSuccess(9042),
        ]
    );
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn overloaded_nodes_are_skipped() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(overloaded())])
        .script(9043, [Reaction::now(overloaded())]);
    let (session, observer) = session_with(&pool, &NODES, ExecutionProfile::default());

    let response = session.execute(&idempotent("SELECT 1")).await.unwrap();

    assert_eq!(coordinator_port(&response), 9044);
    let next = RetryDecision::RetryNextTarget(None);
    assert_eq!(
        observer.events(),
        vec![
            Event::RequestStart,
            Event::NodeStart(9042),
            Event::NodeError(9042, RequestErrorType::Overloaded, next.clone()),
            Event::NodeStart(9043),
            Event::NodeError(9043, RequestErrorType::Overloaded, next),
            Event::NodeStart(9044),
            Event::NodeSuccess(9044),
            Event::RequestSuccess(9044),
        ]
    );
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn exhausted_plan_reports_every_host_error() {
    setup_tracing();
    let pool = MockPool::new();
    for port in NODES {
        pool.script(port, [Reaction::now(overloaded())]);
    }
    let (session, observer) = session_with(&pool, &NODES, ExecutionProfile::default());

    let error = session.execute(&idempotent("SELECT 1")).await.unwrap_err();

    let ExecutionError::NoHostAvailable(no_host) = error else {
        panic!("Expected NoHostAvailable, got {error:?}");
    };
    let failed_ports: Vec<u16> = no_host.errors.iter().map(|e| e.address.port()).collect();
    assert_eq!(failed_ports, NODES);
    for host_error in &no_host.errors {
        assert_matches!(
            host_error.error,
            RequestAttemptError::DbError(DbError::Overloaded, _)
        );
    }
    assert_eq!(observer.events().last(), Some(&Event::RequestFailure));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn rethrow_ends_the_request() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(overloaded())]);
    let (session, observer) = session_with(&pool, &NODES, ExecutionProfile::default());

    // Not idempotent, so the default policy does not retry.
    let error = session
        .execute(&Statement::new("INSERT INTO t (a) VALUES (1)"))
        .await
        .unwrap_err();

    assert_matches!(
        error,
        ExecutionError::LastAttemptError(RequestAttemptError::DbError(DbError::Overloaded, _))
    );
    assert_eq!(pool.requested_ports(), vec![9042]);
    assert_eq!(
        observer.events(),
        vec![
            Event::RequestStart,
            Event::NodeStart(9042),
            Event::NodeError(9042, RequestErrorType::Overloaded, RetryDecision::Rethrow),
            Event::RequestFailure,
        ]
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn broken_connection_is_not_retried_for_non_idempotent_statements() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(Outcome::Broken)]);
    let (session, _observer) = session_with(&pool, &NODES, ExecutionProfile::default());

    let error = session
        .execute(&Statement::new("UPDATE t SET a = a + 1"))
        .await
        .unwrap_err();

    assert_matches!(
        error,
        ExecutionError::LastAttemptError(RequestAttemptError::BrokenConnectionError(_))
    );
    assert_eq!(pool.requested_ports(), vec![9042]);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn same_target_is_retried_until_rethrow() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(write_timeout())]);
    let policy = FnRetryPolicy::new(|info| {
        if info.attempt_number < 3 {
            RetryDecision::RetrySameTarget(None)
        } else {
            RetryDecision::Rethrow
        }
    });
    let profile = ExecutionProfile::builder()
        .retry_policy(Arc::new(policy))
        .build();
    let (session, observer) = session_with(&pool, &NODES, profile);

    let error = session.execute(&idempotent("INSERT")).await.unwrap_err();

    assert_matches!(
        error,
        ExecutionError::LastAttemptError(RequestAttemptError::DbError(
            DbError::WriteTimeout { .. },
            _
        ))
    );
    assert_eq!(pool.requested_ports(), vec![9042, 9042, 9042]);
    let same = RetryDecision::RetrySameTarget(None);
    assert_eq!(
        observer.events(),
        vec![
            Event::RequestStart,
            Event::NodeStart(9042),
            Event::NodeError(9042, RequestErrorType::WriteTimeout, same.clone()),
            Event::NodeStart(9042),
            Event::NodeError(9042, RequestErrorType::WriteTimeout, same),
            Event::NodeStart(9042),
            Event::NodeError(9042, RequestErrorType::WriteTimeout, RetryDecision::Rethrow),
            Event::RequestFailure,
        ]
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn same_target_retries_are_capped() {
    setup_tracing();
    let pool = MockPool::new();
    for port in NODES {
        pool.script(port, [Reaction::now(overloaded())]);
    }
    let policy = FnRetryPolicy::new(|_| {
        RetryDecision::RetrySameTarget(None)
    });
    let profile = ExecutionProfile::builder()
        .retry_policy(Arc::new(policy))
        .max_same_target_retries(1)
        .build();
    let (session, _observer) = session_with(&pool, &NODES, profile);

    let error = session.execute(&idempotent("SELECT 1")).await.unwrap_err();

    assert_eq!(
        pool.requested_ports(),
        vec![9042, 9042, 9043, 9043, 9044, 9044]
    );
    assert_matches!(error, ExecutionError::NoHostAvailable(e) if e.errors.len() == 6);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn consistency_override_persists() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(overloaded())])
        .script(9043, [Reaction::now(overloaded())]);
    let policy = FnRetryPolicy::new(|info| {
        if info.attempt_number == 1 {
            RetryDecision::RetryNextTarget(Some(Consistency::One))
        } else {
            RetryDecision::RetryNextTarget(None)
        }
    });
    let profile = ExecutionProfile::builder()
        .retry_policy(Arc::new(policy))
        .build();
    let (session, _observer) = session_with(&pool, &NODES, profile);

    let response = session.execute(&idempotent("SELECT 1")).await.unwrap();

    assert_eq!(coordinator_port(&response), 9044);
    assert_eq!(
        pool.requests(),
        vec![
            (9042, Consistency::LocalQuorum),
            (9043, Consistency::One),
            (9044, Consistency::One),
        ]
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn statement_consistency_takes_precedence() {
    setup_tracing();
    let pool = MockPool::new();
    let profile = ExecutionProfile::builder()
        .consistency(Consistency::Quorum)
        .build();
    let (session, _observer) = session_with(&pool, &NODES, profile);

    session.execute(&Statement::new("SELECT 1")).await.unwrap();
    let mut statement = Statement::new("SELECT 1");
    statement.set_consistency(Consistency::All);
    session.execute(&statement).await.unwrap();

    assert_eq!(
        pool.requests(),
        vec![(9042, Consistency::Quorum), (9042, Consistency::All)]
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn statement_retry_policy_takes_precedence() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(overloaded())]);
    let (session, _observer) = session_with(&pool, &NODES, ExecutionProfile::default());

    let mut statement = idempotent("SELECT 1");
    statement.set_retry_policy(Some(Arc::new(FallthroughRetryPolicy::new())));
    let error = session.execute(&statement).await.unwrap_err();

    assert_matches!(error, ExecutionError::LastAttemptError(_));
    assert_eq!(pool.requested_ports(), vec![9042]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn ignored_error_moves_to_the_next_node() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(overloaded())]);
    let policy = FnRetryPolicy::new(|_| RetryDecision::Ignore);
    let profile = ExecutionProfile::builder()
        .retry_policy(Arc::new(policy))
        .build();
    let (session, observer) = session_with(&pool, &NODES, profile);

    let response = session.execute(&idempotent("SELECT 1")).await.unwrap();

    assert_eq!(coordinator_port(&response), 9043);
    assert_eq!(
        observer.events(),
        vec![
            Event::RequestStart,
            Event::NodeStart(9042),
            Event::NodeError(9042, RequestErrorType::Overloaded, RetryDecision::Ignore),
            Event::NodeStart(9043),
            Event::NodeSuccess(9043),
            Event::RequestSuccess(9043),
        ]
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn ignored_error_on_the_last_node_is_returned() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(overloaded())])
        .script(9043, [Reaction::now(write_timeout())]);
    let policy = FnRetryPolicy::new(|_| RetryDecision::Ignore);
    let profile = ExecutionProfile::builder()
        .retry_policy(Arc::new(policy))
        .build();
    let (session, _observer) = session_with(&pool, &NODES[..2], profile);

    let error = session.execute(&idempotent("SELECT 1")).await.unwrap_err();

    assert_matches!(
        error,
        ExecutionError::LastAttemptError(RequestAttemptError::DbError(
            DbError::WriteTimeout { .. },
            _
        ))
    );
    assert_eq!(pool.requested_ports(), vec![9042, 9043]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn pool_errors_are_reported_to_observers() {
    setup_tracing();
    let pool = MockPool::new();
    pool.refuse(9042);
    let (session, observer) = session_with(&pool, &NODES, ExecutionProfile::default());

    // Pool errors are retried even for non-idempotent statements.
    let response = session.execute(&Statement::new("INSERT")).await.unwrap();

    assert_eq!(coordinator_port(&response), 9043);
    assert_eq!(
        observer.events(),
        vec![
            Event::RequestStart,
            Event::NodeStart(9042),
            Event::NodeError(
                9042,
                RequestErrorType::ConnectionError,
                RetryDecision::RetryNextTarget(None)
            ),
            Event::NodeStart(9043),
            Event::NodeSuccess(9043),
            Event::RequestSuccess(9043),
        ]
    );
    assert_eq!(pool.acquired(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn unreachable_cluster_reports_pool_errors() {
    setup_tracing();
    let pool = MockPool::new();
    for port in NODES {
        pool.refuse(port);
    }
    let (session, observer) = session_with(&pool, &NODES, ExecutionProfile::default());

    let error = session.execute(&idempotent("SELECT 1")).await.unwrap_err();

    let ExecutionError::NoHostAvailable(no_host) = error else {
        panic!("Expected NoHostAvailable, got {error:?}");
    };
    assert_eq!(no_host.errors.len(), 3);
    for host_error in &no_host.errors {
        assert_matches!(host_error.error, RequestAttemptError::ConnectionPoolError(_));
    }
    let mut expected = vec![Event::RequestStart];
    for port in NODES {
        expected.push(Event::NodeStart(port));
        expected.push(Event::NodeError(
            port,
            RequestErrorType::ConnectionError,
            RetryDecision::RetryNextTarget(None),
        ));
    }
    expected.push(Event::RequestFailure);
    assert_eq!(observer.events(), expected);
    assert!(pool.requests().is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn empty_plan_fails_without_attempts() {
    setup_tracing();
    let pool = MockPool::new();
    let (session, observer) = session_with(&pool, &NODES, ExecutionProfile::default());
    for node in session.get_cluster_state().get_nodes_info() {
        node.mark_down();
    }

    let error = session.execute(&idempotent("SELECT 1")).await.unwrap_err();

    assert_matches!(error, ExecutionError::NoHostAvailable(e) if e.errors.is_empty());
    assert_eq!(
        observer.events(),
        vec![Event::RequestStart, Event::RequestFailure]
    );
    assert_eq!(pool.acquired(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn unexpected_response_is_an_attempt_error() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(Outcome::Ready)]);
    let (session, observer) = session_with(&pool, &NODES, ExecutionProfile::default());

    let error = session.execute(&idempotent("SELECT 1")).await.unwrap_err();

    assert_matches!(
        error,
        ExecutionError::LastAttemptError(RequestAttemptError::UnexpectedResponse(
            CqlResponseKind::Ready
        ))
    );
    assert_eq!(
        observer.events()[2],
        Event::NodeError(9042, RequestErrorType::Other, RetryDecision::Rethrow)
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn request_timeout_releases_connections() {
    setup_tracing();
    let pool = MockPool::new();
    for port in NODES {
        pool.script(port, [Reaction::now(Outcome::Hang)]);
    }
    let profile = ExecutionProfile::builder()
        .request_timeout(Some(Duration::from_secs(1)))
        .build();
    let (session, observer) = session_with(&pool, &NODES, profile);

    let start = Instant::now();
    let error = session.execute(&idempotent("SELECT 1")).await.unwrap_err();

    assert_matches!(error, ExecutionError::RequestTimeout(t) if t == Duration::from_secs(1));
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(
        observer.events(),
        vec![
            Event::RequestStart,
            Event::NodeStart(9042),
            Event::RequestFailure,
        ]
    );
    assert_eq!(pool.acquired(), 1);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn statement_request_timeout_takes_precedence() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::after(Duration::from_secs(5), Outcome::Rows)]);
    let (session, _observer) = session_with(&pool, &NODES, ExecutionProfile::default());

    let mut statement = idempotent("SELECT 1");
    statement.set_request_timeout(Some(Duration::from_millis(200)));
    let error = session.execute(&statement).await.unwrap_err();

    assert_matches!(error, ExecutionError::RequestTimeout(t) if t == Duration::from_millis(200));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn attempt_timeout_moves_to_the_next_node() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(Outcome::Hang)]);
    let profile = ExecutionProfile::builder()
        .attempt_timeout(Some(Duration::from_millis(100)))
        .build();
    let (session, observer) = session_with(&pool, &NODES, profile);

    let start = Instant::now();
    let response = session.execute(&idempotent("SELECT 1")).await.unwrap();

    assert_eq!(coordinator_port(&response), 9043);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(
        observer.events(),
        vec![
            Event::RequestStart,
            Event::NodeStart(9042),
            Event::NodeError(
                9042,
                RequestErrorType::ClientTimeout,
                RetryDecision::RetryNextTarget(None)
            ),
            Event::NodeStart(9043),
            Event::NodeSuccess(9043),
            Event::RequestSuccess(9043),
        ]
    );
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn request_deadline_wins_over_longer_attempt_timeout() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(Outcome::Hang)]);
    let profile = ExecutionProfile::builder()
        .attempt_timeout(Some(Duration::from_millis(500)))
        .request_timeout(Some(Duration::from_millis(300)))
        .build();
    let (session, observer) = session_with(&pool, &NODES, profile);

    let start = Instant::now();
    let error = session.execute(&Statement::new("INSERT")).await.unwrap_err();

    assert_matches!(error, ExecutionError::RequestTimeout(t) if t == Duration::from_millis(300));
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(
        observer.events(),
        vec![
            Event::RequestStart,
            Event::NodeStart(9042),
            Event::RequestFailure,
        ]
    );
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn downgrading_policy_does_not_repeat_partial_writes() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(write_timeout())]);
    let profile = ExecutionProfile::builder()
        .retry_policy(Arc::new(DowngradingConsistencyRetryPolicy::new()))
        .build();
    let (session, observer) = session_with(&pool, &NODES, profile);

    let error = session
        .execute(&idempotent("INSERT INTO t (a) VALUES (1)"))
        .await
        .unwrap_err();

    assert_matches!(
        error,
        ExecutionError::LastAttemptError(RequestAttemptError::DbError(
            DbError::WriteTimeout {
                write_type: WriteType::Simple,
                received: 1,
                ..
            },
            _
        ))
    );
    assert_eq!(pool.requested_ports(), vec![9042]);
    assert_eq!(
        observer.events()[2],
        Event::NodeError(9042, RequestErrorType::WriteTimeout, RetryDecision::Rethrow)
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
#[ntest::timeout(10000)]
async fn dropped_request_is_reported_as_cancelled() {
    setup_tracing();
    let pool = MockPool::new();
    pool.script(9042, [Reaction::now(Outcome::Hang)]);
    let (session, observer) = session_with(&pool, &NODES, ExecutionProfile::default());

    let statement = idempotent("SELECT 1");
    let result =
        tokio::time::timeout(Duration::from_millis(50), session.execute(&statement)).await;

    assert!(result.is_err());
    assert_eq!(
        observer.events(),
        vec![
            Event::RequestStart,
            Event::NodeStart(9042),
            Event::RequestCancelled,
        ]
    );
    assert_eq!(pool.in_use(), 0);
}
