use std::time::Instant;

use tokio::sync::broadcast;
use uuid::Uuid;

use shared::operation::OperationKind;

use super::*;
use crate::test_support::*;

struct Harness {
    queue: Arc<OperationQueue>,
    connector: Arc<StubConnector>,
    probe: Arc<ScriptedProbe>,
    events: broadcast::Receiver<StationEvent>,
    dispatcher: Dispatcher,
}

fn spawn_with(
    connector: Arc<StubConnector>,
    probe: Arc<ScriptedProbe>,
    config: DispatcherConfig,
) -> Harness {
    let queue = Arc::new(OperationQueue::new());
    let (events_tx, events) = broadcast::channel(256);
    let dispatcher = Dispatcher::spawn(
        Arc::clone(&queue),
        connector.clone(),
        probe.clone(),
        events_tx,
        config,
    );
    Harness {
        queue,
        connector,
        probe,
        events,
        dispatcher,
    }
}

fn spawn_default() -> Harness {
    spawn_with(StubConnector::ok(), ScriptedProbe::always(true), fast_config())
}

#[tokio::test(flavor = "multi_thread")]
async fn successful_append_clears_queue() {
    let h = spawn_default();
    h.queue.push_front(quick_append("pp1234-220101,"));

    let session = h.connector.session.clone();
    wait_until("append to reach the sheet", Duration::from_secs(2), || {
        !session.appended().is_empty()
    })
    .await;

    assert_eq!(session.appended(), vec![vec!["pp1234-220101,".to_string()]]);
    wait_until("queue to empty", Duration::from_secs(2), || {
        h.queue.is_empty()
    })
    .await;

    h.dispatcher.kill();
    h.dispatcher.join(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn operations_execute_in_submission_order() {
    let h = spawn_default();
    for tag in ["one", "two", "three"] {
        h.queue.push_front(quick_append(tag));
    }

    let session = h.connector.session.clone();
    wait_until("all appends to land", Duration::from_secs(2), || {
        session.appended().len() == 3
    })
    .await;

    let order: Vec<String> = session
        .appended()
        .into_iter()
        .map(|row| row[0].clone())
        .collect();
    assert_eq!(order, vec!["one", "two", "three"]);

    h.dispatcher.kill();
    h.dispatcher.join(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_retries_same_operation_until_success() {
    let h = spawn_default();
    let session = h.connector.session.clone();
    session.fail_next((0..3).map(|_| RemoteApiError::RateLimited { retry_after: None }));

    h.queue.push_front(quick_append("survivor"));

    wait_until("retried append to land", Duration::from_secs(5), || {
        !session.appended().is_empty()
    })
    .await;

    // Three failures plus the final success, all for the same operation.
    assert_eq!(session.calls(), 4);
    assert_eq!(session.appended(), vec![vec!["survivor".to_string()]]);

    h.dispatcher.kill();
    h.dispatcher.join(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_budget_exhaustion_is_fatal_without_advancing() {
    let mut h = spawn_default();
    let session = h.connector.session.clone();
    session.fail_next((0..6).map(|_| RemoteApiError::RateLimited { retry_after: None }));

    h.queue.push_front(quick_append("doomed"));
    h.queue.push_front(quick_append("never-reached"));

    expect_terminated(&mut h.events, true).await;

    // Five attempts burned the budget; the worker never advanced to the
    // second operation, and the failing one was requeued.
    assert_eq!(session.calls(), 5);
    assert!(session.appended().is_empty());
    assert_eq!(h.queue.len(), 2);

    h.dispatcher.join(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn access_failure_on_first_connect_is_fatal_with_zero_retries() {
    let connector = StubConnector::ok();
    connector.fail_next([RemoteApiError::Access("bad credentials".to_string())]);
    let mut h = spawn_with(connector, ScriptedProbe::always(true), fast_config());

    expect_terminated(&mut h.events, true).await;

    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(h.connector.session.calls(), 0);

    h.dispatcher.join(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_waits_out_a_connectivity_gap() {
    // Connect sees a healthy network, then two failed polls while the
    // delete is pending, then the network returns.
    let probe = ScriptedProbe::script(vec![true, false, false], true);
    let h = spawn_with(StubConnector::ok(), probe, fast_config());

    h.queue.push_front(quick_delete(1));

    let session = h.connector.session.clone();
    wait_until("delete to land", Duration::from_secs(5), || {
        session.deleted() == vec![1]
    })
    .await;

    assert!(h.probe.calls() >= 4, "expected at least two failed polls");
    assert!(h.queue.is_empty());

    h.dispatcher.kill();
    h.dispatcher.join(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_during_backoff_requeues_the_held_operation_promptly() {
    let mut config = fast_config();
    config.rate_limit_base = Duration::from_secs(30);
    let h = spawn_with(StubConnector::ok(), ScriptedProbe::always(true), config);

    let session = h.connector.session.clone();
    session.fail_next([RemoteApiError::RateLimited { retry_after: None }]);
    h.queue.push_front(quick_append("held"));

    wait_until("operation to enter backoff", Duration::from_secs(2), || {
        session.calls() == 1
    })
    .await;

    let killed_at = Instant::now();
    h.dispatcher.kill();
    h.dispatcher.join(Duration::from_secs(2)).await.unwrap();
    assert!(
        killed_at.elapsed() < Duration::from_secs(2),
        "kill did not interrupt the backoff sleep"
    );

    // The unfinished operation survived into the queue.
    let drained = h.queue.drain();
    assert_eq!(drained.len(), 1);
    assert!(matches!(
        &drained[0].kind,
        OperationKind::AppendRow { values } if values == &vec!["held".to_string()]
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_is_idempotent() {
    let h = spawn_default();
    h.dispatcher.kill();
    h.dispatcher.kill();
    h.dispatcher.join(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn custom_kind_is_dropped_without_stopping_the_worker() {
    let h = spawn_default();
    h.queue.push_front(Operation {
        id: Uuid::new_v4(),
        kind: OperationKind::Custom {
            name: "FrobnicateSheet".to_string(),
        },
        post_success_delay: Duration::ZERO,
    });
    h.queue.push_front(quick_append("after-custom"));

    let session = h.connector.session.clone();
    wait_until("worker to advance past custom kind", Duration::from_secs(2), || {
        session.appended().len() == 1
    })
    .await;

    assert_eq!(session.calls(), 1);
    assert!(h.queue.is_empty());

    h.dispatcher.kill();
    h.dispatcher.join(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_failure_escalates_fatally_and_requeues() {
    let mut h = spawn_default();
    let session = h.connector.session.clone();
    session.fail_next([RemoteApiError::Transport("connection reset".to_string())]);

    h.queue.push_front(quick_append("interrupted"));

    expect_terminated(&mut h.events, true).await;
    assert_eq!(h.queue.len(), 1);

    h.dispatcher.join(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnect_operation_rebuilds_the_session() {
    let h = spawn_default();
    h.queue.push_front(Operation::reconnect());

    let connector = h.connector.clone();
    wait_until("second connect", Duration::from_secs(2), || {
        connector.attempts() == 2
    })
    .await;

    h.dispatcher.kill();
    h.dispatcher.join(Duration::from_secs(2)).await.unwrap();
}

#[test]
fn rate_limit_backoff_grows_linearly_and_honors_larger_hints() {
    let config = DispatcherConfig::default();

    assert_eq!(
        rate_limit_backoff(&config, 1, None),
        Duration::from_secs(360)
    );
    assert_eq!(
        rate_limit_backoff(&config, 3, None),
        Duration::from_secs(480)
    );
    // A smaller hint never shortens the schedule; a larger one wins.
    assert_eq!(
        rate_limit_backoff(&config, 1, Some(Duration::from_secs(10))),
        Duration::from_secs(360)
    );
    assert_eq!(
        rate_limit_backoff(&config, 1, Some(Duration::from_secs(900))),
        Duration::from_secs(900)
    );
}
