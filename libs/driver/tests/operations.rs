//! Offer handling and outbound operations.

mod common;

use std::time::Duration;

use common::{calls_of, harness, test_config, Record, RecordingScheduler};
use skiff_driver::{DriverConfig, DriverError, DriverState, SchedulerDriver};
use skiff_protocol::{Call, Filters, ReconcileTask, Resource, TransportError};
use skiff_testing::fixtures::{agent_id, offer, offer_id, task, task_id};

async fn registered() -> common::Harness {
    let (scheduler, recorder) = RecordingScheduler::new();
    let mut h = harness(scheduler, recorder, test_config());
    h.register("fw-1").await;
    h
}

#[tokio::test]
async fn test_launch_consumes_all_offers_once() {
    let mut h = registered().await;
    h.offer(vec![
        offer("o1", "fw-1", "a", 1.0, 256.0),
        offer("o2", "fw-1", "a", 1.0, 256.0),
    ])
    .await;

    h.driver
        .launch_tasks(
            &[offer_id("o1"), offer_id("o2")],
            vec![task("t1", "a", 1.5, 384.0)],
            Filters::default(),
        )
        .await
        .unwrap();

    let launches = calls_of(&h.master, "launch");
    assert_eq!(launches.len(), 1);
    match &launches[0] {
        Call::Launch {
            offer_ids, tasks, ..
        } => {
            assert_eq!(offer_ids, &vec![offer_id("o1"), offer_id("o2")]);
            assert_eq!(tasks.len(), 1);
        }
        other => panic!("expected launch, got {other:?}"),
    }
    assert!(h.driver.outstanding_offers().await.is_empty());

    // O1 is gone; declining it is a protocol violation with no message
    let err = h
        .driver
        .decline_offer(&offer_id("o1"), Filters::default())
        .await
        .unwrap_err();
    assert_eq!(err, DriverError::UnknownOffer(offer_id("o1")));
    assert!(err.is_protocol_violation());
    assert_eq!(h.master.count("decline"), 0);

    // Launching again on the same offers fails the same way
    assert!(h
        .driver
        .launch_tasks(&[offer_id("o2")], vec![], Filters::default())
        .await
        .unwrap_err()
        .is_protocol_violation());
    assert_eq!(h.master.count("launch"), 1);
}

#[tokio::test]
async fn test_launch_across_agents_has_no_side_effects() {
    let mut h = registered().await;
    h.offer(vec![
        offer("o1", "fw-1", "a", 1.0, 256.0),
        offer("o2", "fw-1", "b", 1.0, 256.0),
    ])
    .await;

    let err = h
        .driver
        .launch_tasks(
            &[offer_id("o1"), offer_id("o2")],
            vec![task("t1", "a", 0.5, 64.0)],
            Filters::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::AgentMismatch { .. }));

    assert_eq!(
        h.driver.outstanding_offers().await,
        vec![offer_id("o1"), offer_id("o2")]
    );
    assert_eq!(h.master.count("launch"), 0);
}

#[tokio::test]
async fn test_launch_rejects_oversized_and_misplaced_tasks() {
    let mut h = registered().await;
    h.offer(vec![offer("o1", "fw-1", "a", 1.0, 256.0)]).await;

    let err = h
        .driver
        .launch_tasks(
            &[offer_id("o1")],
            vec![task("t1", "a", 2.0, 64.0)],
            Filters::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::InsufficientResources { .. }));

    let err = h
        .driver
        .launch_tasks(
            &[offer_id("o1")],
            vec![task("t1", "b", 0.5, 64.0)],
            Filters::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DriverError::AgentMismatch {
            expected: agent_id("a"),
            actual: agent_id("b"),
        }
    );

    assert_eq!(h.driver.outstanding_offers().await, vec![offer_id("o1")]);
    assert!(calls_of(&h.master, "launch").is_empty());
}

#[tokio::test]
async fn test_launch_rejects_port_claimed_by_two_tasks() {
    let mut h = registered().await;
    let mut o1 = offer("o1", "fw-1", "a", 1.0, 256.0);
    o1.resources.push(Resource::ranges("ports", vec![(8080, 8080)]));
    h.offer(vec![o1]).await;

    let with_port = |id: &str| {
        let mut t = task(id, "a", 0.25, 64.0);
        t.resources.push(Resource::ranges("ports", vec![(8080, 8080)]));
        t
    };

    let err = h
        .driver
        .launch_tasks(
            &[offer_id("o1")],
            vec![with_port("t1"), with_port("t2")],
            Filters::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::InsufficientResources { .. }));
    assert!(calls_of(&h.master, "launch").is_empty());

    // One task on the port still fits
    h.driver
        .launch_tasks(&[offer_id("o1")], vec![with_port("t1")], Filters::default())
        .await
        .unwrap();
    assert_eq!(h.master.count("launch"), 1);
}

#[tokio::test]
async fn test_launch_without_tasks_declines() {
    let mut h = registered().await;
    h.offer(vec![offer("o1", "fw-1", "a", 1.0, 256.0)]).await;

    h.driver
        .launch_tasks(&[offer_id("o1")], vec![], Filters::refuse_for(60.0))
        .await
        .unwrap();

    assert_eq!(h.master.count("launch"), 0);
    match calls_of(&h.master, "decline").as_slice() {
        [Call::Decline {
            offer_ids, filters, ..
        }] => {
            assert_eq!(offer_ids, &vec![offer_id("o1")]);
            assert_eq!(filters.refuse_seconds, Some(60.0));
        }
        other => panic!("expected one decline, got {other:?}"),
    }
}

#[tokio::test]
async fn test_decline_then_revive_twice() {
    let mut h = registered().await;
    h.offer(vec![offer("o1", "fw-1", "a", 1.0, 256.0)]).await;

    h.driver
        .decline_offer(&offer_id("o1"), Filters::refuse_for(30.0))
        .await
        .unwrap();
    assert_eq!(h.master.count("decline"), 1);
    assert!(h.driver.outstanding_offers().await.is_empty());

    h.driver.revive_offers().await.unwrap();
    h.driver.revive_offers().await.unwrap();
    assert_eq!(h.master.count("revive"), 2);
    assert_eq!(h.driver.state(), DriverState::Registered);
}

#[tokio::test]
async fn test_rescind_invalidates_offer() {
    let mut h = registered().await;
    h.offer(vec![offer("o1", "fw-1", "a", 1.0, 256.0)]).await;

    assert!(h.master.rescind(&offer_id("o1")));
    assert_eq!(h.callbacks.next().await, Record::Rescinded("o1".to_string()));

    assert_eq!(
        h.driver
            .launch_tasks(&[offer_id("o1")], vec![], Filters::default())
            .await
            .unwrap_err(),
        DriverError::UnknownOffer(offer_id("o1"))
    );

    // Rescinding an offer that is not held still reaches the framework
    assert!(h.master.rescind(&offer_id("o9")));
    assert_eq!(h.callbacks.next().await, Record::Rescinded("o9".to_string()));
    assert!(h.driver.outstanding_offers().await.is_empty());
}

#[tokio::test]
async fn test_failed_send_leaves_offer_usable() {
    let mut h = registered().await;
    h.offer(vec![offer("o1", "fw-1", "a", 1.0, 256.0)]).await;

    h.master.fail_sends(true);
    let err = h
        .driver
        .launch_tasks(
            &[offer_id("o1")],
            vec![task("t1", "a", 1.0, 64.0)],
            Filters::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DriverError::Transport(TransportError::SendFailed(_))
    ));
    assert_eq!(h.driver.outstanding_offers().await, vec![offer_id("o1")]);

    h.master.fail_sends(false);
    h.driver
        .launch_tasks(
            &[offer_id("o1")],
            vec![task("t1", "a", 1.0, 64.0)],
            Filters::default(),
        )
        .await
        .unwrap();
    assert_eq!(h.master.count("launch"), 1);
}

#[tokio::test]
async fn test_kill_and_reconcile() {
    let h = registered().await;

    h.driver
        .kill_task(&task_id("t1"), Some(&agent_id("a")))
        .await
        .unwrap();
    h.driver.reconcile_tasks(vec![]).await.unwrap();
    h.driver
        .reconcile_tasks(vec![ReconcileTask::from(task_id("t2"))])
        .await
        .unwrap();

    match calls_of(&h.master, "kill").as_slice() {
        [Call::Kill {
            task_id: killed,
            agent_id: Some(agent),
            ..
        }] => {
            assert_eq!(killed, &task_id("t1"));
            assert_eq!(agent, &agent_id("a"));
        }
        other => panic!("expected one kill, got {other:?}"),
    }

    let reconciles = calls_of(&h.master, "reconcile");
    assert!(matches!(&reconciles[0], Call::Reconcile { tasks, .. } if tasks.is_empty()));
    assert!(matches!(&reconciles[1], Call::Reconcile { tasks, .. } if tasks.len() == 1));
}

#[tokio::test(start_paused = true)]
async fn test_expired_offers_cannot_be_used() {
    let config = DriverConfig {
        offer_ttl: Some(Duration::from_secs(1)),
        ..test_config()
    };
    let (scheduler, recorder) = RecordingScheduler::new();
    let mut h = harness(scheduler, recorder, config);
    h.register("fw-1").await;
    h.offer(vec![offer("o1", "fw-1", "a", 1.0, 256.0)]).await;

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(
        h.driver
            .decline_offer(&offer_id("o1"), Filters::default())
            .await
            .unwrap_err(),
        DriverError::UnknownOffer(offer_id("o1"))
    );

    // The next inbound event purges it
    h.master.heartbeat();
    assert_eq!(h.callbacks.next().await, Record::Heartbeat);
    assert!(h.driver.outstanding_offers().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_callbacks_follow_arrival_order() {
    let (mut scheduler, recorder) = RecordingScheduler::new();
    scheduler.callback_delay = Some(Duration::from_millis(250));
    let mut h = harness(scheduler, recorder, test_config());
    h.register("fw-1").await;

    h.master.send_offers(vec![offer("o1", "fw-1", "a", 1.0, 256.0)]);
    h.master.rescind(&offer_id("o1"));
    h.master.heartbeat();

    assert_eq!(h.callbacks.next().await, Record::Offers(vec!["o1".to_string()]));
    assert_eq!(h.callbacks.next().await, Record::Rescinded("o1".to_string()));
    assert_eq!(h.callbacks.next().await, Record::Heartbeat);
}

#[tokio::test]
async fn test_stop_from_inside_callback() {
    let (mut scheduler, recorder) = RecordingScheduler::new();
    scheduler.stop_on_offers = true;
    let mut h = harness(scheduler, recorder, test_config());
    h.register("fw-1").await;

    h.offer(vec![offer("o1", "fw-1", "a", 1.0, 256.0)]).await;
    assert_eq!(
        h.callbacks.next().await,
        Record::StoppedFromCallback(DriverState::Stopped)
    );

    assert_eq!(h.driver.join().await.unwrap(), DriverState::Stopped);
    assert!(!h.master.heartbeat());
    h.callbacks.assert_quiet().await;
}
