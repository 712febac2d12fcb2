//! `run --instances N` on the master

use super::common::*;
use buildyard::config::{CoordinatorPolicy, SiblingPolicy};
use buildyard::error::{ProtocolError, ValidationError};
use buildyard::CoordinatorError;
use buildyard_sdk::{Role, WorkerMessage};

#[tokio::test]
async fn test_single_instance_runs_in_process() {
    let harness = Harness::new(vec![]);

    harness.master().run(Some("1")).await.unwrap();

    assert_eq!(harness.loader.runtimes(), 1);
    assert_eq!(harness.count("signal:run"), 1);
    assert_eq!(harness.spawner.spawned(), 0);
}

#[tokio::test]
async fn test_invalid_instances_spawn_nothing() {
    for raw in [Some("0"), Some("-1"), Some("2.5"), Some("many"), None] {
        let harness = Harness::new(vec![]);

        let err = harness.master().run(raw).await.unwrap_err();
        let expected = raw.unwrap_or("undefined");
        assert!(matches!(
            err,
            CoordinatorError::Validation(ValidationError::InvalidInstances(ref v)) if v == expected
        ));
        assert_eq!(harness.spawner.spawned(), 0);
        assert!(harness.events().is_empty());
    }
}

#[tokio::test]
async fn test_all_instances_started() {
    let harness = Harness::new(vec![
        Script::sends([WorkerMessage::RunFinished]),
        Script::sends([WorkerMessage::RunFinished]),
        Script::sends([WorkerMessage::RunFinished]),
    ]);

    harness.master().run(Some("3")).await.unwrap();

    assert_eq!(harness.spawner.spawned(), 3);
    // Fan-out happens entirely in the workers
    assert_eq!(harness.loader.runtimes(), 0);
}

#[tokio::test]
async fn test_instance_crash_rejects_and_leaves_siblings() {
    let harness = Harness::new(vec![
        Script::sends([WorkerMessage::Unexpected("crash".to_string())]),
        Script::silent().stays_open(),
    ]);

    let master = harness.master();
    let err = master.run(Some("2")).await.unwrap_err();

    match err {
        CoordinatorError::Protocol(ProtocolError::UnexpectedRunMessage(msg)) => {
            assert_eq!(msg, WorkerMessage::Unexpected("crash".to_string()));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(harness.spawner.terminated(), vec![false, false]);
    assert_eq!(master.detached().len(), 2);
}

#[tokio::test]
async fn test_left_running_sibling_drains_after_rejection() {
    let harness = Harness::new(vec![
        Script::sends([WorkerMessage::Unexpected("crash".to_string())]),
        Script::sends([WorkerMessage::RunFinished, WorkerMessage::RunAgain]),
    ]);
    let master = harness.master();

    master.run(Some("2")).await.unwrap_err();

    // The sibling is still attached and is read until it exits
    assert_eq!(master.detached().len(), 2);
    master.detached().drain().await;
    assert!(master.detached().is_empty());
    assert_eq!(harness.spawner.terminated(), vec![false, false]);
}

#[tokio::test]
async fn test_instance_crash_terminates_siblings_when_configured() {
    let harness = Harness::new(vec![
        Script::sends([WorkerMessage::RunFinished]).stays_open(),
        Script::sends([WorkerMessage::Unexpected("crash".to_string())]),
    ]);
    let policy = CoordinatorPolicy {
        on_instance_failure: SiblingPolicy::Terminate,
        ..Default::default()
    };

    let err = harness
        .coordinator(Role::Master, policy)
        .run(Some("2"))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "crash");
    assert_eq!(harness.spawner.terminated(), vec![true, true]);
}

#[tokio::test]
async fn test_partial_spawn_failure_keeps_started_instances() {
    // Only one of three workers can be spawned
    let harness = Harness::new(vec![Script::sends([WorkerMessage::RunFinished])]);
    let master = harness.master();

    let err = master.run(Some("3")).await.unwrap_err();

    assert!(matches!(err, CoordinatorError::Spawn(_)));
    assert_eq!(harness.spawner.spawned(), 1);
    assert_eq!(master.detached().len(), 1);
}

#[tokio::test]
async fn test_instance_exit_before_run_finished() {
    let harness = Harness::new(vec![
        Script::sends([WorkerMessage::RunFinished]),
        Script::silent(),
    ]);

    let err = harness.master().run(Some("2")).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Protocol(ProtocolError::WorkerExited {
            expected: "RUN_FINISHED",
            ..
        })
    ));
}
