//! Master side of `build` and `test`: handshake and supervision

use super::common::*;
use buildyard::config::{CoordinatorPolicy, RespawnPolicy};
use buildyard::error::ProtocolError;
use buildyard::{BuildOptions, CoordinatorError};
use buildyard_sdk::{Role, WorkerMessage};

fn protocol_error(err: CoordinatorError) -> ProtocolError {
    match err {
        CoordinatorError::Protocol(e) => e,
        other => panic!("expected a protocol error, got {:?}", other),
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_build_handshake_forks_one_worker() {
    let harness = Harness::new(vec![Script::sends([WorkerMessage::BuildFinished])]);

    harness.master().build(BuildOptions::default()).await.unwrap();

    assert_eq!(harness.spawner.spawned(), 1);
    // The master never loads modules itself without --watch
    assert_eq!(harness.loader.builds(), 0);
    assert_eq!(harness.loader.runtimes(), 0);
}

#[tokio::test]
async fn test_handshake_rejects_other_first_message() {
    let harness = Harness::new(vec![Script::sends([WorkerMessage::Unexpected(
        "crash".to_string(),
    )])]);
    let master = harness.master();

    let err = protocol_error(master.build(BuildOptions::default()).await.unwrap_err());
    assert!(matches!(
        err,
        ProtocolError::UnexpectedFirstMessage {
            expected: "BUILD_FINISHED",
            ..
        }
    ));
    assert_eq!(
        err.cause(),
        Some(&WorkerMessage::Unexpected("crash".to_string()))
    );
    // The worker is not killed, only handed off
    assert_eq!(harness.spawner.terminated(), vec![false]);
    assert_eq!(master.detached().len(), 1);
}

#[tokio::test]
async fn test_handshake_rejects_run_finished() {
    let harness = Harness::new(vec![Script::sends([WorkerMessage::RunFinished])]);

    let err = protocol_error(harness.master().test(false).await.unwrap_err());
    assert_eq!(err.cause(), Some(&WorkerMessage::RunFinished));
}

#[tokio::test]
async fn test_worker_exit_before_handshake() {
    let harness = Harness::new(vec![Script::silent()]);

    let err = protocol_error(harness.master().build(BuildOptions::default()).await.unwrap_err());
    assert_eq!(
        err,
        ProtocolError::WorkerExited {
            pid: 1000,
            expected: "BUILD_FINISHED"
        }
    );
}

#[tokio::test]
async fn test_handshake_timeout() {
    let harness = Harness::new(vec![Script::silent().stays_open()]);
    let policy = CoordinatorPolicy {
        message_timeout_secs: Some(1),
        ..Default::default()
    };

    let err = harness
        .coordinator(Role::Master, policy)
        .build(BuildOptions::default())
        .await
        .unwrap_err();
    assert_eq!(
        protocol_error(err),
        ProtocolError::Timeout { pid: 1000, secs: 1 }
    );
}

#[tokio::test]
async fn test_spawn_failure_surfaces() {
    let harness = Harness::new(vec![]);

    let err = harness.master().build(BuildOptions::default()).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Spawn(_)));
}

// ============================================================================
// Supervision
// ============================================================================

#[tokio::test]
async fn test_watch_master_loads_runtime_then_watch_output() {
    let harness = Harness::new(vec![Script::sends([WorkerMessage::BuildFinished])]);

    harness
        .master()
        .build(BuildOptions {
            run: false,
            watch: true,
        })
        .await
        .unwrap();

    assert_eq!(harness.loader.runtimes(), 1);
    assert_eq!(harness.events(), vec!["load_runtime", "signal:watch-output"]);
}

#[tokio::test]
async fn test_run_again_forks_replacement() {
    let harness = Harness::new(vec![
        Script::sends([WorkerMessage::BuildFinished, WorkerMessage::RunAgain]),
        Script::sends([WorkerMessage::BuildFinished]),
    ]);

    harness.master().build(BuildOptions::default()).await.unwrap();

    assert_eq!(harness.spawner.spawned(), 2);
    // Retire is the default: the first worker is gone, the second is not
    assert_eq!(harness.spawner.terminated(), vec![true, false]);
}

#[tokio::test]
async fn test_run_again_coexist_keeps_previous_worker() {
    let harness = Harness::new(vec![
        Script::sends([WorkerMessage::BuildFinished, WorkerMessage::RunAgain]),
        Script::sends([WorkerMessage::BuildFinished, WorkerMessage::RunAgain]),
        Script::sends([WorkerMessage::BuildFinished]),
    ]);
    let policy = CoordinatorPolicy {
        on_rerun: RespawnPolicy::Coexist,
        ..Default::default()
    };

    harness
        .coordinator(Role::Master, policy)
        .build(BuildOptions::default())
        .await
        .unwrap();

    assert_eq!(harness.spawner.spawned(), 3);
    assert_eq!(harness.spawner.terminated(), vec![false, false, false]);
}

#[tokio::test]
async fn test_rerun_handshake_failure_ends_supervision() {
    let harness = Harness::new(vec![
        Script::sends([WorkerMessage::BuildFinished, WorkerMessage::RunAgain]),
        Script::sends([WorkerMessage::RunAgain]),
    ]);

    let err = protocol_error(harness.master().build(BuildOptions::default()).await.unwrap_err());
    assert!(matches!(err, ProtocolError::UnexpectedFirstMessage { pid: 1001, .. }));
}

#[tokio::test]
async fn test_unhandled_followup_message() {
    let harness = Harness::new(vec![Script::sends([
        WorkerMessage::BuildFinished,
        WorkerMessage::RunFinished,
    ])]);

    let master = harness.master();

    let err = protocol_error(master.test(false).await.unwrap_err());
    assert_eq!(err.to_string(), "Can not handle RUN_FINISHED at this time.");
    assert_eq!(master.detached().len(), 1);
}

#[tokio::test]
async fn test_worker_failure_after_handshake() {
    let harness = Harness::new(vec![
        Script::sends([WorkerMessage::BuildFinished]).exits_with(2)
    ]);

    let err = harness.master().build(BuildOptions::default()).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::WorkerFailed {
            pid: 1000,
            code: Some(2)
        }
    ));
}
