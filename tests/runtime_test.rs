mod common;

use std::{
    sync::atomic::Ordering,
    time::Duration,
};

use common::{capture_logs, counter, group, group_with, wait_for};
use force::{
    config::RunnerConfig,
    interpreter::run_script,
    runner::{Envelope, RunnerState},
    Event,
};

#[tokio::test]
async fn test_full_inbound_queue_drops_events() {
    let config = RunnerConfig {
        process_queue_size: 1,
        ..RunnerConfig::default()
    };
    let (runner, group) = group_with(config);
    let count = counter(&group);
    run_script(&group, r#"Process("slow", Ticker("1h"), Count())"#)
        .await
        .unwrap();

    let process = runner.process("slow").unwrap();
    let source = process.source().id();
    assert_eq!(
        runner.route(Envelope {
            source,
            event: Event::oneshot(),
        }),
        1
    );
    let (delivered, logs) = capture_logs(|| {
        runner.route(Envelope {
            source,
            event: Event::oneshot(),
        })
    });
    assert_eq!(delivered, 0);
    assert_eq!(process.dropped_events(), 1);
    assert!(logs.contains("inbound queue full, dropping event"), "logs: {logs}");
    assert!(logs.contains("process=slow"), "logs: {logs}");

    runner.start().unwrap();
    wait_for(&count, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    runner.stop().await.unwrap();
    assert_eq!(runner.state(), RunnerState::Stopped);
}

#[tokio::test]
async fn test_oneshot_runs_once() {
    let (runner, group) = group();
    let count = counter(&group);
    run_script(&group, r#"Process("once", Oneshot(), Count())"#)
        .await
        .unwrap();

    runner.start().unwrap();
    wait_for(&count, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    tokio::time::timeout(Duration::from_secs(5), runner.stop())
        .await
        .expect("stop hung")
        .unwrap();
}

#[tokio::test]
async fn test_shared_source_reaches_every_process() {
    let (runner, group) = group();
    let count = counter(&group);
    run_script(
        &group,
        r#"
        Define(start, Oneshot())
        Process("a", start, Count())
        Process("b", start, Count())
        Process("c", Duplicate(Oneshot(), 3), Count())
        Process("d", FanIn(Oneshot(), Oneshot()), Count())
        "#,
    )
    .await
    .unwrap();
    assert_eq!(runner.processes().len(), 4);

    runner.start().unwrap();
    wait_for(&count, 2 + 3 + 2).await;
    runner.stop().await.unwrap();
}

#[tokio::test]
async fn test_exit_code_ends_wait() {
    let (runner, group) = group();
    run_script(&group, r#"Process("bye", Oneshot(), Exit(3))"#)
        .await
        .unwrap();

    runner.start().unwrap();
    let code = tokio::time::timeout(Duration::from_secs(5), runner.wait())
        .await
        .expect("wait hung")
        .unwrap();
    assert_eq!(code, 3);
    assert_eq!(group.exit_event().unwrap().exit_code(), Some(3));
}

#[tokio::test]
async fn test_failed_run_does_not_stop_others() {
    let (runner, group) = group();
    let count = counter(&group);
    run_script(
        &group,
        r#"
        Process("broken", Oneshot(), Sequence(
            Define(token, ExpectEnv("FORCE_TEST_UNSET_TOKEN")),
            Count(),
        ))
        Process("fine", Oneshot(), Sequence(Noop(), Count()))
        "#,
    )
    .await
    .unwrap();

    runner.start().unwrap();
    wait_for(&count, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    runner.stop().await.unwrap();
}

#[tokio::test]
async fn test_runs_see_event_and_globals() {
    let (runner, group) = group();
    let count = counter(&group);
    run_script(
        &group,
        r#"
        Define(expected, "Oneshot")
        Process("check", Oneshot(), If(Eq(event.kind, expected), Count()))
        "#,
    )
    .await
    .unwrap();

    runner.start().unwrap();
    wait_for(&count, 1).await;
    runner.stop().await.unwrap();
}

#[tokio::test]
async fn test_processes_must_be_added_before_start() {
    let (runner, group) = group();
    runner.start().unwrap();
    let err = run_script(&group, r#"Process("late", Oneshot(), Noop())"#)
        .await
        .unwrap_err();
    assert!(err.is_bad_parameter());
    runner.stop().await.unwrap();
}

#[tokio::test]
async fn test_source_read_by_two_owners_is_rejected() {
    // a fan-in child used directly by another process
    let (runner, group) = group();
    let err = run_script(
        &group,
        r#"
        Define(start, Oneshot())
        Process("direct", start, Noop())
        Process("merged", FanIn(start, Oneshot()), Noop())
        "#,
    )
    .await
    .unwrap_err();
    assert!(err.is_bad_parameter());
    assert!(err.root_cause().to_string().contains("merged"));
    assert!(runner.process("merged").is_none());

    // the same, registered the other way round
    let (_runner, group) = common::group();
    let err = run_script(
        &group,
        r#"
        Define(start, Oneshot())
        Process("merged", FanIn(start, Oneshot()), Noop())
        Process("direct", start, Noop())
        "#,
    )
    .await
    .unwrap_err();
    assert!(err.is_bad_parameter());

    // two composites sharing a child
    let (_runner, group) = common::group();
    let err = run_script(
        &group,
        r#"
        Define(start, Oneshot())
        Process("twice", Duplicate(start, 2), Noop())
        Process("merged", FanIn(start), Noop())
        "#,
    )
    .await
    .unwrap_err();
    assert!(err.is_bad_parameter());
}

#[tokio::test]
async fn test_shared_composite_still_allowed() {
    let (runner, group) = group();
    let count = counter(&group);
    run_script(
        &group,
        r#"
        Define(merged, FanIn(Oneshot(), Oneshot()))
        Process("a", merged, Count())
        Process("b", merged, Count())
        "#,
    )
    .await
    .unwrap();

    runner.start().unwrap();
    wait_for(&count, 4).await;
    runner.stop().await.unwrap();
}
